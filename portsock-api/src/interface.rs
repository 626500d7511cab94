//! Network interface summaries.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::StateError;

/// Connectivity of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceStatus {
    /// The interface is up.
    Connected,
    /// The interface is down.
    Disconnected,
    /// Any other operational status.
    Unknown,
}

/// Operational status as reported by the platform (RFC 2863 `ifOperStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationalStatus {
    /// Ready to pass packets.
    Up,
    /// Not ready to pass packets.
    Down,
    /// Running diagnostics.
    Testing,
    /// Status cannot be determined.
    Unknown,
    /// Waiting for an external event.
    Dormant,
    /// Hardware component missing.
    NotPresent,
    /// Down because of a lower-layer interface.
    LowerLayerDown,
}

impl From<OperationalStatus> for InterfaceStatus {
    fn from(status: OperationalStatus) -> Self {
        match status {
            OperationalStatus::Up => InterfaceStatus::Connected,
            OperationalStatus::Down => InterfaceStatus::Disconnected,
            OperationalStatus::Testing
            | OperationalStatus::Unknown
            | OperationalStatus::Dormant
            | OperationalStatus::NotPresent
            | OperationalStatus::LowerLayerDown => InterfaceStatus::Unknown,
        }
    }
}

/// Immutable snapshot of one host network interface.
///
/// Only IPv4 addressing is summarized.
///
/// ```
/// use std::net::Ipv4Addr;
/// use portsock_api::interface::{InterfaceStatus, InterfaceSummary};
///
/// let summary = InterfaceSummary::new("2", "eth0", InterfaceStatus::Connected)
///     .with_ip_address(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(255, 255, 255, 0))
///     .with_gateway_address(Ipv4Addr::new(192, 168, 1, 1));
///
/// assert_eq!(summary.broadcast_address(), Some(Ipv4Addr::new(192, 168, 1, 255)));
/// assert!(summary.is_usable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceSummary {
    native_id: String,
    name: String,
    ip_address: Option<Ipv4Addr>,
    gateway_address: Option<Ipv4Addr>,
    broadcast_address: Option<Ipv4Addr>,
    status: InterfaceStatus,
}

impl InterfaceSummary {
    /// Creates a summary without addresses.
    pub fn new(
        native_id: impl Into<String>,
        name: impl Into<String>,
        status: InterfaceStatus,
    ) -> Self {
        Self {
            native_id: native_id.into(),
            name: name.into(),
            ip_address: None,
            gateway_address: None,
            broadcast_address: None,
            status,
        }
    }

    /// Sets the IPv4 address and derives the broadcast address from `netmask`.
    pub fn with_ip_address(mut self, address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        self.ip_address = Some(address);
        self.broadcast_address = Some(broadcast_address(address, netmask));
        self
    }

    /// Sets the IPv4 gateway address.
    pub fn with_gateway_address(mut self, gateway: Ipv4Addr) -> Self {
        self.gateway_address = Some(gateway);
        self
    }

    /// Platform identifier of the interface.
    pub fn native_id(&self) -> &str {
        &self.native_id
    }

    /// Human-readable name of the interface.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First IPv4 unicast address.
    pub fn ip_address(&self) -> Option<Ipv4Addr> {
        self.ip_address
    }

    /// First IPv4 gateway address.
    pub fn gateway_address(&self) -> Option<Ipv4Addr> {
        self.gateway_address
    }

    /// Broadcast address of the IPv4 subnet.
    pub fn broadcast_address(&self) -> Option<Ipv4Addr> {
        self.broadcast_address
    }

    /// Connectivity of the interface.
    pub fn connection_status(&self) -> InterfaceStatus {
        self.status
    }

    /// Whether the interface has an address sockets can bind to.
    pub fn is_usable(&self) -> bool {
        self.ip_address.is_some()
    }

    /// Whether the interface address is `127.0.0.1`.
    pub fn is_loopback(&self) -> bool {
        self.ip_address == Some(Ipv4Addr::LOCALHOST)
    }

    /// Returns the address to bind to, or a state error if the interface has none.
    pub fn usable_address(&self) -> core::result::Result<Ipv4Addr, StateError> {
        self.ip_address
            .ok_or_else(|| StateError::InterfaceNotUsable(self.name.clone()))
    }

    /// Whether `address` belongs to this interface.
    pub fn has_address(&self, address: IpAddr) -> bool {
        match address {
            IpAddr::V4(address) => self.ip_address == Some(address),
            IpAddr::V6(address) => {
                address.to_ipv4_mapped().is_some_and(|mapped| self.ip_address == Some(mapped))
            }
        }
    }
}

/// Computes `address | !netmask` per octet.
pub fn broadcast_address(address: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    let address = address.octets();
    let netmask = netmask.octets();
    Ipv4Addr::from(core::array::from_fn::<u8, 4, _>(|index| {
        address[index] | (netmask[index] ^ 255)
    }))
}

/// Converts a prefix length to a netmask, saturating above 32.
pub fn netmask_from_prefix(prefix_len: u8) -> Ipv4Addr {
    let mask = match prefix_len {
        0 => 0,
        length if length >= 32 => u32::MAX,
        length => u32::MAX << (32 - u32::from(length)),
    };
    Ipv4Addr::from(mask)
}

/// Source of interface summaries.
pub trait InterfaceProvider: core::fmt::Debug + Send + Sync {
    /// Enumerates host interfaces in no particular order.
    fn interfaces(&self) -> Result<Vec<InterfaceSummary>>;

    /// Returns the interface that owns `address`.
    fn interface_for(&self, address: IpAddr) -> Result<Option<InterfaceSummary>> {
        Ok(self
            .interfaces()?
            .into_iter()
            .find(|interface| interface.has_address(address)))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case([192, 168, 1, 10], [255, 255, 255, 0], [192, 168, 1, 255])]
    #[test_case([10, 1, 2, 3], [255, 0, 0, 0], [10, 255, 255, 255])]
    #[test_case([172, 16, 5, 4], [255, 255, 240, 0], [172, 16, 15, 255])]
    #[test_case([127, 0, 0, 1], [255, 255, 255, 255], [127, 0, 0, 1])]
    fn broadcast(address: [u8; 4], netmask: [u8; 4], expected: [u8; 4]) {
        assert_eq!(
            broadcast_address(address.into(), netmask.into()),
            Ipv4Addr::from(expected)
        );
    }

    #[test_case(0, [0, 0, 0, 0])]
    #[test_case(8, [255, 0, 0, 0])]
    #[test_case(20, [255, 255, 240, 0])]
    #[test_case(32, [255, 255, 255, 255])]
    #[test_case(40, [255, 255, 255, 255])]
    fn netmask(prefix_len: u8, expected: [u8; 4]) {
        assert_eq!(netmask_from_prefix(prefix_len), Ipv4Addr::from(expected));
    }

    #[test_case(OperationalStatus::Up, InterfaceStatus::Connected)]
    #[test_case(OperationalStatus::Down, InterfaceStatus::Disconnected)]
    #[test_case(OperationalStatus::Testing, InterfaceStatus::Unknown)]
    #[test_case(OperationalStatus::Dormant, InterfaceStatus::Unknown)]
    #[test_case(OperationalStatus::LowerLayerDown, InterfaceStatus::Unknown)]
    fn status(native: OperationalStatus, expected: InterfaceStatus) {
        assert_eq!(InterfaceStatus::from(native), expected);
    }

    #[test]
    fn interface_without_address_is_not_usable() {
        let summary = InterfaceSummary::new("7", "wwan0", InterfaceStatus::Disconnected);

        assert!(!summary.is_usable());
        assert!(!summary.is_loopback());
        assert_eq!(summary.broadcast_address(), None);
        assert_eq!(
            summary.usable_address(),
            Err(StateError::InterfaceNotUsable("wwan0".to_owned()))
        );
    }

    #[test]
    fn loopback() {
        let summary = InterfaceSummary::new("1", "lo", InterfaceStatus::Connected)
            .with_ip_address(Ipv4Addr::LOCALHOST, Ipv4Addr::new(255, 0, 0, 0));

        assert!(summary.is_loopback());
        assert!(summary.has_address("127.0.0.1".parse().unwrap()));
        assert!(summary.has_address("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!summary.has_address("127.0.0.2".parse().unwrap()));
    }
}
