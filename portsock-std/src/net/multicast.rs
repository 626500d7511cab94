//! UDP multicast for the std platform.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use portsock_api::events::Subscription;
use portsock_api::interface::InterfaceSummary;
use portsock_api::net::udp::Datagram;
use portsock_api::{ArgumentError, Normalize, Result, SocketConfig, StateError};
use socket2::SockRef;

use crate::net::udp::{DatagramCore, bind_socket};

/// UDP socket that joins one multicast group at a time.
///
/// Several clients in the same process may join the same group and port.
#[derive(Debug)]
pub struct UdpMulticastClient {
    core: DatagramCore,
    ttl: u32,
    group: Option<SocketAddr>,
}

impl Default for UdpMulticastClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpMulticastClient {
    /// Creates a client with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    /// Creates a client whose TTL starts at `config.multicast_ttl`.
    pub fn with_config(config: SocketConfig) -> Self {
        Self {
            core: DatagramCore::default(),
            ttl: config.multicast_ttl,
            group: None,
        }
    }
}

impl portsock_api::net::udp::UdpSocket for UdpMulticastClient {
    fn messages(&self) -> Subscription<Datagram> {
        self.core.subscribe()
    }

    fn dispose(&mut self) {
        self.group = None;
        self.core.dispose();
    }
}

impl portsock_api::net::udp::UdpMulticastClient for UdpMulticastClient {
    fn ttl(&self) -> u32 {
        self.ttl
    }

    fn set_ttl(&mut self, ttl: u32) {
        self.ttl = ttl;
    }

    fn active_ttl(&self) -> Result<u32> {
        self.core.ensure_not_disposed()?;
        let (Some(group), Some(socket)) = (self.group, self.core.socket()) else {
            return Err(StateError::NoGroupJoined.into());
        };
        let ttl = match group {
            SocketAddr::V4(_) => socket.multicast_ttl_v4(),
            SocketAddr::V6(_) => SockRef::from(socket).multicast_hops_v6(),
        };
        ttl.map_err(Normalize::normalize)
    }

    #[tracing::instrument(skip(self, interface), fields(interface = interface.map(InterfaceSummary::name)))]
    async fn join_group(
        &mut self,
        address: &str,
        port: u16,
        interface: Option<&InterfaceSummary>,
    ) -> Result<()> {
        self.core.ensure_not_disposed()?;
        let local = interface
            .map(InterfaceSummary::usable_address)
            .transpose()?;

        let group: IpAddr = address
            .parse()
            .map_err(|_| ArgumentError::InvalidAddress(address.to_owned()))?;
        if !group.is_multicast() {
            return Err(ArgumentError::NotMulticast(group).into());
        }
        if self.group.is_some() {
            return Err(StateError::GroupAlreadyJoined.into());
        }

        let ttl = self.ttl;
        let socket = match group {
            IpAddr::V4(group) => bind_socket(
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
                true,
                |socket| {
                    socket.set_multicast_ttl_v4(ttl)?;
                    socket.set_multicast_loop_v4(true)?;
                    if let Some(local) = local {
                        socket.set_multicast_if_v4(&local)?;
                    }
                    socket.join_multicast_v4(&group, &local.unwrap_or(Ipv4Addr::UNSPECIFIED))
                },
            )?,
            IpAddr::V6(group) => bind_socket(
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
                true,
                |socket| {
                    socket.set_multicast_hops_v6(ttl)?;
                    socket.set_multicast_loop_v6(true)?;
                    socket.join_multicast_v6(&group, 0)
                },
            )?,
        };

        self.core.attach(socket);
        self.group = Some(SocketAddr::new(group, port));
        tracing::debug!(ttl, "joined group");
        Ok(())
    }

    async fn send_to_group(&self, payload: &[u8]) -> Result<usize> {
        self.core.ensure_not_disposed()?;
        let group = self.group.ok_or(StateError::NoGroupJoined)?;
        self.core
            .send_to(payload, group, StateError::NoGroupJoined)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        if self.group.take().is_none() {
            return Ok(());
        }
        // Closing the socket leaves the group.
        self.core.close().await
    }

    fn group(&self) -> Option<SocketAddr> {
        self.group
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use portsock_api::Error;
    use portsock_api::net::udp::{UdpMulticastClient as _, UdpSocket as _};

    #[test]
    fn ttl_starts_from_the_configuration() {
        let client = UdpMulticastClient::with_config(SocketConfig::default().with_multicast_ttl(4));

        assert_eq!(client.ttl(), 4);
        assert_eq!(UdpMulticastClient::new().ttl(), 1);
    }

    #[tokio::test]
    async fn disposed_clients_cannot_join() {
        let mut client = UdpMulticastClient::new();
        client.dispose();

        assert!(matches!(
            client.join_group("239.255.42.9", 59209, None).await,
            Err(Error::State(StateError::Disposed))
        ));
        assert!(matches!(
            client.send_to_group(b"late").await,
            Err(Error::State(StateError::Disposed))
        ));
    }

    #[tokio::test]
    async fn disconnect_without_group_is_a_no_op() {
        let mut client = UdpMulticastClient::new();

        client.disconnect().await.unwrap();
        assert_eq!(client.group(), None);
    }
}
