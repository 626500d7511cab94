//! Host interface enumeration on netdev.

use portsock_api::Result;
use portsock_api::interface::{
    InterfaceProvider, InterfaceSummary, OperationalStatus, netmask_from_prefix,
};

/// Enumerates host interfaces through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetdevInterfaces;

impl InterfaceProvider for NetdevInterfaces {
    fn interfaces(&self) -> Result<Vec<InterfaceSummary>> {
        let summaries: Vec<InterfaceSummary> =
            netdev::get_interfaces().iter().map(summarize).collect();
        tracing::trace!(count = summaries.len(), "enumerated interfaces");
        Ok(summaries)
    }
}

/// Derives the operational status from the interface flags.
fn operational_status(interface: &netdev::Interface) -> OperationalStatus {
    match (interface.is_up(), interface.is_running()) {
        (false, _) => OperationalStatus::Down,
        (true, true) => OperationalStatus::Up,
        // Administratively up without carrier.
        (true, false) => OperationalStatus::LowerLayerDown,
    }
}

fn summarize(interface: &netdev::Interface) -> InterfaceSummary {
    let mut summary = InterfaceSummary::new(
        interface.index.to_string(),
        interface.name.clone(),
        operational_status(interface).into(),
    );

    if let Some(network) = interface.ipv4.first() {
        summary = summary.with_ip_address(network.addr(), netmask_from_prefix(network.prefix_len()));
    }
    let gateway = interface
        .gateway
        .as_ref()
        .and_then(|gateway| gateway.ipv4.first().copied());
    if let Some(gateway) = gateway {
        summary = summary.with_gateway_address(gateway);
    }
    summary
}
