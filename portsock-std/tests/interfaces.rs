#![expect(missing_docs, reason = "test")]

use std::net::{IpAddr, Ipv4Addr};

use portsock_api::interface::InterfaceProvider;
use portsock_std::interface::NetdevInterfaces;

#[test]
fn enumerates_the_loopback_interface() {
    let interfaces = NetdevInterfaces.interfaces().unwrap();

    let loopback = interfaces
        .iter()
        .find(|interface| interface.is_loopback())
        .expect("every host has a loopback interface");
    assert!(loopback.is_usable());
    assert_eq!(loopback.ip_address(), Some(Ipv4Addr::LOCALHOST));
}

#[test]
fn finds_the_interface_owning_an_address() {
    let found = NetdevInterfaces
        .interface_for(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .unwrap()
        .unwrap();

    assert!(found.is_loopback());
    assert_eq!(
        NetdevInterfaces
            .interface_for(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 77)))
            .unwrap(),
        None
    );
}

#[test]
fn usable_interfaces_have_a_broadcast_address() {
    for interface in NetdevInterfaces.interfaces().unwrap() {
        if interface.is_usable() {
            assert!(interface.broadcast_address().is_some(), "{interface:?}");
        }
    }
}
