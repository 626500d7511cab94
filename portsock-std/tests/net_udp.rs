#![expect(missing_docs, reason = "test")]

use std::net::Ipv4Addr;

use portsock_api::SocketConfig;
use portsock_api::interface::{InterfaceStatus, InterfaceSummary};
use portsock_api::net::udp::test_suite;
use portsock_std::net::multicast::UdpMulticastClient;
use portsock_std::net::udp::{UdpClient, UdpReceiver};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn loopback() -> InterfaceSummary {
    InterfaceSummary::new("1", "lo", InterfaceStatus::Connected)
        .with_ip_address(Ipv4Addr::LOCALHOST, Ipv4Addr::new(255, 0, 0, 0))
}

#[tokio::test]
async fn udp_receiver_send_recv() {
    test_suite::test_receiver_send_recv(UdpReceiver::new(), UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_send_to_without_bind() {
    test_suite::test_send_to_without_bind(UdpReceiver::new(), UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_receiver_lifecycle() {
    test_suite::test_receiver_lifecycle(UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_receiver_unusable_interface() {
    test_suite::test_receiver_unusable_interface(UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_receiver_on_interface() {
    test_suite::test_receiver_on_interface(UdpReceiver::new(), UdpReceiver::new(), &loopback())
        .await;
}

#[tokio::test]
async fn udp_send_to_invalid_port() {
    test_suite::test_send_to_invalid_port(UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_every_subscription_receives() {
    test_suite::test_every_subscription_receives(UdpReceiver::new(), UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_receiver_dispose() {
    test_suite::test_receiver_dispose(UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_client_default_peer() {
    init_tracing();
    test_suite::test_client_default_peer(UdpClient::new(), UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_client_send_to() {
    test_suite::test_client_send_to(UdpClient::new(), UdpReceiver::new()).await;
}

#[tokio::test]
async fn udp_client_send_without_peer() {
    test_suite::test_client_send_without_peer(UdpClient::new()).await;
}

#[tokio::test]
async fn udp_client_invalid_port() {
    test_suite::test_client_invalid_port(UdpClient::new()).await;
}

#[tokio::test]
async fn udp_interleaved_messages() {
    test_suite::test_interleaved_messages(UdpReceiver::new(), UdpReceiver::new()).await;
}

#[tokio::test]
async fn multicast_send_without_group() {
    test_suite::test_multicast_send_without_group(UdpMulticastClient::new()).await;
}

#[tokio::test]
async fn multicast_rejects_unicast() {
    test_suite::test_multicast_rejects_unicast(UdpMulticastClient::new()).await;
}

#[tokio::test]
async fn multicast_unusable_interface() {
    test_suite::test_multicast_unusable_interface(UdpMulticastClient::new()).await;
}

#[tokio::test]
async fn multicast_ttl_fixed_at_join() {
    init_tracing();
    test_suite::test_multicast_ttl_fixed_at_join(UdpMulticastClient::new(), &loopback()).await;
}

// Multicast over loopback needs a route for 224.0.0.0/4, which CI containers often lack.
#[tokio::test]
#[ignore]
async fn multicast_round_trip() {
    let config = SocketConfig::default().with_multicast_ttl(2);
    test_suite::test_multicast_round_trip(
        UdpMulticastClient::with_config(config.clone()),
        UdpMulticastClient::with_config(config),
        &loopback(),
    )
    .await;
}
