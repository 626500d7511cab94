#![expect(missing_docs, reason = "test")]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use portsock_api::interface::{InterfaceProvider, InterfaceStatus, InterfaceSummary};
use embedded_io_async::Write as _;
use portsock_api::net::tcp::{TcpClient as _, TcpListener as _, test_suite};
use portsock_api::state::ConnectionState;
use portsock_api::{ConnectOptions, SocketConfig};
use portsock_std::net::listener::TcpListener;
use portsock_std::net::tcp::TcpClient;
use pretty_assertions::assert_eq;
use test_case::test_case;

/// Prints spans and events when `RUST_LOG` is set.
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

#[derive(Debug)]
struct StaticInterfaces(Vec<InterfaceSummary>);

impl InterfaceProvider for StaticInterfaces {
    fn interfaces(&self) -> portsock_api::Result<Vec<InterfaceSummary>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn tcp_connect_and_disconnect() {
    init_tracing();
    test_suite::test_connect_and_disconnect(TcpListener::new(), TcpClient::new()).await;
}

#[test_case(0 ; "unbuffered")]
#[test_case(1 ; "single byte buffer")]
#[test_case(8192 ; "large buffer")]
#[tokio::test]
async fn tcp_send_recv(write_buffer_size: usize) {
    let config = SocketConfig::default().with_write_buffer_size(write_buffer_size);
    test_suite::test_send_recv(
        TcpListener::with_config(config.clone()),
        TcpClient::with_config(config),
    )
    .await;
}

#[tokio::test]
async fn tcp_duplex_stream() {
    test_suite::test_duplex_stream(TcpListener::new(), TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_reconnect() {
    test_suite::test_reconnect(TcpListener::new(), TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_connect_twice() {
    test_suite::test_connect_twice(TcpListener::new(), TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_invalid_port() {
    test_suite::test_invalid_port(TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_unresolvable_host() {
    test_suite::test_unresolvable_host(TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_connect_refused() {
    test_suite::test_connect_refused(TcpListener::new(), TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_cancel_before_connect() {
    test_suite::test_cancel_before_connect(TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_cancel_during_handshake() {
    test_suite::test_cancel_during_handshake(TcpListener::new(), TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_timeout_during_handshake() {
    test_suite::test_timeout_during_handshake(TcpListener::new(), TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_stop_before_start() {
    test_suite::test_stop_before_start(TcpListener::new()).await;
}

#[tokio::test]
async fn tcp_listener_unusable_interface() {
    test_suite::test_listener_unusable_interface(TcpListener::new()).await;
}

#[tokio::test]
async fn tcp_listener_on_interface() {
    test_suite::test_listener_on_interface(TcpListener::new(), TcpClient::new(), &loopback())
        .await;
}

#[tokio::test]
async fn tcp_listener_reset() {
    test_suite::test_listener_reset(TcpListener::new()).await;
}

#[tokio::test]
async fn tcp_listener_fan_out() {
    test_suite::test_listener_fan_out(TcpListener::new(), TcpClient::new, 5).await;
}

#[tokio::test]
async fn tcp_accepted_connections_inherit_buffer_size() {
    let config = SocketConfig::default().with_write_buffer_size(512);
    test_suite::test_accepted_connections_inherit_buffer_size(
        TcpListener::with_config(config),
        TcpClient::new(),
    )
    .await;
}

#[tokio::test]
async fn tcp_buffered_writes_need_flush() {
    let config = SocketConfig::default().with_write_buffer_size(1024);
    test_suite::test_buffered_writes_need_flush(TcpListener::new(), TcpClient::with_config(config))
        .await;
}

#[tokio::test]
async fn tcp_no_delay() {
    test_suite::test_no_delay(TcpListener::new(), TcpClient::new()).await;
}

#[tokio::test]
async fn tcp_dispose() {
    test_suite::test_dispose(TcpListener::new(), TcpClient::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_duplex_throughput() {
    init_tracing();
    test_suite::test_duplex_throughput(
        TcpListener::new(),
        TcpClient::new(),
        Duration::from_millis(2500),
        5000,
    )
    .await;
}

#[tokio::test]
async fn tcp_connected_interface() {
    init_tracing();
    let interfaces = Arc::new(StaticInterfaces(vec![
        InterfaceSummary::new("2", "eth0", InterfaceStatus::Connected)
            .with_ip_address(Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(255, 255, 255, 0)),
        loopback(),
    ]));
    let mut listener = TcpListener::new();
    let mut incoming = listener.connections();
    listener.start_listening(0, None).await.unwrap();
    let port = listener.local_port().unwrap();

    let mut client = TcpClient::new().with_interface_provider(interfaces);
    assert!(client.connected_interface().is_err());

    client
        .connect("127.0.0.1", port, ConnectOptions::new())
        .await
        .unwrap();
    let _server = incoming.next_event().await.unwrap();

    let interface = client.connected_interface().unwrap().unwrap();
    assert_eq!(interface.name(), "lo");
    assert_eq!(client.remote_address().unwrap(), IpAddr::V4(Ipv4Addr::LOCALHOST));

    client.disconnect().await.unwrap();
    listener.stop_listening().await.unwrap();
}

#[tokio::test]
async fn tcp_disconnect_discards_unflushed_bytes() {
    let config = SocketConfig::default().with_write_buffer_size(64 * 1024 * 1024);
    let mut listener = TcpListener::new();
    let mut incoming = listener.connections();
    listener.start_listening(0, None).await.unwrap();
    let port = listener.local_port().unwrap();

    let mut client = TcpClient::with_config(config);
    client
        .connect("127.0.0.1", port, ConnectOptions::new())
        .await
        .unwrap();
    // Never reads, so nothing buffered could drain.
    let _server = incoming.next_event().await.unwrap();

    let payload = vec![0x5a; 32 * 1024 * 1024];
    client.write_stream().unwrap().write_all(&payload).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), client.disconnect())
        .await
        .expect("disconnect waited for the peer")
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Unconnected);

    client
        .connect("127.0.0.1", port, ConnectOptions::new())
        .await
        .unwrap();
    client.disconnect().await.unwrap();
    listener.stop_listening().await.unwrap();
}

#[tokio::test]
async fn tcp_connect_falls_back_across_resolved_addresses() {
    // `localhost` may resolve to `::1` first while the listener only binds IPv4.
    let mut listener = TcpListener::new();
    let mut incoming = listener.connections();
    listener.start_listening(0, None).await.unwrap();
    let port = listener.local_port().unwrap();

    let mut client = TcpClient::new();
    client
        .connect("localhost", port, ConnectOptions::new())
        .await
        .unwrap();
    let _server = incoming.next_event().await.unwrap();

    assert_eq!(client.remote_address().unwrap(), IpAddr::V4(Ipv4Addr::LOCALHOST));

    client.disconnect().await.unwrap();
    listener.stop_listening().await.unwrap();
}
