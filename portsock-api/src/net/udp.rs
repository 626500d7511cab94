//! UDP socket abstractions.
//!
//! Three roles share the datagram machinery of [`UdpSocket`]: a [`UdpClient`] with a default
//! peer, a [`UdpReceiver`] bound to a local port and a [`UdpMulticastClient`] joined to a group.
//! Received datagrams are published to every [subscription](UdpSocket::messages).

use core::fmt::Debug;
use std::net::{IpAddr, SocketAddr};

use crate::events::Subscription;
use crate::interface::InterfaceSummary;
use crate::{Result, Service};

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Datagram {
    /// Address of the sender.
    pub remote_address: IpAddr,
    /// Port of the sender.
    pub remote_port: u16,
    /// Datagram content.
    pub payload: Vec<u8>,
}

/// Behavior shared by every UDP role.
pub trait UdpSocket: Debug {
    /// Subscribes to received datagrams.
    ///
    /// Every live subscription receives every datagram, in arrival order.
    /// Subscriptions end when receiving fails or the socket is disposed.
    fn messages(&self) -> Subscription<Datagram>;

    /// Releases every resource.
    ///
    /// Idempotent; also performed on drop.
    fn dispose(&mut self);
}

/// UDP socket with a default remote peer.
///
/// # Example
///
/// ```no_run
/// use portsock_api::net::udp::{UdpClient, UdpSocket};
///
/// async fn query_time(mut client: impl UdpClient) -> portsock_api::Result<Vec<u8>> {
///     let mut replies = client.messages();
///     client.connect("time.example.com", "ntp").await?;
///     client.send(&[0x1b; 48]).await?;
///     let reply = replies.next_event().await;
///     client.disconnect().await?;
///     Ok(reply.map(|datagram| datagram.payload).unwrap_or_default())
/// }
/// ```
#[expect(async_fn_in_trait)]
pub trait UdpClient: UdpSocket {
    /// Resolves and records the default peer.
    ///
    /// Binds an ephemeral local port and starts receiving replies; sends nothing.
    async fn connect(&mut self, address: &str, service: impl Into<Service>) -> Result<()>;

    /// Clears the default peer and releases the socket.
    async fn disconnect(&mut self) -> Result<()>;

    /// Sends a datagram to the default peer.
    ///
    /// Returns the number of bytes sent.
    async fn send(&self, payload: &[u8]) -> Result<usize>;

    /// Sends a datagram to any peer.
    ///
    /// Needs the socket opened by [`UdpClient::connect`].
    async fn send_to(
        &self,
        payload: &[u8],
        address: &str,
        service: impl Into<Service>,
    ) -> Result<usize>;

    /// Returns the default peer.
    fn remote_peer(&self) -> Option<SocketAddr>;

    /// Returns the local address of the socket.
    fn local_address(&self) -> Result<SocketAddr>;
}

/// UDP socket bound to a local port.
///
/// # Example
///
/// ```no_run
/// use portsock_api::net::udp::{UdpReceiver, UdpSocket};
///
/// async fn echo(mut receiver: impl UdpReceiver) -> portsock_api::Result<()> {
///     let mut messages = receiver.messages();
///     receiver.start_listening(7, None).await?;
///     while let Some(datagram) = messages.next_event().await {
///         let peer = datagram.remote_address.to_string();
///         receiver.send_to(&datagram.payload, &peer, datagram.remote_port).await?;
///     }
///     receiver.stop_listening().await
/// }
/// ```
#[expect(async_fn_in_trait)]
pub trait UdpReceiver: UdpSocket {
    /// Binds `port` and starts receiving.
    ///
    /// Port `0` lets the platform choose; see [`UdpReceiver::local_port`].
    async fn start_listening(&mut self, port: u16, interface: Option<&InterfaceSummary>)
    -> Result<()>;

    /// Stops receiving and releases the port.
    ///
    /// Returns the failure the receive loop ended with, if any.
    async fn stop_listening(&mut self) -> Result<()>;

    /// Returns whether the receiver is bound.
    fn is_listening(&self) -> bool;

    /// Returns the bound port while listening.
    fn local_port(&self) -> Result<u16>;

    /// Sends a datagram to any peer.
    ///
    /// Without a bound port a temporary socket is used and released after the send.
    async fn send_to(
        &self,
        payload: &[u8],
        address: &str,
        service: impl Into<Service>,
    ) -> Result<usize>;
}

/// UDP socket joined to a multicast group.
///
/// The TTL must be set before [`UdpMulticastClient::join_group`]; later changes only take
/// effect at the next join.
#[expect(async_fn_in_trait)]
pub trait UdpMulticastClient: UdpSocket {
    /// Returns the TTL applied at the next join.
    fn ttl(&self) -> u32;

    /// Sets the TTL applied at the next join.
    fn set_ttl(&mut self, ttl: u32);

    /// Returns the TTL of the joined socket.
    fn active_ttl(&self) -> Result<u32>;

    /// Binds `port` with address reuse and joins the group at `address`.
    ///
    /// Joins on `interface` if given, otherwise on the platform's default interface.
    async fn join_group(
        &mut self,
        address: &str,
        port: u16,
        interface: Option<&InterfaceSummary>,
    ) -> Result<()>;

    /// Sends a datagram to the joined group.
    async fn send_to_group(&self, payload: &[u8]) -> Result<usize>;

    /// Leaves the group and releases the socket.
    async fn disconnect(&mut self) -> Result<()>;

    /// Returns the joined group.
    fn group(&self) -> Option<SocketAddr>;
}

#[doc(hidden)]
#[cfg(feature = "test-suites")]
#[cfg_attr(coverage_nightly, coverage(off))]
pub mod test_suite {
    #![expect(missing_docs, reason = "tests")]
    //! Test suite for UDP sockets.

    use core::time::Duration;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use crate::events::Subscription;
    use crate::interface::{InterfaceStatus, InterfaceSummary};
    use crate::net::udp::{Datagram, UdpClient, UdpMulticastClient, UdpReceiver, UdpSocket};
    use crate::{ArgumentError, Error, StateError};

    const LOCALHOST: &str = "127.0.0.1";

    async fn next(messages: &mut Subscription<Datagram>) -> Datagram {
        tokio::time::timeout(Duration::from_secs(5), messages.next_event())
            .await
            .expect("no datagram within 5 seconds")
            .expect("the receive loop ended")
    }

    pub async fn test_receiver_send_recv(
        mut receiver1: impl UdpReceiver,
        mut receiver2: impl UdpReceiver,
    ) {
        let mut messages1 = receiver1.messages();
        let mut messages2 = receiver2.messages();
        receiver1.start_listening(0, None).await.unwrap();
        receiver2.start_listening(0, None).await.unwrap();
        let port1 = receiver1.local_port().unwrap();
        let port2 = receiver2.local_port().unwrap();
        assert_ne!(port1, 0, "port should be automatically assigned");

        let sent = receiver1.send_to(b"Hello, UDP!", LOCALHOST, port2).await.unwrap();
        assert_eq!(sent, 11);

        let datagram = next(&mut messages2).await;
        assert_eq!(datagram.payload, b"Hello, UDP!");
        assert_eq!(datagram.remote_port, port1);
        assert!(datagram.remote_address.is_loopback());

        let peer = datagram.remote_address.to_string();
        receiver2
            .send_to(b"Hello back!", &peer, datagram.remote_port)
            .await
            .unwrap();

        let datagram = next(&mut messages1).await;
        assert_eq!(datagram.payload, b"Hello back!");
        assert_eq!(datagram.remote_port, port2);

        receiver1.stop_listening().await.unwrap();
        receiver2.stop_listening().await.unwrap();
    }

    pub async fn test_send_to_without_bind(
        sender: impl UdpReceiver,
        mut receiver: impl UdpReceiver,
    ) {
        let mut messages = receiver.messages();
        receiver.start_listening(0, None).await.unwrap();
        let port = receiver.local_port().unwrap();

        assert!(!sender.is_listening());
        sender.send_to(b"one-off", LOCALHOST, port).await.unwrap();

        let datagram = next(&mut messages).await;
        assert_eq!(datagram.payload, b"one-off");
        assert_ne!(datagram.remote_port, 0);
        assert!(!sender.is_listening());

        receiver.stop_listening().await.unwrap();
    }

    pub async fn test_receiver_lifecycle(mut receiver: impl UdpReceiver) {
        assert!(matches!(
            receiver.stop_listening().await,
            Err(Error::State(StateError::NotListening))
        ));
        assert!(matches!(
            receiver.local_port(),
            Err(Error::State(StateError::NotListening))
        ));

        receiver.start_listening(0, None).await.unwrap();
        assert!(receiver.is_listening());
        assert!(matches!(
            receiver.start_listening(0, None).await,
            Err(Error::State(StateError::AlreadyListening))
        ));

        receiver.stop_listening().await.unwrap();
        assert!(!receiver.is_listening());

        // Receivers may listen again after a stop.
        receiver.start_listening(0, None).await.unwrap();
        receiver.stop_listening().await.unwrap();
    }

    pub async fn test_receiver_unusable_interface(mut receiver: impl UdpReceiver) {
        let interface = InterfaceSummary::new("99", "down0", InterfaceStatus::Disconnected);

        assert!(matches!(
            receiver.start_listening(0, Some(&interface)).await,
            Err(Error::State(StateError::InterfaceNotUsable(_)))
        ));
        assert!(!receiver.is_listening());
    }

    pub async fn test_receiver_on_interface(
        mut receiver: impl UdpReceiver,
        sender: impl UdpReceiver,
        interface: &InterfaceSummary,
    ) {
        let address = interface.ip_address().unwrap();
        let mut messages = receiver.messages();
        receiver.start_listening(0, Some(interface)).await.unwrap();
        let port = receiver.local_port().unwrap();

        sender
            .send_to(b"bound", &address.to_string(), port)
            .await
            .unwrap();
        assert_eq!(next(&mut messages).await.payload, b"bound");

        receiver.stop_listening().await.unwrap();
    }

    pub async fn test_send_to_invalid_port(receiver: impl UdpReceiver) {
        assert!(matches!(
            receiver.send_to(b"nowhere", LOCALHOST, 0).await,
            Err(Error::Argument(ArgumentError::InvalidPort(0)))
        ));
        assert!(matches!(
            receiver.send_to(b"nowhere", LOCALHOST, 70000).await,
            Err(Error::Argument(ArgumentError::InvalidPort(70000)))
        ));
    }

    pub async fn test_client_default_peer(
        mut client: impl UdpClient,
        mut receiver: impl UdpReceiver,
    ) {
        let mut inbox = receiver.messages();
        let mut replies = client.messages();
        receiver.start_listening(0, None).await.unwrap();
        let port = receiver.local_port().unwrap();

        client.connect(LOCALHOST, port).await.unwrap();
        assert_eq!(
            client.remote_peer(),
            Some(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        );

        client.send(b"request").await.unwrap();
        let datagram = next(&mut inbox).await;
        assert_eq!(datagram.payload, b"request");
        assert_eq!(
            datagram.remote_port,
            client.local_address().unwrap().port()
        );

        let peer = datagram.remote_address.to_string();
        receiver
            .send_to(b"reply", &peer, datagram.remote_port)
            .await
            .unwrap();
        let reply = next(&mut replies).await;
        assert_eq!(reply.payload, b"reply");
        assert_eq!(reply.remote_port, port);

        client.disconnect().await.unwrap();
        assert_eq!(client.remote_peer(), None);
        assert!(matches!(
            client.send(b"late").await,
            Err(Error::State(StateError::NoDefaultPeer))
        ));

        receiver.stop_listening().await.unwrap();
    }

    pub async fn test_client_send_to(mut client: impl UdpClient, mut receiver: impl UdpReceiver) {
        let mut inbox = receiver.messages();
        receiver.start_listening(0, None).await.unwrap();
        let port = receiver.local_port().unwrap();

        assert!(matches!(
            client.send_to(b"early", LOCALHOST, port).await,
            Err(Error::State(StateError::NotConnected))
        ));

        // The default peer does not restrict explicit destinations.
        client.connect(LOCALHOST, 9).await.unwrap();
        client.send_to(b"explicit", LOCALHOST, port).await.unwrap();
        assert_eq!(next(&mut inbox).await.payload, b"explicit");

        client.disconnect().await.unwrap();
        receiver.stop_listening().await.unwrap();
    }

    pub async fn test_client_send_without_peer(client: impl UdpClient) {
        assert!(matches!(
            client.send(b"nobody").await,
            Err(Error::State(StateError::NoDefaultPeer))
        ));
        assert!(client.local_address().is_err());
    }

    pub async fn test_client_invalid_port(mut client: impl UdpClient) {
        assert!(matches!(
            client.connect(LOCALHOST, 2147483647).await,
            Err(Error::Argument(ArgumentError::InvalidPort(2147483647)))
        ));
        assert_eq!(client.remote_peer(), None);
    }

    pub async fn test_interleaved_messages(
        mut receiver1: impl UdpReceiver,
        mut receiver2: impl UdpReceiver,
    ) {
        let mut messages1 = receiver1.messages();
        let mut messages2 = receiver2.messages();
        receiver1.start_listening(0, None).await.unwrap();
        receiver2.start_listening(0, None).await.unwrap();
        let port1 = receiver1.local_port().unwrap();
        let port2 = receiver2.local_port().unwrap();

        for index in 0..5u8 {
            receiver1.send_to(&[1, index], LOCALHOST, port2).await.unwrap();
            receiver2.send_to(&[2, index], LOCALHOST, port1).await.unwrap();
        }

        let mut at1 = Vec::new();
        let mut at2 = Vec::new();
        for _ in 0..5 {
            at1.push(next(&mut messages1).await.payload);
            at2.push(next(&mut messages2).await.payload);
        }
        at1.sort();
        at2.sort();
        assert_eq!(at1, (0..5u8).map(|index| vec![2, index]).collect::<Vec<_>>());
        assert_eq!(at2, (0..5u8).map(|index| vec![1, index]).collect::<Vec<_>>());

        receiver1.stop_listening().await.unwrap();
        receiver2.stop_listening().await.unwrap();
    }

    pub async fn test_every_subscription_receives(
        mut receiver: impl UdpReceiver,
        sender: impl UdpReceiver,
    ) {
        let mut first = receiver.messages();
        let mut second = receiver.messages();
        let third = receiver.messages();
        third.unsubscribe();

        receiver.start_listening(0, None).await.unwrap();
        let port = receiver.local_port().unwrap();
        sender.send_to(b"fan", LOCALHOST, port).await.unwrap();

        assert_eq!(next(&mut first).await.payload, b"fan");
        assert_eq!(next(&mut second).await.payload, b"fan");

        receiver.stop_listening().await.unwrap();
    }

    pub async fn test_receiver_dispose(mut receiver: impl UdpReceiver) {
        receiver.start_listening(0, None).await.unwrap();

        receiver.dispose();
        receiver.dispose();
        assert!(!receiver.is_listening());
        assert!(matches!(
            receiver.start_listening(0, None).await,
            Err(Error::State(StateError::Disposed))
        ));
    }

    pub async fn test_multicast_send_without_group(multicast: impl UdpMulticastClient) {
        assert_eq!(multicast.group(), None);
        assert!(matches!(
            multicast.send_to_group(b"hello").await,
            Err(Error::State(StateError::NoGroupJoined))
        ));
        assert!(matches!(
            multicast.active_ttl(),
            Err(Error::State(StateError::NoGroupJoined))
        ));
    }

    pub async fn test_multicast_rejects_unicast(mut multicast: impl UdpMulticastClient) {
        assert!(matches!(
            multicast.join_group("10.0.0.1", 59200, None).await,
            Err(Error::Argument(ArgumentError::NotMulticast(_)))
        ));
        assert!(matches!(
            multicast.join_group("not-an-address", 59200, None).await,
            Err(Error::Argument(ArgumentError::InvalidAddress(_)))
        ));
        assert_eq!(multicast.group(), None);
    }

    pub async fn test_multicast_unusable_interface(mut multicast: impl UdpMulticastClient) {
        let interface = InterfaceSummary::new("99", "down0", InterfaceStatus::Disconnected);

        assert!(matches!(
            multicast
                .join_group("239.255.42.1", 59201, Some(&interface))
                .await,
            Err(Error::State(StateError::InterfaceNotUsable(_)))
        ));
        assert_eq!(multicast.group(), None);
    }

    pub async fn test_multicast_ttl_fixed_at_join(
        mut multicast: impl UdpMulticastClient,
        interface: &InterfaceSummary,
    ) {
        assert_eq!(multicast.ttl(), 1);
        multicast.set_ttl(3);

        multicast
            .join_group("239.255.42.2", 59202, Some(interface))
            .await
            .unwrap();
        assert_eq!(
            multicast.group(),
            Some(SocketAddr::from((Ipv4Addr::new(239, 255, 42, 2), 59202)))
        );
        assert_eq!(multicast.active_ttl().unwrap(), 3);

        multicast.set_ttl(9);
        assert_eq!(multicast.ttl(), 9);
        assert_eq!(multicast.active_ttl().unwrap(), 3);

        assert!(matches!(
            multicast
                .join_group("239.255.42.3", 59203, Some(interface))
                .await,
            Err(Error::State(StateError::GroupAlreadyJoined))
        ));

        // A new join applies the new TTL.
        multicast.disconnect().await.unwrap();
        assert_eq!(multicast.group(), None);
        multicast
            .join_group("239.255.42.2", 59202, Some(interface))
            .await
            .unwrap();
        assert_eq!(multicast.active_ttl().unwrap(), 9);

        multicast.disconnect().await.unwrap();
    }

    pub async fn test_multicast_round_trip(
        mut member1: impl UdpMulticastClient,
        mut member2: impl UdpMulticastClient,
        interface: &InterfaceSummary,
    ) {
        let group = "239.255.42.4";
        let mut messages2 = member2.messages();
        member1.join_group(group, 59204, Some(interface)).await.unwrap();
        member2.join_group(group, 59204, Some(interface)).await.unwrap();

        member1.send_to_group(b"to the group").await.unwrap();

        let datagram = next(&mut messages2).await;
        assert_eq!(datagram.payload, b"to the group");
        assert_eq!(datagram.remote_address, IpAddr::V4(interface.ip_address().unwrap()));

        member1.disconnect().await.unwrap();
        member2.disconnect().await.unwrap();
    }
}
