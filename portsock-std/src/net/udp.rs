//! UDP sockets for the std platform.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use portsock_api::events::{Publisher, Subscription};
use portsock_api::interface::InterfaceSummary;
use portsock_api::net::udp::Datagram;
use portsock_api::{Normalize, Result, Service, StateError};
use socket2::{Domain, Protocol, SockAddr, Type};
use tokio_util::sync::CancellationToken;

use crate::net::{BackgroundLoop, resolve};

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Binds a UDP socket, optionally shared with other sockets on the same port.
///
/// `configure` runs on the bound socket before it is handed to tokio.
pub(crate) fn bind_socket(
    address: SocketAddr,
    reuse: bool,
    configure: impl FnOnce(&socket2::Socket) -> io::Result<()>,
) -> Result<tokio::net::UdpSocket> {
    let open = || -> io::Result<tokio::net::UdpSocket> {
        let socket = socket2::Socket::new(
            Domain::for_address(address),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;

        if reuse {
            // Neither Tokio nor the standard library expose `SO_REUSEADDR` and `SO_REUSEPORT`
            // for UDP sockets.
            socket.set_reuse_address(true)?;
            #[cfg(unix)]
            socket.set_reuse_port(true)?;
        }
        socket.set_nonblocking(true)?;

        let socket2_addr: SockAddr = address.into();
        socket.bind(&socket2_addr)?;
        configure(&socket)?;

        tokio::net::UdpSocket::from_std(socket.into())
    };
    open().map_err(Normalize::normalize)
}

/// The unspecified address of `peer`'s family with an ephemeral port.
fn ephemeral_for(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

/// Publishes every received datagram until `shutdown` fires or receiving fails.
async fn receive_loop(
    socket: Arc<tokio::net::UdpSocket>,
    publisher: Publisher<Datagram>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    let outcome: Result<()> = async {
        loop {
            let received = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                received = socket.recv_from(&mut buffer) => received,
            };
            let (length, remote) = received.map_err(Normalize::normalize)?;

            let reached = publisher.broadcast(Datagram {
                remote_address: remote.ip(),
                remote_port: remote.port(),
                payload: buffer[..length].to_vec(),
            });
            tracing::trace!(%remote, length, reached, "received datagram");
        }
    }
    .await;

    if let Err(error) = &outcome {
        tracing::warn!(?error, "receive loop failed");
        publisher.close();
    }
    outcome
}

/// Socket, receive loop and subscriptions shared by every UDP role.
#[derive(Debug, Default)]
pub(crate) struct DatagramCore {
    socket: Option<Arc<tokio::net::UdpSocket>>,
    publisher: Publisher<Datagram>,
    receive_loop: Option<BackgroundLoop>,
    disposed: bool,
}

impl DatagramCore {
    /// Takes ownership of `socket` and starts receiving on it.
    pub(crate) fn attach(&mut self, socket: tokio::net::UdpSocket) {
        let socket = Arc::new(socket);
        let receiving = Arc::clone(&socket);
        let publisher = self.publisher.clone();
        self.receive_loop = Some(BackgroundLoop::spawn(|shutdown| {
            receive_loop(receiving, publisher, shutdown)
        }));
        self.socket = Some(socket);
    }

    /// Stops receiving and releases the socket.
    ///
    /// Returns the failure the receive loop ended with, if any.
    pub(crate) async fn close(&mut self) -> Result<()> {
        let outcome = match self.receive_loop.take() {
            Some(receive_loop) => receive_loop.stop().await,
            None => Ok(()),
        };
        self.socket = None;
        outcome
    }

    pub(crate) fn dispose(&mut self) {
        self.receive_loop = None;
        self.socket = None;
        self.publisher.close();
        self.disposed = true;
    }

    pub(crate) fn ensure_not_disposed(&self) -> core::result::Result<(), StateError> {
        if self.disposed {
            return Err(StateError::Disposed);
        }
        Ok(())
    }

    pub(crate) fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub(crate) fn socket(&self) -> Option<&tokio::net::UdpSocket> {
        self.socket.as_deref()
    }

    pub(crate) fn local_address(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()
    }

    pub(crate) fn subscribe(&self) -> Subscription<Datagram> {
        self.publisher.subscribe()
    }

    /// Sends through the open socket.
    pub(crate) async fn send_to(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        closed: StateError,
    ) -> Result<usize> {
        self.ensure_not_disposed()?;
        let socket = self.socket().ok_or(closed)?;
        socket
            .send_to(payload, destination)
            .await
            .map_err(Normalize::normalize)
    }
}

impl Drop for DatagramCore {
    fn drop(&mut self) {
        self.publisher.close();
    }
}

/// UDP socket with a default remote peer.
#[derive(Debug, Default)]
pub struct UdpClient {
    core: DatagramCore,
    peer: Option<SocketAddr>,
}

impl UdpClient {
    /// Creates a client without a peer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl portsock_api::net::udp::UdpSocket for UdpClient {
    fn messages(&self) -> Subscription<Datagram> {
        self.core.subscribe()
    }

    fn dispose(&mut self) {
        self.peer = None;
        self.core.dispose();
    }
}

impl portsock_api::net::udp::UdpClient for UdpClient {
    #[tracing::instrument(skip_all, fields(address = %address))]
    async fn connect(&mut self, address: &str, service: impl Into<Service>) -> Result<()> {
        let port = service.into().resolve_port()?;
        self.core.ensure_not_disposed()?;
        if self.peer.is_some() {
            return Err(StateError::AlreadyConnected.into());
        }

        let peer = resolve(address, port, false).await?;
        let socket = bind_socket(ephemeral_for(peer), false, |_| Ok(()))?;
        self.core.attach(socket);
        self.peer = Some(peer);

        tracing::debug!(%peer, "default peer set");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        if self.peer.take().is_none() {
            return Ok(());
        }
        self.core.close().await
    }

    async fn send(&self, payload: &[u8]) -> Result<usize> {
        self.core.ensure_not_disposed()?;
        let peer = self.peer.ok_or(StateError::NoDefaultPeer)?;
        self.core
            .send_to(payload, peer, StateError::NoDefaultPeer)
            .await
    }

    async fn send_to(
        &self,
        payload: &[u8],
        address: &str,
        service: impl Into<Service>,
    ) -> Result<usize> {
        let port = service.into().resolve_port()?;
        self.core.ensure_not_disposed()?;
        if !self.core.is_open() {
            return Err(StateError::NotConnected.into());
        }

        let prefer_ipv4 = self.peer.is_some_and(|peer| peer.is_ipv4());
        let destination = resolve(address, port, prefer_ipv4).await?;
        self.core
            .send_to(payload, destination, StateError::NotConnected)
            .await
    }

    fn remote_peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn local_address(&self) -> Result<SocketAddr> {
        self.core
            .local_address()
            .ok_or_else(|| StateError::NotConnected.into())
    }
}

/// UDP socket bound to a local port.
#[derive(Debug, Default)]
pub struct UdpReceiver {
    core: DatagramCore,
}

impl UdpReceiver {
    /// Creates an unbound receiver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl portsock_api::net::udp::UdpSocket for UdpReceiver {
    fn messages(&self) -> Subscription<Datagram> {
        self.core.subscribe()
    }

    fn dispose(&mut self) {
        self.core.dispose();
    }
}

impl portsock_api::net::udp::UdpReceiver for UdpReceiver {
    #[tracing::instrument(skip(self, interface), fields(interface = interface.map(InterfaceSummary::name)))]
    async fn start_listening(
        &mut self,
        port: u16,
        interface: Option<&InterfaceSummary>,
    ) -> Result<()> {
        let address = match interface {
            Some(interface) => interface.usable_address()?,
            None => Ipv4Addr::UNSPECIFIED,
        };
        self.core.ensure_not_disposed()?;
        if self.core.is_open() {
            return Err(StateError::AlreadyListening.into());
        }

        let socket = bind_socket(SocketAddr::from((address, port)), false, |_| Ok(()))?;
        self.core.attach(socket);

        tracing::debug!(local_address = ?self.core.local_address(), "listening");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn stop_listening(&mut self) -> Result<()> {
        self.core.ensure_not_disposed()?;
        if !self.core.is_open() {
            return Err(StateError::NotListening.into());
        }
        self.core.close().await
    }

    fn is_listening(&self) -> bool {
        self.core.is_open()
    }

    fn local_port(&self) -> Result<u16> {
        self.core.ensure_not_disposed()?;
        self.core
            .local_address()
            .map(|address| address.port())
            .ok_or_else(|| StateError::NotListening.into())
    }

    async fn send_to(
        &self,
        payload: &[u8],
        address: &str,
        service: impl Into<Service>,
    ) -> Result<usize> {
        let port = service.into().resolve_port()?;
        self.core.ensure_not_disposed()?;

        let bound_ipv4 = self
            .core
            .local_address()
            .is_none_or(|local| local.is_ipv4());
        let destination = resolve(address, port, bound_ipv4).await?;

        if self.core.is_open() {
            return self
                .core
                .send_to(payload, destination, StateError::NotListening)
                .await;
        }

        let temporary = tokio::net::UdpSocket::bind(ephemeral_for(destination))
            .await
            .map_err(Normalize::normalize)?;
        temporary
            .send_to(payload, destination)
            .await
            .map_err(Normalize::normalize)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use portsock_api::Error;
    use portsock_api::net::udp::{UdpReceiver as _, UdpSocket as _};

    #[tokio::test]
    async fn shared_ports_need_reuse_on_both_sockets() {
        let first = bind_socket(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), true, |_| Ok(())).unwrap();
        let port = first.local_addr().unwrap().port();

        bind_socket(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), true, |_| Ok(())).unwrap();
        let exclusive = bind_socket(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), false, |_| Ok(()));

        assert!(matches!(exclusive, Err(Error::Socket(_))));
    }

    #[tokio::test]
    async fn receive_loop_failure_ends_subscriptions() {
        let socket = Arc::new(tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let publisher = Publisher::new();
        let mut datagrams = publisher.subscribe();

        // Receiving into a connected socket whose peer is gone surfaces the ICMP error.
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_address = peer.local_addr().unwrap();
        drop(peer);
        socket.connect(peer_address).await.unwrap();
        socket.send(b"into the void").await.unwrap();

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            receive_loop(socket, publisher, CancellationToken::new()),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, Err(Error::Socket(_))));
        assert_eq!(datagrams.next_event().await, None);
    }

    #[tokio::test]
    async fn disposed_receivers_reject_everything() {
        let mut receiver = UdpReceiver::new();
        let mut messages = receiver.messages();

        receiver.dispose();

        assert_eq!(messages.next_event().await, None);
        assert!(matches!(
            receiver.local_port(),
            Err(Error::State(StateError::Disposed))
        ));
        assert!(matches!(
            receiver.send_to(b"late", "127.0.0.1", 9).await,
            Err(Error::State(StateError::Disposed))
        ));
    }
}
