//! TCP connection and listener abstractions.
//!
//! To get started, see [`TcpClient`] and [`TcpListener`].

use core::fmt::Debug;
use std::net::{IpAddr, SocketAddr};

use crate::events::Subscription;
use crate::interface::InterfaceSummary;
use crate::state::{ConnectionState, ListenerState};
use crate::{ConnectOptions, Error, Result, Service};

/// One TCP connection with independent read and write streams.
///
/// A client starts unconnected; connections handed out by a [`TcpListener`] start connected.
/// After [`TcpClient::disconnect`] the same instance can connect again.
///
/// # Example
///
/// ```no_run
/// use embedded_io_async::{Read, Write};
/// use portsock_api::ConnectOptions;
/// use portsock_api::net::tcp::TcpClient;
///
/// async fn fetch(mut client: impl TcpClient) -> portsock_api::Result<()> {
///     client.connect("example.com", "https", ConnectOptions::new().secure()).await?;
///
///     let (read, write) = client.streams()?;
///     write.write_all(b"GET / HTTP/1.0\r\n\r\n").await?;
///     write.flush().await?;
///
///     let mut buffer = [0u8; 1024];
///     let read = read.read(&mut buffer).await?;
///     println!("{}", String::from_utf8_lossy(&buffer[..read]));
///
///     client.disconnect().await
/// }
/// ```
#[expect(async_fn_in_trait)]
pub trait TcpClient: Debug {
    /// Stream of bytes received from the peer.
    type ReadStream: embedded_io_async::Read + embedded_io_async::ErrorType<Error = Error>;
    /// Stream of bytes sent to the peer.
    ///
    /// Writes are buffered by [`TcpClient::write_buffer_size`]; flush to guarantee delivery.
    type WriteStream: embedded_io_async::Write + embedded_io_async::ErrorType<Error = Error>;

    /// Connects to `address` on a port or service name.
    ///
    /// Resolution, connect and the TLS handshake race against the cancellation signal and
    /// timeout of `options`; either one ends the call with [`Error::Cancelled`].
    async fn connect(
        &mut self,
        address: &str,
        service: impl Into<Service>,
        options: ConnectOptions,
    ) -> Result<()>;

    /// Shuts down and releases the session.
    ///
    /// Does nothing when unconnected.
    async fn disconnect(&mut self) -> Result<()>;

    /// Returns the lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Returns the read stream of the current session.
    fn read_stream(&mut self) -> Result<&mut Self::ReadStream>;

    /// Returns the write stream of the current session.
    fn write_stream(&mut self) -> Result<&mut Self::WriteStream>;

    /// Returns both streams for concurrent use.
    fn streams(&mut self) -> Result<(&mut Self::ReadStream, &mut Self::WriteStream)>;

    /// Returns both streams combined into one two-way stream.
    fn duplex(&mut self) -> Result<Duplex<'_, Self::ReadStream, Self::WriteStream>> {
        let (read, write) = self.streams()?;
        Ok(Duplex::new(read, write))
    }

    /// Returns the peer address of the current session.
    fn remote_address(&self) -> Result<IpAddr>;

    /// Returns the peer port of the current session.
    fn remote_port(&self) -> Result<u16>;

    /// Returns the local address of the current session.
    fn local_address(&self) -> Result<SocketAddr>;

    /// Returns whether the current session runs over TLS.
    fn is_secure(&self) -> bool;

    /// Returns the configured write buffer capacity.
    fn write_buffer_size(&self) -> usize;

    /// Returns whether Nagle's algorithm is disabled.
    fn no_delay(&self) -> bool;

    /// Disables or enables Nagle's algorithm.
    ///
    /// Applies to the current session and to every later one.
    fn set_no_delay(&mut self, no_delay: bool) -> Result<()>;

    /// Returns the interface that owns the local address of the current session.
    fn connected_interface(&self) -> Result<Option<InterfaceSummary>>;

    /// Releases every resource.
    ///
    /// Idempotent; also performed on drop.
    fn dispose(&mut self);
}

/// Accepts TCP connections on a local port.
///
/// A listener is single-shot: after [`TcpListener::stop_listening`] it must be
/// [reset](TcpListener::reset) before it can listen again.
///
/// # Example
///
/// ```no_run
/// use embedded_io_async::{Read, Write};
/// use portsock_api::net::tcp::{TcpClient, TcpListener};
///
/// async fn echo_server(mut listener: impl TcpListener) -> portsock_api::Result<()> {
///     let mut connections = listener.connections();
///     listener.start_listening(7, None).await?;
///
///     while let Some(mut connection) = connections.next_event().await {
///         let (read, write) = connection.streams()?;
///         let mut buffer = [0u8; 1024];
///         loop {
///             match read.read(&mut buffer).await? {
///                 0 => break,
///                 count => {
///                     write.write_all(&buffer[..count]).await?;
///                     write.flush().await?;
///                 }
///             }
///         }
///     }
///     listener.stop_listening().await
/// }
/// ```
#[expect(async_fn_in_trait)]
pub trait TcpListener: Debug {
    /// Connection type handed out for accepted clients.
    type Connection: TcpClient;

    /// Binds `port` and starts accepting in the background.
    ///
    /// Binds all interfaces unless `interface` is given. Port `0` lets the platform choose;
    /// see [`TcpListener::local_port`].
    async fn start_listening(&mut self, port: u16, interface: Option<&InterfaceSummary>)
    -> Result<()>;

    /// Stops accepting and releases the port.
    ///
    /// Returns the failure the accept loop ended with, if any.
    async fn stop_listening(&mut self) -> Result<()>;

    /// Makes a stopped listener available for [`TcpListener::start_listening`] again.
    fn reset(&mut self) -> Result<()>;

    /// Returns the lifecycle state.
    fn state(&self) -> ListenerState;

    /// Returns the bound port while listening.
    fn local_port(&self) -> Result<u16>;

    /// Returns the write buffer capacity given to accepted connections.
    fn write_buffer_size(&self) -> usize;

    /// Subscribes to accepted connections.
    ///
    /// Each connection goes to exactly one subscription, the earliest live one.
    /// Connections accepted without a live subscription are closed.
    ///
    /// Subscriptions stay open across [`TcpListener::stop_listening`] and
    /// [`TcpListener::reset`], so they keep receiving after a restart. They end
    /// when the accept loop fails, on [`TcpListener::dispose`] or when the
    /// listener is dropped; a consumer draining them until `None` waits for one
    /// of these.
    fn connections(&self) -> Subscription<Self::Connection>;

    /// Releases every resource.
    ///
    /// Idempotent; also performed on drop.
    fn dispose(&mut self);
}

/// Read and write streams of one connection combined into a two-way stream.
pub struct Duplex<'a, R, W> {
    read: &'a mut R,
    write: &'a mut W,
}

impl<'a, R, W> Duplex<'a, R, W> {
    /// Combines `read` and `write`.
    pub fn new(read: &'a mut R, write: &'a mut W) -> Self {
        Self { read, write }
    }

    /// Splits the two-way stream into its halves.
    pub fn into_parts(self) -> (&'a mut R, &'a mut W) {
        (self.read, self.write)
    }
}

impl<R, W> Debug for Duplex<'_, R, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Duplex").finish_non_exhaustive()
    }
}

impl<R, W> embedded_io_async::ErrorType for Duplex<'_, R, W> {
    type Error = Error;
}

impl<R, W> embedded_io_async::Read for Duplex<'_, R, W>
where
    R: embedded_io_async::Read + embedded_io_async::ErrorType<Error = Error>,
{
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.read.read(buffer).await
    }
}

impl<R, W> embedded_io_async::Write for Duplex<'_, R, W>
where
    W: embedded_io_async::Write + embedded_io_async::ErrorType<Error = Error>,
{
    async fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        self.write.write(buffer).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.write.flush().await
    }
}

#[doc(hidden)]
#[cfg(feature = "test-suites")]
#[cfg_attr(coverage_nightly, coverage(off))]
pub mod test_suite {
    #![expect(missing_docs, reason = "tests")]
    //! Test suite for TCP connections and listeners.

    use core::time::Duration;
    use std::net::IpAddr;

    use embedded_io_async::{Read, Write};
    use rand::rngs::SmallRng;
    use rand::{RngCore, SeedableRng};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::events::Subscription;
    use crate::interface::{InterfaceStatus, InterfaceSummary};
    use crate::net::tcp::{TcpClient, TcpListener};
    use crate::state::{ConnectionState, ListenerState};
    use crate::{ArgumentError, ConnectOptions, Error, SocketErrorKind, StateError};

    const LOCALHOST: &str = "127.0.0.1";

    async fn listen<L: TcpListener>(listener: &mut L) -> (Subscription<L::Connection>, u16) {
        let incoming = listener.connections();
        listener.start_listening(0, None).await.unwrap();
        let port = listener.local_port().unwrap();
        assert_ne!(port, 0);
        (incoming, port)
    }

    async fn accept<C>(incoming: &mut Subscription<C>) -> C {
        incoming
            .next_event()
            .await
            .expect("the accept loop ended before a connection arrived")
    }

    async fn connected_pair<L: TcpListener>(
        listener: &mut L,
        client: &mut impl TcpClient,
    ) -> L::Connection {
        let (mut incoming, port) = listen(listener).await;
        client
            .connect(LOCALHOST, port, ConnectOptions::new())
            .await
            .unwrap();
        accept(&mut incoming).await
    }

    async fn send(stream: &mut impl Write<Error = Error>, payload: &[u8]) {
        stream.write_all(payload).await.unwrap();
        stream.flush().await.unwrap();
    }

    async fn receive(stream: &mut impl Read<Error = Error>, length: usize) -> Vec<u8> {
        let mut buffer = vec![0; length];
        stream.read_exact(&mut buffer).await.unwrap();
        buffer
    }

    pub async fn test_connect_and_disconnect(
        mut listener: impl TcpListener,
        mut client: impl TcpClient,
    ) {
        assert_eq!(client.state(), ConnectionState::Unconnected);

        let (mut incoming, port) = listen(&mut listener).await;
        assert_eq!(listener.state(), ListenerState::Listening);

        client
            .connect(LOCALHOST, port, ConnectOptions::new())
            .await
            .unwrap();
        let server = accept(&mut incoming).await;

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(server.state(), ConnectionState::Connected);
        assert!(client.remote_address().unwrap().is_loopback());
        assert_eq!(client.remote_port().unwrap(), port);
        assert!(!client.is_secure());

        // The accepted side sees the client's ephemeral port.
        let client_local = client.local_address().unwrap();
        assert_eq!(server.remote_port().unwrap(), client_local.port());
        assert_ne!(server.remote_port().unwrap(), port);

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Unconnected);
        assert!(matches!(
            client.remote_address(),
            Err(Error::State(StateError::NotConnected))
        ));
        assert!(matches!(
            client.read_stream(),
            Err(Error::State(StateError::NotConnected))
        ));

        // Disconnecting an unconnected client is a no-op.
        client.disconnect().await.unwrap();

        listener.stop_listening().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(matches!(
            listener.local_port(),
            Err(Error::State(StateError::NotListening))
        ));
    }

    pub async fn test_send_recv(mut listener: impl TcpListener, mut client: impl TcpClient) {
        let mut server = connected_pair(&mut listener, &mut client).await;

        let server_task = async {
            let (read, write) = server.streams().unwrap();
            let message = receive(read, 24).await;
            assert_eq!(message, b"Test message from client");
            send(write, &message).await;

            assert_eq!(receive(read, 14).await, b"Second message");
            send(write, b"Acknowledged").await;
        };

        let client_task = async {
            let (read, write) = client.streams().unwrap();
            send(write, b"Test message from client").await;
            assert_eq!(receive(read, 24).await, b"Test message from client");

            send(write, b"Second message").await;
            assert_eq!(receive(read, 12).await, b"Acknowledged");
        };

        futures::join!(server_task, client_task);

        server.disconnect().await.unwrap();
        let mut buffer = [0u8; 16];
        let read = client.read_stream().unwrap().read(&mut buffer).await.unwrap();
        assert_eq!(read, 0, "Expected EOF (0 bytes) after the peer disconnected");

        client.disconnect().await.unwrap();
        listener.stop_listening().await.unwrap();
    }

    pub async fn test_duplex_stream(mut listener: impl TcpListener, mut client: impl TcpClient) {
        let mut server = connected_pair(&mut listener, &mut client).await;

        let mut duplex = client.duplex().unwrap();
        send(&mut duplex, b"ping").await;

        let mut server_duplex = server.duplex().unwrap();
        assert_eq!(receive(&mut server_duplex, 4).await, b"ping");
        send(&mut server_duplex, b"pong").await;

        assert_eq!(receive(&mut duplex, 4).await, b"pong");

        client.disconnect().await.unwrap();
        listener.stop_listening().await.unwrap();
    }

    pub async fn test_reconnect(mut listener: impl TcpListener, mut client: impl TcpClient) {
        let (mut incoming, port) = listen(&mut listener).await;

        for round in 0..2u8 {
            client
                .connect(LOCALHOST, port, ConnectOptions::new())
                .await
                .unwrap();
            let mut server = accept(&mut incoming).await;

            // Each session only sees its own bytes.
            send(client.write_stream().unwrap(), &[round]).await;
            assert_eq!(receive(server.read_stream().unwrap(), 1).await, [round]);
            assert_eq!(
                server.remote_port().unwrap(),
                client.local_address().unwrap().port()
            );

            client.disconnect().await.unwrap();
            assert!(client.remote_port().is_err());
        }

        listener.stop_listening().await.unwrap();
    }

    pub async fn test_connect_twice(mut listener: impl TcpListener, mut client: impl TcpClient) {
        let mut server = connected_pair(&mut listener, &mut client).await;
        let port = listener.local_port().unwrap();

        assert!(matches!(
            client.connect(LOCALHOST, port, ConnectOptions::new()).await,
            Err(Error::State(StateError::AlreadyConnected))
        ));

        // The first session is untouched.
        assert_eq!(client.state(), ConnectionState::Connected);
        send(client.write_stream().unwrap(), b"still here").await;
        assert_eq!(receive(server.read_stream().unwrap(), 10).await, b"still here");

        client.disconnect().await.unwrap();
        listener.stop_listening().await.unwrap();
    }

    pub async fn test_invalid_port(mut client: impl TcpClient) {
        assert!(matches!(
            client
                .connect(LOCALHOST, 2147483647, ConnectOptions::new())
                .await,
            Err(Error::Argument(ArgumentError::InvalidPort(2147483647)))
        ));
        assert!(matches!(
            client.connect(LOCALHOST, 0, ConnectOptions::new()).await,
            Err(Error::Argument(ArgumentError::InvalidPort(0)))
        ));
        assert!(matches!(
            client
                .connect(LOCALHOST, "no-such-service", ConnectOptions::new())
                .await,
            Err(Error::Argument(ArgumentError::UnknownService(_)))
        ));
        assert_eq!(client.state(), ConnectionState::Unconnected);
    }

    pub async fn test_unresolvable_host(mut client: impl TcpClient) {
        for host in ["invalid-host-string.invalid", ":/totallynotvalid@#$"] {
            let error = client
                .connect(host, 80, ConnectOptions::new())
                .await
                .unwrap_err();
            assert!(
                matches!(error, Error::Socket(_)),
                "expected a socket error for {host:?}, got {error:?}"
            );
            assert_eq!(client.state(), ConnectionState::Unconnected);
        }
    }

    pub async fn test_connect_refused(mut listener: impl TcpListener, mut client: impl TcpClient) {
        let (_incoming, port) = listen(&mut listener).await;
        listener.stop_listening().await.unwrap();

        let error = client
            .connect(LOCALHOST, port, ConnectOptions::new())
            .await
            .unwrap_err();
        assert_eq!(
            error.socket_error_kind(),
            Some(SocketErrorKind::ConnectionRefused)
        );
        assert_eq!(client.state(), ConnectionState::Unconnected);
    }

    pub async fn test_cancel_before_connect(mut client: impl TcpClient) {
        let token = CancellationToken::new();
        token.cancel();

        let options = ConnectOptions::new().with_cancellation(token);
        assert!(matches!(
            client.connect(LOCALHOST, 9, options).await,
            Err(Error::Cancelled)
        ));
        assert_eq!(client.state(), ConnectionState::Unconnected);
    }

    /// The listener accepts the transport but never answers the TLS handshake.
    pub async fn test_cancel_during_handshake(
        mut listener: impl TcpListener,
        mut client: impl TcpClient,
    ) {
        let (mut incoming, port) = listen(&mut listener).await;
        let token = CancellationToken::new();
        let options = ConnectOptions::new()
            .secure()
            .with_cancellation(token.clone());

        let (result, _server) = futures::join!(client.connect(LOCALHOST, port, options), async {
            let server = accept(&mut incoming).await;
            token.cancel();
            server
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(client.state(), ConnectionState::Unconnected);
        assert!(!client.is_secure());

        listener.stop_listening().await.unwrap();
    }

    pub async fn test_timeout_during_handshake(
        mut listener: impl TcpListener,
        mut client: impl TcpClient,
    ) {
        let (mut incoming, port) = listen(&mut listener).await;
        let options = ConnectOptions::new()
            .secure()
            .with_timeout(Duration::from_millis(200));

        let (result, _server) = futures::join!(
            client.connect(LOCALHOST, port, options),
            accept(&mut incoming)
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(client.state(), ConnectionState::Unconnected);

        listener.stop_listening().await.unwrap();
    }

    pub async fn test_stop_before_start(mut listener: impl TcpListener) {
        assert!(matches!(
            listener.stop_listening().await,
            Err(Error::State(StateError::NotListening))
        ));
        assert!(matches!(
            listener.local_port(),
            Err(Error::State(StateError::NotListening))
        ));
        assert_eq!(listener.state(), ListenerState::Idle);
    }

    pub async fn test_listener_unusable_interface(mut listener: impl TcpListener) {
        let interface = InterfaceSummary::new("99", "down0", InterfaceStatus::Disconnected);

        assert!(matches!(
            listener.start_listening(0, Some(&interface)).await,
            Err(Error::State(StateError::InterfaceNotUsable(_)))
        ));
        assert_eq!(listener.state(), ListenerState::Idle);
    }

    pub async fn test_listener_on_interface(
        mut listener: impl TcpListener,
        mut client: impl TcpClient,
        interface: &InterfaceSummary,
    ) {
        let address = interface.ip_address().unwrap();
        let mut incoming = listener.connections();
        listener.start_listening(0, Some(interface)).await.unwrap();
        let port = listener.local_port().unwrap();

        client
            .connect(
                &address.to_string(),
                port,
                ConnectOptions::new().on_interface(interface.clone()),
            )
            .await
            .unwrap();
        let server = accept(&mut incoming).await;

        assert_eq!(client.remote_address().unwrap(), IpAddr::V4(address));
        assert_eq!(client.local_address().unwrap().ip(), IpAddr::V4(address));
        assert_eq!(server.remote_address().unwrap(), IpAddr::V4(address));

        client.disconnect().await.unwrap();
        listener.stop_listening().await.unwrap();
    }

    pub async fn test_listener_reset(mut listener: impl TcpListener) {
        let (_incoming, _) = listen(&mut listener).await;
        listener.stop_listening().await.unwrap();

        assert!(matches!(
            listener.start_listening(0, None).await,
            Err(Error::State(StateError::ListenerStopped))
        ));

        listener.reset().unwrap();
        assert_eq!(listener.state(), ListenerState::Idle);
        listener.start_listening(0, None).await.unwrap();
        assert_ne!(listener.local_port().unwrap(), 0);
        listener.stop_listening().await.unwrap();
    }

    pub async fn test_listener_fan_out<C: TcpClient>(
        mut listener: impl TcpListener,
        make_client: impl Fn() -> C,
        count: u8,
    ) {
        let (mut incoming, port) = listen(&mut listener).await;
        let mut clients: Vec<C> = (0..count).map(|_| make_client()).collect();

        let connects = clients
            .iter_mut()
            .map(|client| client.connect(LOCALHOST, port, ConnectOptions::new()));
        for result in futures::future::join_all(connects).await {
            result.unwrap();
        }

        let mut accepted = Vec::new();
        for _ in 0..count {
            accepted.push(accept(&mut incoming).await);
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(200), incoming.next_event())
                .await
                .is_err(),
            "more connections than clients"
        );

        let mut remote_ports: Vec<u16> = accepted
            .iter()
            .map(|connection| connection.remote_port().unwrap())
            .collect();
        remote_ports.sort_unstable();
        remote_ports.dedup();
        assert_eq!(remote_ports.len(), usize::from(count));

        for (tag, client) in (0..count).zip(clients.iter_mut()) {
            send(client.write_stream().unwrap(), &[tag]).await;
        }
        let mut tags = Vec::new();
        for connection in &mut accepted {
            tags.extend(receive(connection.read_stream().unwrap(), 1).await);
        }
        tags.sort_unstable();
        assert_eq!(tags, (0..count).collect::<Vec<_>>());

        listener.stop_listening().await.unwrap();
    }

    pub async fn test_accepted_connections_inherit_buffer_size(
        mut listener: impl TcpListener,
        mut client: impl TcpClient,
    ) {
        let server = connected_pair(&mut listener, &mut client).await;

        assert_eq!(server.write_buffer_size(), listener.write_buffer_size());

        client.disconnect().await.unwrap();
        listener.stop_listening().await.unwrap();
    }

    /// `client` must be configured with a write buffer larger than the payload.
    pub async fn test_buffered_writes_need_flush(
        mut listener: impl TcpListener,
        mut client: impl TcpClient,
    ) {
        assert!(client.write_buffer_size() > 8);
        let mut server = connected_pair(&mut listener, &mut client).await;

        client.write_stream().unwrap().write_all(b"buffered").await.unwrap();

        let mut buffer = [0u8; 8];
        let early = tokio::time::timeout(
            Duration::from_millis(200),
            server.read_stream().unwrap().read(&mut buffer),
        )
        .await;
        assert!(early.is_err(), "unflushed bytes were delivered");

        client.write_stream().unwrap().flush().await.unwrap();
        assert_eq!(receive(server.read_stream().unwrap(), 8).await, b"buffered");

        client.disconnect().await.unwrap();
        listener.stop_listening().await.unwrap();
    }

    pub async fn test_no_delay(mut listener: impl TcpListener, mut client: impl TcpClient) {
        assert!(!client.no_delay());
        client.set_no_delay(true).unwrap();

        let (mut incoming, port) = listen(&mut listener).await;
        for _ in 0..2 {
            client
                .connect(LOCALHOST, port, ConnectOptions::new())
                .await
                .unwrap();
            let _server = accept(&mut incoming).await;
            assert!(client.no_delay());

            client.set_no_delay(false).unwrap();
            assert!(!client.no_delay());
            client.set_no_delay(true).unwrap();

            client.disconnect().await.unwrap();
        }

        listener.stop_listening().await.unwrap();
    }

    pub async fn test_dispose(mut listener: impl TcpListener, mut client: impl TcpClient) {
        let _server = connected_pair(&mut listener, &mut client).await;
        let port = listener.local_port().unwrap();

        client.dispose();
        client.dispose();
        assert_eq!(client.state(), ConnectionState::Disposed);
        assert!(matches!(
            client.connect(LOCALHOST, port, ConnectOptions::new()).await,
            Err(Error::State(StateError::Disposed))
        ));

        listener.dispose();
        listener.dispose();
        assert_eq!(listener.state(), ListenerState::Disposed);
        assert!(matches!(
            listener.start_listening(0, None).await,
            Err(Error::State(StateError::Disposed))
        ));
    }

    /// Both peers exchange random bytes for `duration`.
    ///
    /// Each side must receive a prefix of what the other sent, and more than `floor` bytes.
    pub async fn test_duplex_throughput(
        mut listener: impl TcpListener,
        mut client: impl TcpClient,
        duration: Duration,
        floor: usize,
    ) {
        let mut server = connected_pair(&mut listener, &mut client).await;
        listener.stop_listening().await.unwrap();

        let deadline = Instant::now() + duration;
        let (client_read, client_write) = client.streams().unwrap();
        let (server_read, server_write) = server.streams().unwrap();

        let (sent_by_client, received_by_server, sent_by_server, received_by_client) = futures::join!(
            pump(client_write, deadline, 1),
            drain(server_read, deadline),
            pump(server_write, deadline, 2),
            drain(client_read, deadline)
        );

        assert!(received_by_server.len() > floor);
        assert!(received_by_client.len() > floor);
        assert!(sent_by_client.starts_with(&received_by_server));
        assert!(sent_by_server.starts_with(&received_by_client));

        client.disconnect().await.unwrap();
        server.disconnect().await.unwrap();
    }

    /// Writes random chunks until `deadline`, returning everything it attempted to send.
    async fn pump(stream: &mut impl Write<Error = Error>, deadline: Instant, seed: u64) -> Vec<u8> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut chunk = [0u8; 1000];
        let mut sent = Vec::new();

        while Instant::now() < deadline {
            rng.fill_bytes(&mut chunk);
            // Recorded before writing: a write cut short by the deadline may deliver a part.
            sent.extend_from_slice(&chunk);
            let written = tokio::time::timeout_at(deadline, async {
                stream.write_all(&chunk).await?;
                stream.flush().await
            })
            .await;
            match written {
                Ok(result) => result.unwrap(),
                Err(_elapsed) => break,
            }
        }
        sent
    }

    async fn drain(stream: &mut impl Read<Error = Error>, deadline: Instant) -> Vec<u8> {
        let mut buffer = [0u8; 1000];
        let mut received = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, stream.read(&mut buffer)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(read)) => received.extend_from_slice(&buffer[..read]),
                Ok(Err(error)) => panic!("read failed: {error}"),
            }
        }
        received
    }
}
