//! TCP connections for the std platform.

use core::pin::Pin;
use core::task::{Context, Poll};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr};
use std::sync::Arc;

use embedded_io_adapters::tokio_1::FromTokio;
use portsock_api::interface::{InterfaceProvider, InterfaceSummary};
use portsock_api::state::ConnectionState;
use portsock_api::{ConnectOptions, Error, Normalize, Result, Service, SocketConfig, StateError};
use tokio::io::{AsyncRead, AsyncWrite, BufWriter, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::interface::NetdevInterfaces;
use crate::net::{cancellable, no_addresses, resolve_all};
use crate::tls;

/// Byte transport of a session, with or without TLS.
enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Bytes received from the peer.
pub struct ReadStream {
    inner: FromTokio<ReadHalf<Transport>>,
}

impl core::fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadStream").finish()
    }
}

impl embedded_io::ErrorType for ReadStream {
    type Error = Error;
}

impl embedded_io_async::Read for ReadStream {
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        embedded_io_async::Read::read(&mut self.inner, buffer)
            .await
            .map_err(Normalize::normalize)
    }
}

/// Bytes sent to the peer, buffered up to the configured write buffer size.
pub struct WriteStream {
    inner: FromTokio<BufWriter<WriteHalf<Transport>>>,
}

impl core::fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WriteStream")
            .field("buffered", &self.inner.inner().buffer().len())
            .finish()
    }
}

impl embedded_io::ErrorType for WriteStream {
    type Error = Error;
}

impl embedded_io_async::Write for WriteStream {
    async fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        embedded_io_async::Write::write(&mut self.inner, buffer)
            .await
            .map_err(Normalize::normalize)
    }

    async fn flush(&mut self) -> Result<()> {
        embedded_io_async::Write::flush(&mut self.inner)
            .await
            .map_err(Normalize::normalize)
    }
}

/// One established connection.
struct Session {
    read: ReadStream,
    write: WriteStream,
    // Duplicate handle of the socket for options; the transport is split between the streams.
    control: std::net::TcpStream,
    remote: SocketAddr,
    local: SocketAddr,
    secure: bool,
}

impl Session {
    fn new(
        transport: Transport,
        control: std::net::TcpStream,
        remote: SocketAddr,
        local: SocketAddr,
        write_buffer_size: usize,
    ) -> Self {
        let secure = matches!(transport, Transport::Tls(_));
        let (read, write) = tokio::io::split(transport);
        Self {
            read: ReadStream {
                inner: FromTokio::new(read),
            },
            write: WriteStream {
                inner: FromTokio::new(BufWriter::with_capacity(write_buffer_size, write)),
            },
            control,
            remote,
            local,
            secure,
        }
    }

    /// Closes both directions without waiting for buffered bytes.
    fn shutdown(self) -> io::Result<()> {
        self.control.shutdown(Shutdown::Both)
    }
}

fn control_handle(stream: &TcpStream) -> Result<std::net::TcpStream> {
    let duplicate = socket2::SockRef::from(stream)
        .try_clone()
        .map_err(Normalize::normalize)?;
    Ok(duplicate.into())
}

fn unavailable(state: ConnectionState) -> Error {
    match state {
        ConnectionState::Disposed => StateError::Disposed.into(),
        _ => StateError::NotConnected.into(),
    }
}

/// Failures that mean the connection is already gone.
fn peer_gone(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Connects to `remote`, from `local` when given.
async fn connect_to(remote: SocketAddr, local: Option<Ipv4Addr>) -> Result<TcpStream> {
    let socket = match remote {
        SocketAddr::V4(_) => tokio::net::TcpSocket::new_v4(),
        SocketAddr::V6(_) => tokio::net::TcpSocket::new_v6(),
    }
    .map_err(Normalize::normalize)?;
    if let Some(local) = local {
        socket
            .bind(SocketAddr::from((local, 0)))
            .map_err(Normalize::normalize)?;
    }
    socket.connect(remote).await.map_err(Normalize::normalize)
}

/// Tries `candidates` in order and returns the first established stream.
///
/// Fails with the last candidate's error; `Ok(None)` when there are no candidates.
async fn connect_first(
    candidates: &[SocketAddr],
    local: Option<Ipv4Addr>,
) -> Result<Option<TcpStream>> {
    let mut last_error = None;
    for &remote in candidates {
        match connect_to(remote, local).await {
            Ok(stream) => return Ok(Some(stream)),
            Err(error) => {
                tracing::debug!(%remote, %error, "candidate address failed");
                last_error = Some(error);
            }
        }
    }
    last_error.map_or(Ok(None), Err)
}

/// TCP connection on tokio.
///
/// Created unconnected with [`TcpClient::new`], or connected by a
/// [`TcpListener`](crate::net::listener::TcpListener).
pub struct TcpClient {
    config: SocketConfig,
    state: ConnectionState,
    session: Option<Session>,
    no_delay: bool,
    interfaces: Arc<dyn InterfaceProvider>,
}

impl core::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TcpClient")
            .field("state", &self.state)
            .field("remote", &self.session.as_ref().map(|session| session.remote))
            .field("secure", &self.session.as_ref().is_some_and(|session| session.secure))
            .finish()
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpClient {
    /// Creates an unconnected client with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    /// Creates an unconnected client.
    pub fn with_config(config: SocketConfig) -> Self {
        Self {
            no_delay: config.no_delay,
            config,
            state: ConnectionState::Unconnected,
            session: None,
            interfaces: Arc::new(NetdevInterfaces),
        }
    }

    /// Replaces the source used by [`connected_interface`](portsock_api::net::tcp::TcpClient::connected_interface).
    pub fn with_interface_provider(mut self, interfaces: Arc<dyn InterfaceProvider>) -> Self {
        self.interfaces = interfaces;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Wraps an accepted stream as a connected client.
    pub(crate) fn accepted(
        stream: TcpStream,
        remote: SocketAddr,
        config: SocketConfig,
        interfaces: Arc<dyn InterfaceProvider>,
    ) -> Result<Self> {
        stream
            .set_nodelay(config.no_delay)
            .map_err(Normalize::normalize)?;
        let control = control_handle(&stream)?;
        let local = stream.local_addr().map_err(Normalize::normalize)?;
        let session = Session::new(
            Transport::Plain(stream),
            control,
            remote,
            local,
            config.write_buffer_size,
        );

        Ok(Self {
            no_delay: config.no_delay,
            config,
            state: ConnectionState::Connected,
            session: Some(session),
            interfaces,
        })
    }

    async fn establish(
        &self,
        address: &str,
        port: u16,
        options: &ConnectOptions,
        local: Option<Ipv4Addr>,
    ) -> Result<Session> {
        let mut candidates = resolve_all(address, port).await?;
        if local.is_some() {
            candidates.retain(SocketAddr::is_ipv4);
        }

        let stream = connect_first(&candidates, local)
            .await?
            .ok_or_else(|| no_addresses(address))?;
        stream
            .set_nodelay(self.no_delay)
            .map_err(Normalize::normalize)?;
        let control = control_handle(&stream)?;
        let remote = stream.peer_addr().map_err(Normalize::normalize)?;
        let local = stream.local_addr().map_err(Normalize::normalize)?;

        let transport = if options.secure {
            let session = tls::handshake(
                address,
                stream,
                self.config.tls_version,
                options.ignore_cert_errors,
            )
            .await?;
            Transport::Tls(Box::new(session))
        } else {
            Transport::Plain(stream)
        };

        Ok(Session::new(
            transport,
            control,
            remote,
            local,
            self.config.write_buffer_size,
        ))
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| unavailable(self.state))
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        let state = self.state;
        self.session.as_mut().ok_or_else(|| unavailable(state))
    }
}

impl portsock_api::net::tcp::TcpClient for TcpClient {
    type ReadStream = ReadStream;
    type WriteStream = WriteStream;

    #[tracing::instrument(skip_all, fields(address = %address, secure = options.secure))]
    async fn connect(
        &mut self,
        address: &str,
        service: impl Into<Service>,
        options: ConnectOptions,
    ) -> Result<()> {
        let port = service.into().resolve_port()?;
        let local = options
            .interface
            .as_ref()
            .map(InterfaceSummary::usable_address)
            .transpose()?;

        if self.state == ConnectionState::Connecting {
            // A previous connect future was dropped before completing.
            self.state.transition(ConnectionState::Unconnected)?;
        }
        self.state.transition(ConnectionState::Connecting)?;

        let timeout = options.timeout.or(self.config.connect_timeout);
        let outcome = cancellable(
            self.establish(address, port, &options, local),
            options.cancellation.as_ref(),
            timeout,
        )
        .await;

        match outcome {
            Ok(session) => {
                tracing::debug!(remote = %session.remote, local = %session.local, "connected");
                self.session = Some(session);
                self.state.transition(ConnectionState::Connected)?;
                Ok(())
            }
            Err(error) => {
                tracing::debug!(%error, "connect failed");
                self.state.transition(ConnectionState::Unconnected)?;
                Err(error)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Unconnected | ConnectionState::Disposed => return Ok(()),
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        let session = self.session.take();
        self.state.transition(ConnectionState::Unconnected)?;
        let Some(session) = session else {
            return Ok(());
        };

        tracing::debug!(remote = %session.remote, "disconnecting");
        match session.shutdown() {
            Err(error) if !peer_gone(&error) => Err(error.normalize()),
            _ => Ok(()),
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn read_stream(&mut self) -> Result<&mut ReadStream> {
        Ok(&mut self.session_mut()?.read)
    }

    fn write_stream(&mut self) -> Result<&mut WriteStream> {
        Ok(&mut self.session_mut()?.write)
    }

    fn streams(&mut self) -> Result<(&mut ReadStream, &mut WriteStream)> {
        let session = self.session_mut()?;
        Ok((&mut session.read, &mut session.write))
    }

    fn remote_address(&self) -> Result<IpAddr> {
        Ok(self.session()?.remote.ip())
    }

    fn remote_port(&self) -> Result<u16> {
        Ok(self.session()?.remote.port())
    }

    fn local_address(&self) -> Result<SocketAddr> {
        Ok(self.session()?.local)
    }

    fn is_secure(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.secure)
    }

    fn write_buffer_size(&self) -> usize {
        self.config.write_buffer_size
    }

    fn no_delay(&self) -> bool {
        self.no_delay
    }

    fn set_no_delay(&mut self, no_delay: bool) -> Result<()> {
        if let Some(session) = &self.session {
            session
                .control
                .set_nodelay(no_delay)
                .map_err(Normalize::normalize)?;
        }
        self.no_delay = no_delay;
        Ok(())
    }

    fn connected_interface(&self) -> Result<Option<InterfaceSummary>> {
        let local = self.session()?.local.ip();
        self.interfaces.interface_for(local)
    }

    fn dispose(&mut self) {
        self.session = None;
        if self.state.transition(ConnectionState::Disposed).is_ok() {
            tracing::debug!("connection disposed");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use portsock_api::net::tcp::TcpClient as _;

    #[test]
    fn new_clients_follow_the_config() {
        let client = TcpClient::with_config(
            SocketConfig::default()
                .with_no_delay(true)
                .with_write_buffer_size(512),
        );

        assert!(client.no_delay());
        assert_eq!(client.write_buffer_size(), 512);
        assert_eq!(client.state(), ConnectionState::Unconnected);
        assert!(!client.is_secure());
    }

    #[test]
    fn session_queries_fail_when_unconnected() {
        let mut client = TcpClient::new();

        assert!(matches!(
            client.local_address(),
            Err(Error::State(StateError::NotConnected))
        ));
        assert!(matches!(
            client.connected_interface(),
            Err(Error::State(StateError::NotConnected))
        ));

        client.dispose();
        assert!(matches!(
            client.write_stream(),
            Err(Error::State(StateError::Disposed))
        ));
    }

    async fn closed_port() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn refusing_candidates_are_skipped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listening = listener.local_addr().unwrap();
        let refusing = closed_port().await;

        let stream = connect_first(&[refusing, listening], None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stream.peer_addr().unwrap(), listening);
    }

    #[tokio::test]
    async fn last_candidate_failure_is_reported() {
        let refusing = closed_port().await;

        let error = connect_first(&[refusing], None).await.unwrap_err();

        assert_eq!(
            error.socket_error_kind(),
            Some(portsock_api::SocketErrorKind::ConnectionRefused)
        );
        assert!(matches!(connect_first(&[], None).await, Ok(None)));
    }

    #[test]
    fn no_delay_is_remembered_while_unconnected() {
        let mut client = TcpClient::new();

        client.set_no_delay(true).unwrap();

        assert!(client.no_delay());
    }
}
