//! TCP listener for the std platform.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use portsock_api::events::{Publisher, Subscription};
use portsock_api::interface::{InterfaceProvider, InterfaceSummary};
use portsock_api::state::ListenerState;
use portsock_api::{Error, Normalize, Result, SocketConfig, StateError};
use tokio_util::sync::CancellationToken;

use crate::interface::NetdevInterfaces;
use crate::net::BackgroundLoop;
use crate::net::tcp::TcpClient;

/// Pending connections the platform queues before they are accepted.
const BACKLOG: u32 = 1024;

/// TCP listener on tokio.
///
/// Accepted clients are [`TcpClient`]s with the listener's configuration.
pub struct TcpListener {
    config: SocketConfig,
    state: ListenerState,
    local_address: Option<SocketAddr>,
    publisher: Publisher<TcpClient>,
    accept_loop: Option<BackgroundLoop>,
    interfaces: Arc<dyn InterfaceProvider>,
}

impl core::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TcpListener")
            .field("state", &self.state)
            .field("local_address", &self.local_address)
            .finish()
    }
}

impl Default for TcpListener {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpListener {
    /// Creates an idle listener with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    /// Creates an idle listener.
    pub fn with_config(config: SocketConfig) -> Self {
        Self {
            config,
            state: ListenerState::Idle,
            local_address: None,
            publisher: Publisher::new(),
            accept_loop: None,
            interfaces: Arc::new(NetdevInterfaces),
        }
    }

    /// Replaces the interface source handed to accepted connections.
    pub fn with_interface_provider(mut self, interfaces: Arc<dyn InterfaceProvider>) -> Self {
        self.interfaces = interfaces;
        self
    }
}

/// Hands an accepted connection to the subscribers.
///
/// A connection that could not be set up is dropped; the listener keeps accepting.
fn deliver(connection: Result<TcpClient>, remote: SocketAddr, publisher: &Publisher<TcpClient>) {
    let connection = match connection {
        Ok(connection) => connection,
        Err(error) => {
            tracing::debug!(%remote, %error, "dropping accepted connection");
            return;
        }
    };

    tracing::debug!(%remote, "accepted connection");
    if publisher.hand_off(connection).is_some() {
        tracing::debug!(%remote, "no subscription for accepted connection, closing it");
    }
}

/// Accepts until `shutdown` fires or accepting fails.
async fn accept_loop(
    listener: tokio::net::TcpListener,
    publisher: Publisher<TcpClient>,
    config: SocketConfig,
    interfaces: Arc<dyn InterfaceProvider>,
    shutdown: CancellationToken,
) -> Result<()> {
    let outcome: Result<()> = async {
        loop {
            let accepted = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };
            let (stream, remote) = accepted.map_err(Normalize::normalize)?;
            let connection =
                TcpClient::accepted(stream, remote, config.clone(), Arc::clone(&interfaces));
            deliver(connection, remote, &publisher);
        }
    }
    .await;

    if let Err(error) = &outcome {
        tracing::warn!(?error, "accept loop failed");
        publisher.close();
    }
    outcome
}

impl portsock_api::net::tcp::TcpListener for TcpListener {
    type Connection = TcpClient;

    #[tracing::instrument(skip(self, interface), fields(interface = interface.map(InterfaceSummary::name)))]
    async fn start_listening(
        &mut self,
        port: u16,
        interface: Option<&InterfaceSummary>,
    ) -> Result<()> {
        self.state.check(ListenerState::Listening)?;
        let address = match interface {
            Some(interface) => interface.usable_address()?,
            None => Ipv4Addr::UNSPECIFIED,
        };

        let socket = tokio::net::TcpSocket::new_v4().map_err(Normalize::normalize)?;
        socket.set_reuseaddr(true).map_err(Normalize::normalize)?;
        socket
            .bind(SocketAddr::from((address, port)))
            .map_err(Normalize::normalize)?;
        let listener = socket.listen(BACKLOG).map_err(Normalize::normalize)?;
        let local_address = listener.local_addr().map_err(Normalize::normalize)?;

        let publisher = self.publisher.clone();
        let config = self.config.clone();
        let interfaces = Arc::clone(&self.interfaces);
        self.accept_loop = Some(BackgroundLoop::spawn(|shutdown| {
            accept_loop(listener, publisher, config, interfaces, shutdown)
        }));
        self.local_address = Some(local_address);
        self.state.transition(ListenerState::Listening)?;

        tracing::debug!(%local_address, "listening");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn stop_listening(&mut self) -> Result<()> {
        self.state.check(ListenerState::Stopped)?;

        let outcome = match self.accept_loop.take() {
            Some(accept_loop) => accept_loop.stop().await,
            None => Ok(()),
        };
        self.local_address = None;
        self.state.transition(ListenerState::Stopped)?;

        tracing::debug!("stopped listening");
        outcome
    }

    fn reset(&mut self) -> Result<()> {
        if self.state == ListenerState::Idle {
            return Ok(());
        }
        self.state.transition(ListenerState::Idle)?;
        Ok(())
    }

    fn state(&self) -> ListenerState {
        self.state
    }

    fn local_port(&self) -> Result<u16> {
        match (self.state, self.local_address) {
            (ListenerState::Listening, Some(address)) => Ok(address.port()),
            (ListenerState::Disposed, _) => Err(StateError::Disposed.into()),
            _ => Err(StateError::NotListening.into()),
        }
    }

    fn write_buffer_size(&self) -> usize {
        self.config.write_buffer_size
    }

    fn connections(&self) -> Subscription<TcpClient> {
        self.publisher.subscribe()
    }

    fn dispose(&mut self) {
        // Dropping the loop cancels and aborts it, which releases the socket.
        self.accept_loop = None;
        self.local_address = None;
        self.publisher.close();
        if self.state.transition(ListenerState::Disposed).is_ok() {
            tracing::debug!("listener disposed");
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.publisher.close();
    }
}
