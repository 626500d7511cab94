use core::fmt::{Display, Formatter};
use std::net::IpAddr;

use embedded_io::ErrorKind;

/// A result with the [`Error`] error.
pub type Result<T> = core::result::Result<T, Error>;

/// The portable error every socket operation fails with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value is outside its valid domain.
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    /// The native socket layer failed.
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// The operation is not valid in the current lifecycle state.
    #[error(transparent)]
    State(#[from] StateError),
    /// A cancellation signal fired or a caller timeout elapsed.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` for [`Error::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns the kind of a [`Error::Socket`] error.
    pub fn socket_error_kind(&self) -> Option<SocketErrorKind> {
        match self {
            Error::Socket(error) => Some(error.kind()),
            _ => None,
        }
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Argument(_) => ErrorKind::InvalidInput,
            Error::State(StateError::NotConnected) => ErrorKind::NotConnected,
            Error::State(_) => ErrorKind::Other,
            Error::Cancelled => ErrorKind::Interrupted,
            Error::Socket(error) => match error.kind() {
                SocketErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
                SocketErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
                SocketErrorKind::NotConnected => ErrorKind::NotConnected,
                SocketErrorKind::AddressInUse => ErrorKind::AddrInUse,
                SocketErrorKind::AddressNotAvailable => ErrorKind::AddrNotAvailable,
                SocketErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                SocketErrorKind::TimedOut => ErrorKind::TimedOut,
                SocketErrorKind::HostNotFound
                | SocketErrorKind::NoRoute
                | SocketErrorKind::NetworkDown
                | SocketErrorKind::Tls
                | SocketErrorKind::Other => ErrorKind::Other,
            },
        }
    }
}

/// Lets a portable error travel through APIs that speak [`std::io::Error`].
///
/// [`Normalize`](crate::Normalize) unwraps it again instead of wrapping it a second time.
impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::Argument(_) => std::io::ErrorKind::InvalidInput,
            Error::Cancelled => std::io::ErrorKind::Interrupted,
            Error::State(StateError::NotConnected) => std::io::ErrorKind::NotConnected,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, error)
    }
}

/// A caller-supplied value that is outside its domain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    /// The port is outside `1..=65535`.
    #[error("port {0} is outside the valid range 1-65535")]
    InvalidPort(i64),
    /// The service name is neither numeric nor a well-known service.
    #[error("unknown service name `{0}`")]
    UnknownService(String),
    /// The text is not an IP address.
    #[error("`{0}` is not a valid IP address")]
    InvalidAddress(String),
    /// The address is not in a multicast range.
    #[error("{0} is not a multicast address")]
    NotMulticast(IpAddr),
}

/// An operation that is not valid in the current lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The operation needs an established connection.
    #[error("the socket is not connected")]
    NotConnected,
    /// The connection is already established.
    #[error("the socket is already connected")]
    AlreadyConnected,
    /// The listener or receiver has not been started.
    #[error("the socket is not listening")]
    NotListening,
    /// The listener or receiver is already started.
    #[error("the socket is already listening")]
    AlreadyListening,
    /// The listener is stopped and was not reset.
    #[error("the listener was stopped and must be reset before it can listen again")]
    ListenerStopped,
    /// The interface summary has no IPv4 address to bind to.
    #[error("interface `{0}` has no usable address")]
    InterfaceNotUsable(String),
    /// The multicast client has not joined a group.
    #[error("no multicast group has been joined")]
    NoGroupJoined,
    /// The multicast client is already a group member.
    #[error("a multicast group has already been joined")]
    GroupAlreadyJoined,
    /// A UDP client sent without a default peer.
    #[error("no default peer has been set")]
    NoDefaultPeer,
    /// The entity has been disposed.
    #[error("the socket has been disposed")]
    Disposed,
    /// A lifecycle transition the transition table does not allow.
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        /// The current state.
        from: &'static str,
        /// The requested state.
        to: &'static str,
    },
}

/// A native socket failure with its original cause.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {cause}")]
pub struct SocketError {
    kind: SocketErrorKind,
    #[source]
    cause: Box<dyn core::error::Error + Send + Sync + 'static>,
}

impl SocketError {
    /// Creates a socket error of `kind` caused by `cause`.
    pub fn new(
        kind: SocketErrorKind,
        cause: impl Into<Box<dyn core::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    /// Returns the coarse classification of the native failure.
    pub fn kind(&self) -> SocketErrorKind {
        self.kind
    }

    /// Returns the native failure.
    pub fn cause(&self) -> &(dyn core::error::Error + Send + Sync + 'static) {
        &*self.cause
    }

    /// Consumes the error, returning the native failure.
    pub fn into_cause(self) -> Box<dyn core::error::Error + Send + Sync + 'static> {
        self.cause
    }
}

/// Coarse classification of native socket failures.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Hash)]
pub enum SocketErrorKind {
    /// The remote host refused the connection.
    ConnectionRefused,
    /// The connection was reset or aborted by the peer.
    ConnectionReset,
    /// The native socket is not connected.
    NotConnected,
    /// The host name could not be resolved.
    HostNotFound,
    /// No route to host or network.
    NoRoute,
    /// The local address is already in use.
    AddressInUse,
    /// The local address does not exist on this host.
    AddressNotAvailable,
    /// No permission to access the resource.
    PermissionDenied,
    /// The network stack is down.
    NetworkDown,
    /// The native operation timed out.
    TimedOut,
    /// The TLS handshake or TLS session failed.
    Tls,
    /// Currently unhandled error occurred.
    Other,
}

impl Display for SocketErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            SocketErrorKind::ConnectionRefused => write!(f, "connection refused"),
            SocketErrorKind::ConnectionReset => write!(f, "connection reset"),
            SocketErrorKind::NotConnected => write!(f, "not connected"),
            SocketErrorKind::HostNotFound => write!(f, "host not found"),
            SocketErrorKind::NoRoute => write!(f, "no route to host"),
            SocketErrorKind::AddressInUse => write!(f, "address in use"),
            SocketErrorKind::AddressNotAvailable => write!(f, "address not available"),
            SocketErrorKind::PermissionDenied => write!(f, "permission denied"),
            SocketErrorKind::NetworkDown => write!(f, "network down"),
            SocketErrorKind::TimedOut => write!(f, "timed out"),
            SocketErrorKind::Tls => write!(f, "TLS failure"),
            SocketErrorKind::Other => write!(f, "socket error"),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use embedded_io::Error as _;
    use std::error::Error as _;

    #[test]
    fn socket_error_keeps_its_cause() {
        let cause = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let error = Error::from(SocketError::new(SocketErrorKind::ConnectionRefused, cause));

        assert_eq!(
            error.socket_error_kind(),
            Some(SocketErrorKind::ConnectionRefused)
        );
        assert!(error.source().is_some());
        assert!(error.to_string().starts_with("connection refused: "));
        assert_eq!(error.kind(), ErrorKind::ConnectionRefused);
    }

    #[test]
    fn argument_errors_are_invalid_input() {
        let error = Error::from(ArgumentError::InvalidPort(2147483647));

        assert_eq!(error.kind(), ErrorKind::InvalidInput);
        assert_eq!(
            error.to_string(),
            "port 2147483647 is outside the valid range 1-65535"
        );
    }

    #[test]
    fn cancellation_is_not_a_socket_error() {
        assert!(Error::Cancelled.is_cancelled());
        assert_eq!(Error::Cancelled.socket_error_kind(), None);
    }
}
