//! Conversion of native failures into the portable [`Error`].

use futures::TryFutureExt;
use futures::future::{MapErr, TryFuture};

use crate::error::{Error, SocketError, SocketErrorKind};

/// Converts a failure into the portable [`Error`].
///
/// Native socket failures become [`Error::Socket`] with the native value as cause.
/// Portable errors pass through unchanged, including portable errors that travelled inside a native error value.
pub trait Normalize {
    /// Converts `self` into the portable error.
    fn normalize(self) -> Error;
}

impl Normalize for Error {
    fn normalize(self) -> Error {
        self
    }
}

impl Normalize for std::io::Error {
    fn normalize(self) -> Error {
        let carries_portable = self.get_ref().is_some_and(|inner| inner.is::<Error>());
        if !carries_portable {
            return Error::Socket(SocketError::new(socket_error_kind(self.kind()), self));
        }

        let kind = socket_error_kind(self.kind());
        match self.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(error)) => *error,
            Some(Err(inner)) => Error::Socket(SocketError::new(kind, inner)),
            None => Error::Socket(SocketError::new(
                kind,
                std::io::Error::other("native error without payload"),
            )),
        }
    }
}

/// Maps a native error kind onto the portable classification.
pub fn socket_error_kind(kind: std::io::ErrorKind) -> SocketErrorKind {
    use std::io::ErrorKind;

    match kind {
        ErrorKind::ConnectionRefused => SocketErrorKind::ConnectionRefused,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            SocketErrorKind::ConnectionReset
        }
        ErrorKind::NotConnected => SocketErrorKind::NotConnected,
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => SocketErrorKind::NoRoute,
        ErrorKind::AddrInUse => SocketErrorKind::AddressInUse,
        ErrorKind::AddrNotAvailable => SocketErrorKind::AddressNotAvailable,
        ErrorKind::PermissionDenied => SocketErrorKind::PermissionDenied,
        ErrorKind::NetworkDown => SocketErrorKind::NetworkDown,
        ErrorKind::TimedOut => SocketErrorKind::TimedOut,
        _ => SocketErrorKind::Other,
    }
}

/// Applies [`Normalize`] to the failure of any fallible future.
///
/// ```
/// use portsock_api::NormalizeExt;
///
/// async fn read_config() -> portsock_api::Result<String> {
///     async { Err::<String, _>(std::io::Error::other("disk on fire")) }
///         .normalized()
///         .await
/// }
/// ```
pub trait NormalizeExt: TryFuture<Error: Normalize> + Sized {
    /// Wraps the future so its failure is the portable [`Error`].
    fn normalized(self) -> MapErr<Self, fn(Self::Error) -> Error> {
        self.map_err(Normalize::normalize)
    }
}

impl<F> NormalizeExt for F where F: TryFuture<Error: Normalize> {}
