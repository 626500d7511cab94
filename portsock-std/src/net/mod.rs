//! Network implementations for the std platform.

use core::time::Duration;
use std::net::SocketAddr;

use portsock_api::{Error, Result, SocketError, SocketErrorKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod listener;
pub mod multicast;
pub mod tcp;
pub mod udp;

/// Resolves `address` to every socket address it names, in resolver order.
///
/// Literal IP addresses are used as is; host names go through the system resolver.
pub(crate) async fn resolve_all(address: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((address, port))
        .await
        .map_err(|error| SocketError::new(SocketErrorKind::HostNotFound, error))?
        .collect();

    if candidates.is_empty() {
        return Err(no_addresses(address));
    }
    Ok(candidates)
}

/// Resolves `address` to one socket address.
pub(crate) async fn resolve(address: &str, port: u16, prefer_ipv4: bool) -> Result<SocketAddr> {
    let candidates = resolve_all(address, port).await?;

    let preferred = prefer_ipv4
        .then(|| candidates.iter().find(|candidate| candidate.is_ipv4()))
        .flatten()
        .or_else(|| candidates.first());

    preferred.copied().ok_or_else(|| no_addresses(address))
}

pub(crate) fn no_addresses(address: &str) -> Error {
    SocketError::new(
        SocketErrorKind::HostNotFound,
        format!("`{address}` resolved to no usable addresses"),
    )
    .into()
}

/// Runs `operation` until it completes, `cancellation` fires or `timeout` elapses.
///
/// Both interruptions yield [`Error::Cancelled`] and drop `operation`, releasing whatever it had acquired.
pub(crate) async fn cancellable<T>(
    operation: impl Future<Output = Result<T>>,
    cancellation: Option<&CancellationToken>,
    timeout: Option<Duration>,
) -> Result<T> {
    let never = CancellationToken::new();
    let cancellation = cancellation.unwrap_or(&never);

    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_elapsed| Error::Cancelled)?,
            None => operation.await,
        }
    };

    tokio::select! {
        biased;
        () = cancellation.cancelled() => Err(Error::Cancelled),
        outcome = bounded => outcome,
    }
}

/// A spawned accept or receive loop.
///
/// Dropping the handle cancels and aborts the loop.
#[derive(Debug)]
pub(crate) struct BackgroundLoop {
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl BackgroundLoop {
    /// Spawns `run` with the token that asks it to stop.
    pub(crate) fn spawn<F>(run: impl FnOnce(CancellationToken) -> F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(shutdown.clone()));
        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Stops the loop and waits for it to release its socket.
    ///
    /// Returns the failure the loop ended with, if any.
    pub(crate) async fn stop(mut self) -> Result<()> {
        self.shutdown.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(error) if error.is_cancelled() => Ok(()),
            Err(error) => std::panic::resume_unwind(error.into_panic()),
        }
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use portsock_api::StateError;

    #[tokio::test]
    async fn literal_addresses_resolve_without_lookup() {
        let resolved = resolve("127.0.0.1", 80, false).await.unwrap();

        assert_eq!(resolved, SocketAddr::from(([127, 0, 0, 1], 80)));
    }

    #[tokio::test]
    async fn unresolvable_hosts_are_host_not_found() {
        let error = resolve("invalid-host-string.invalid", 80, false)
            .await
            .unwrap_err();

        assert_eq!(
            error.socket_error_kind(),
            Some(SocketErrorKind::HostNotFound)
        );
    }

    #[tokio::test]
    async fn cancelled_token_wins_over_ready_operation() {
        let token = CancellationToken::new();
        token.cancel();

        let outcome = cancellable(async { Ok(5) }, Some(&token), None).await;

        assert!(matches!(outcome, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_timeout_is_cancellation() {
        let outcome: Result<()> = cancellable(
            futures::future::pending(),
            None,
            Some(Duration::from_secs(5)),
        )
        .await;

        assert!(matches!(outcome, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn operation_errors_pass_through() {
        let outcome: Result<()> = cancellable(
            async { Err(StateError::NotConnected.into()) },
            None,
            Some(Duration::from_secs(5)),
        )
        .await;

        assert!(matches!(
            outcome,
            Err(Error::State(StateError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn stopping_returns_the_loop_outcome() {
        let failing = BackgroundLoop::spawn(|_shutdown| async {
            Err(StateError::NotListening.into())
        });
        assert!(matches!(
            failing.stop().await,
            Err(Error::State(StateError::NotListening))
        ));

        let waiting = BackgroundLoop::spawn(|shutdown| async move {
            shutdown.cancelled().await;
            Ok(())
        });
        waiting.stop().await.unwrap();
    }
}
