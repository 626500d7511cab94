use core::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::interface::InterfaceSummary;

/// Construction parameters shared by every socket entity.
///
/// Deserializes from partial documents; missing fields take their defaults.
///
/// ```
/// use portsock_api::SocketConfig;
///
/// let config = SocketConfig::default().with_write_buffer_size(4096).with_no_delay(true);
/// assert_eq!(config.multicast_ttl, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketConfig {
    /// Capacity of the write buffer of TCP write streams, `0` for unbuffered writes.
    pub write_buffer_size: usize,
    /// Lowest TLS version a secure connection accepts.
    pub tls_version: TlsVersion,
    /// Outbound hop limit applied when a multicast client joins a group.
    pub multicast_ttl: u32,
    /// Whether TCP connections disable Nagle's algorithm.
    pub no_delay: bool,
    /// Default bound on connecting, used when [`ConnectOptions`] carries none.
    pub connect_timeout: Option<Duration>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 0,
            tls_version: TlsVersion::Tls12,
            multicast_ttl: 1,
            no_delay: false,
            connect_timeout: None,
        }
    }
}

impl SocketConfig {
    /// Sets [`Self::write_buffer_size`].
    pub fn with_write_buffer_size(mut self, write_buffer_size: usize) -> Self {
        self.write_buffer_size = write_buffer_size;
        self
    }

    /// Sets [`Self::tls_version`].
    pub fn with_tls_version(mut self, tls_version: TlsVersion) -> Self {
        self.tls_version = tls_version;
        self
    }

    /// Sets [`Self::multicast_ttl`].
    pub fn with_multicast_ttl(mut self, multicast_ttl: u32) -> Self {
        self.multicast_ttl = multicast_ttl;
        self
    }

    /// Sets [`Self::no_delay`].
    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    /// Sets [`Self::connect_timeout`].
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }
}

/// Lowest TLS protocol version a secure connection negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVersion {
    /// TLS 1.2 or newer.
    Tls12,
    /// TLS 1.3 only.
    Tls13,
}

/// Per-call options of a TCP connect.
///
/// ```
/// use core::time::Duration;
/// use portsock_api::ConnectOptions;
/// use tokio_util::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let options = ConnectOptions::new()
///     .secure()
///     .with_cancellation(token.clone())
///     .with_timeout(Duration::from_secs(5));
/// assert!(options.secure);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Runs a TLS handshake over the established transport.
    pub secure: bool,
    /// Accepts any server certificate.
    pub ignore_cert_errors: bool,
    /// Aborts the connect when cancelled.
    pub cancellation: Option<CancellationToken>,
    /// Aborts the connect once elapsed.
    pub timeout: Option<Duration>,
    /// Binds the local side to this interface's address.
    pub interface: Option<InterfaceSummary>,
}

impl ConnectOptions {
    /// Options for a plain connect without cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables TLS.
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Disables server certificate validation.
    pub fn ignore_cert_errors(mut self) -> Self {
        self.ignore_cert_errors = true;
        self
    }

    /// Sets the cancellation signal.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the local interface.
    pub fn on_interface(mut self, interface: InterfaceSummary) -> Self {
        self.interface = Some(interface);
        self
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = SocketConfig::default();

        assert_eq!(config.write_buffer_size, 0);
        assert_eq!(config.tls_version, TlsVersion::Tls12);
        assert_eq!(config.multicast_ttl, 1);
        assert!(!config.no_delay);
        assert_eq!(config.connect_timeout, None);
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let config: SocketConfig = toml::from_str(
            r#"
            multicast_ttl = 4
            tls_version = "tls13"
            "#,
        )
        .unwrap();

        assert_eq!(
            config,
            SocketConfig::default()
                .with_multicast_ttl(4)
                .with_tls_version(TlsVersion::Tls13)
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<SocketConfig>("multicast_hops = 4").is_err());
    }
}
