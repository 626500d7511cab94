//! The portsock socket abstraction API.
//!
//! Platform-agnostic contract for TCP connections, TCP listeners and UDP sockets.
//! Platform crates implement the traits in [`net`] and reuse the test suites behind the `test-suites` feature.

#![forbid(unsafe_code)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod address;
mod config;
mod error;
pub mod events;
pub mod interface;
pub mod net;
mod normalize;
pub mod state;

pub use address::{Service, validate_port};
pub use config::{ConnectOptions, SocketConfig, TlsVersion};
pub use error::{ArgumentError, Error, Result, SocketError, SocketErrorKind, StateError};
pub use normalize::{Normalize, NormalizeExt, socket_error_kind};
