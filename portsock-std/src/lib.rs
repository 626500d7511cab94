//! Portable TCP and UDP sockets for `std` platforms.
//!
//! Implements the [`portsock_api`] traits on top of tokio. TLS runs on rustls with the web PKI
//! roots, interface enumeration on netdev.

#![forbid(unsafe_code)]

pub mod interface;
pub mod net;
mod tls;

pub use portsock_api::{Error, Result};
