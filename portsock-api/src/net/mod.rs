//! Network abstraction layer for TCP and UDP sockets.
//!
//! Provides platform-agnostic traits for network operations.

pub mod tcp;
pub mod udp;
