//! Helpers shared by the network drivers.

pub mod tls;

pub use tls::{SslMode, TlsBuilder};
