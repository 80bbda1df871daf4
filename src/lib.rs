//! A dual-role SOCKS5 proxy engine (RFC 1928): server-role TCP CONNECT and
//! UDP ASSOCIATE termination, and client-role upstream chaining through
//! another SOCKS5 proxy.

pub mod addr;
pub mod config;
pub mod dialer;
pub mod error;
pub mod handshake;
pub mod metrics;
pub mod nat;
pub mod pktconn;
pub mod proxy;
pub mod relay;
pub mod server;
pub mod util;

pub use addr::Addr;
pub use config::Config;
pub use error::{HandshakeOutcome, ReplyCode, Result, Socks5Error};
pub use proxy::Proxy;

/// Crate version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
