//! Utility modules

mod socket;
mod tracing_setup;

pub use socket::enable_tcp_keepalive;
pub use tracing_setup::init_tracing;
