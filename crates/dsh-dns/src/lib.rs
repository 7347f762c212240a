pub mod cache;
pub mod config;
pub mod engine;
pub mod logging;
pub mod packet;
pub mod server;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::ForwarderConfig;
pub use engine::ForwardingEngine;

/// Standard DNS UDP message limit (RFC 1035; no EDNS0 negotiation).
pub const MAX_UDP_PACKET: usize = 512;
