pub mod config;
pub mod error;
pub mod events;

pub use config::EnvConfig;
pub use error::StartupError;
pub use events::{DnsEvent, EventBus};
