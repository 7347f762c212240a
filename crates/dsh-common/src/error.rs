use thiserror::Error;

/// Fatal errors during startup. Each variant maps to a process exit code;
/// a running forwarder never produces these.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind listening socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("OS resolver handler failed: {0}")]
    OsHandler(String),
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Bind(_) => 2,
            Self::OsHandler(_) => 3,
        }
    }
}
