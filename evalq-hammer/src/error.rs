use std::time::Duration;

use thiserror::Error;

use evalq::{ConfigError, ControllerError};

#[derive(Debug, Error)]
pub enum HammerError {
    /// Bad command line. An empty message means help was requested.
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("failed to spawn host worker: {0}")]
    Spawn(String),

    #[error("batch did not drain within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HammerError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, HammerError>;
