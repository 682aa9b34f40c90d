use std::io;
use std::path::PathBuf;

/// Failures that stop the server before or while it starts serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("worker pool size must be at least 1")]
    EmptyPool,

    #[error("failed to create registration channel {path}: {source}")]
    ChannelCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to install signal handling: {0}")]
    Signal(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
