use shared::{ProtocolError, PIPE_NAME_SIZE};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything that can end a client before or during its session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection refused: no server is reading {0}")]
    ConnectionRefused(PathBuf),

    #[error("server rejected the connection (code {0})")]
    Rejected(u8),

    #[error("no answer from the server within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("channel name {0} does not fit in {PIPE_NAME_SIZE} bytes")]
    NameTooLong(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
