//! Process-scoped state shared by the acceptor, the workers and the control
//! plane.

use crate::dispatch::{DispatchQueue, SessionRecord};
use crate::error::{Result, ServerError};
use crate::scoreboard::ScoreBoard;
use log::{info, warn};
use shared::fifo;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Startup settings of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory holding the level files.
    pub levels_dir: PathBuf,
    /// Number of workers, and so of concurrent sessions.
    pub pool_size: usize,
    /// Path of the registration channel.
    pub registration_path: PathBuf,
    /// Where the score report is written.
    pub report_path: PathBuf,
}

/// Everything the server threads share, built once at startup.
#[derive(Debug)]
pub struct ServerContext {
    pub config: ServerConfig,
    pub queue: DispatchQueue<SessionRecord>,
    pub scoreboard: ScoreBoard,
    torn_down: AtomicBool,
}

impl ServerContext {
    /// Validates the configuration and creates the registration channel.
    pub fn new(config: ServerConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(ServerError::EmptyPool);
        }
        fifo::create(&config.registration_path).map_err(|source| ServerError::ChannelCreate {
            path: config.registration_path.clone(),
            source,
        })?;
        info!(
            "Registration channel ready at {}",
            config.registration_path.display()
        );

        Ok(Self {
            queue: DispatchQueue::new(config.pool_size),
            scoreboard: ScoreBoard::new(),
            torn_down: AtomicBool::new(false),
            config,
        })
    }

    /// Opens the registration channel for the acceptor.
    ///
    /// The channel is opened for reading and writing so the open does not
    /// wait for a first client and the acceptor does not see end-of-channel
    /// every time a client closes its end.
    pub fn open_registration(&self) -> Result<File> {
        Ok(fifo::open_read_write(&self.config.registration_path)?)
    }

    /// Removes the registration channel. Runs at most once.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        match fifo::remove(&self.config.registration_path) {
            Ok(()) => info!(
                "Removed registration channel {}",
                self.config.registration_path.display()
            ),
            Err(e) => warn!("Failed to remove registration channel: {}", e),
        }
    }
}
