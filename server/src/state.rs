//! Lock-guarded simulation state shared by the threads of one stage.

use crate::board::Board;
use shared::{ProtocolError, StateUpdate};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One stage's [`Board`] behind a single reader-writer lock.
///
/// Reads (snapshots, termination checks) may overlap each other; every
/// mutation is exclusive. A poisoned lock is recovered rather than
/// propagated so that a panicking stage thread cannot wedge its siblings.
#[derive(Debug)]
pub struct SharedBoard {
    inner: RwLock<Board>,
}

impl SharedBoard {
    pub fn new(board: Board) -> Self {
        Self {
            inner: RwLock::new(board),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Board> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Board> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_shutdown(&self) -> bool {
        self.read().shutdown
    }

    /// Raises the termination flag observed by every stage thread.
    pub fn request_shutdown(&self) {
        self.write().shutdown = true;
    }

    /// Stores a player command in the single-slot mailbox.
    pub fn post_command(&self, key: u8) {
        self.write().post_command(key);
    }

    /// Consistent copy of the board, taken under the read lock.
    pub fn snapshot(&self) -> Result<StateUpdate, ProtocolError> {
        self.read().snapshot()
    }

    /// Releases the board once every stage thread has been joined.
    pub fn into_inner(self) -> Board {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
