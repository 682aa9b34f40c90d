//! # Game Session Server Library
//!
//! This library implements a concurrent session server for a grid chase
//! game. Clients register over one well-known named channel (FIFO), are
//! handed to a fixed pool of worker threads, and play a sequence of stages
//! while the server streams the board to them.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! A single acceptor thread reads fixed-size connect-requests from the
//! registration channel, answers each on the client's response channel and
//! queues the accepted sessions. The queue holds as many sessions as there
//! are workers; when it is full the acceptor stops answering until a worker
//! frees a slot.
//!
//! ### Session Execution
//! Each worker dequeues one session at a time, resolves the stage list from
//! the levels directory and runs the stages in order. Points carry from one
//! stage to the next, and the worker keeps the session's score board entry
//! current.
//!
//! ### Stage Choreography
//! A running stage is four cooperating thread roles over one board behind a
//! reader-writer lock: a broadcaster streaming state-updates every tick, the
//! player driver, one driver per monster, and a command listener. The stage
//! ends when the player driver returns.
//!
//! ### Control Plane
//! `SIGUSR1` writes the top-five score report, `SIGINT` / `SIGTERM` remove
//! the registration channel and exit, and `SIGPIPE` is ignored so a vanished
//! client only ever shows up as a `BrokenPipe` error on a write.
//!
//! ## Module Organization
//!
//! ### Dispatch Module (`dispatch`)
//! Bounded ring of pending sessions coordinated by a mutex and two counting
//! semaphores.
//!
//! ### Acceptor / Worker Modules (`acceptor`, `worker`)
//! The handshake loop and the worker pool consuming the dispatch queue.
//!
//! ### Session / Stage Modules (`session`, `stage`, `state`)
//! The stage sequence of one session and the per-stage thread roles sharing
//! a [`state::SharedBoard`].
//!
//! ### Board / Level Modules (`board`, `level`)
//! Movement rules and level file loading.
//!
//! ### Control / Score Board Modules (`control`, `scoreboard`)
//! Signal handling, signal masks and the process-wide score board.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::context::{ServerConfig, ServerContext};
//! use server::{acceptor, control, worker};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     control::ignore_broken_pipe()?;
//!     let ctx = Arc::new(ServerContext::new(ServerConfig {
//!         levels_dir: "levels".into(),
//!         pool_size: 4,
//!         registration_path: "/tmp/pacman_registry".into(),
//!         report_path: "score_log.txt".into(),
//!     })?);
//!
//!     // Report and shutdown signals are served on their own thread.
//!     let _control = control::spawn(Arc::clone(&ctx), || std::process::exit(0))?;
//!     let _workers = worker::spawn_pool(&ctx)?;
//!
//!     // The acceptor runs on the calling thread until the channel closes.
//!     let registration = ctx.open_registration()?;
//!     acceptor::run(&ctx, registration)?;
//!     ctx.teardown();
//!     Ok(())
//! }
//! ```

pub mod acceptor;
pub mod board;
pub mod context;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod level;
pub mod scoreboard;
pub mod session;
pub mod stage;
pub mod state;
pub mod worker;

pub use error::ServerError;
