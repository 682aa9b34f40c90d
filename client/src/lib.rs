//! # Game Client Library
//!
//! This library implements the client side of the grid chase game server.
//! A client owns two private named channels, registers them with the server
//! through the shared registration channel, and then plays one session:
//! commands flow out on the request channel while state-updates stream back
//! on the response channel.
//!
//! ## Session Lifecycle
//!
//! ### Handshake
//! The client writes one connect-request naming its two channels and waits,
//! within a bounded timeout, for the connect-response. A registration channel
//! that does not exist or that nobody reads is refused at once rather than
//! blocking the client.
//!
//! ### Waiting for a Worker
//! An accepted session sits in the server's dispatch queue until a worker
//! is free. The client simply blocks opening its response channel; the first
//! state-update arrives as soon as a worker takes the session.
//!
//! ### Playing
//! A command pump thread forwards keystrokes (or a scripted command file)
//! while the render loop redraws the terminal for every state-update. The
//! session ends when the server closes the response channel.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Key mapping and the command pump:
//! - `w`/`a`/`s`/`d` become move requests, `q` a disconnect
//! - scripted commands are replayed 100 ms apart
//! - an exhausted source always ends with a disconnect
//!
//! ### Network Module (`network`)
//! Private channel lifetime, the handshake and the session loop.
//!
//! ### Rendering Module (`rendering`)
//! Text frames for the terminal: status line, board and outcome banner.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::CommandSource;
//! use client::network::Client;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("1", "/tmp/pacman_registry".into(), Duration::from_secs(5))?;
//!
//!     // Commands come from stdin, frames go to stdout.
//!     let summary = client.run(CommandSource::Interactive, std::io::stdout()).await?;
//!     println!("{} frames received", summary.frames);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod input;
pub mod network;
pub mod rendering;

pub use error::ClientError;
