use clap::Parser;
use client::input::CommandSource;
use client::network::Client;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client identifier, used to name the private channels
    id: String,

    /// Path of the server's registration FIFO
    registration_fifo: PathBuf,

    /// Command file with one command character per line (default: stdin)
    commands_file: Option<PathBuf>,

    /// How long to wait for the server to answer the connect-request
    #[arg(long, default_value = "5000")]
    handshake_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let source = match &args.commands_file {
        Some(path) => CommandSource::from_file(path)?,
        None => CommandSource::Interactive,
    };

    let client = Client::new(
        &args.id,
        args.registration_fifo.clone(),
        Duration::from_millis(args.handshake_timeout_ms),
    )?;
    info!(
        "Connecting to {} as client {}",
        args.registration_fifo.display(),
        args.id
    );

    let outcome = tokio::select! {
        result = client.run(source, std::io::stdout()) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(result) => {
            let summary = result?;
            info!("Received {} updates", summary.frames);
            Ok(())
        }
        None => {
            warn!("Interrupted, removing channels");
            // Blocking channel opens may still be parked; leave without
            // waiting for them.
            drop(client);
            std::process::exit(130);
        }
    }
}
