use clap::Parser;
use log::info;
use server::context::{ServerConfig, ServerContext};
use server::{acceptor, control, worker};
use std::path::PathBuf;
use std::sync::Arc;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the level files (*.lvl, *.txt)
    levels_dir: PathBuf,

    /// Maximum number of games played at the same time
    max_games: usize,

    /// Path of the registration FIFO clients connect through
    registration_fifo: PathBuf,

    /// File the score report is written to on SIGUSR1
    #[arg(long, default_value = "score_log.txt")]
    report_file: PathBuf,
}

/// Parses the command line and builds the server context. The registration
/// channel is removed on every way out of `serve`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    control::ignore_broken_pipe()?;

    let ctx = Arc::new(ServerContext::new(ServerConfig {
        levels_dir: args.levels_dir,
        pool_size: args.max_games,
        registration_path: args.registration_fifo,
        report_path: args.report_file,
    })?);

    let result = serve(&ctx);
    ctx.teardown();
    result
}

/// Starts the control plane and the worker pool, then runs the acceptor on
/// the calling thread until the registration channel closes.
fn serve(ctx: &Arc<ServerContext>) -> Result<(), Box<dyn std::error::Error>> {
    let _control = control::spawn(Arc::clone(ctx), || std::process::exit(0))?;
    let _workers = worker::spawn_pool(ctx)?;

    info!(
        "Server started: {} workers, levels from {}",
        ctx.config.pool_size,
        ctx.config.levels_dir.display()
    );
    info!("Send SIGUSR1 to write the score report");

    let registration = ctx.open_registration()?;
    acceptor::run(ctx, registration)?;
    Ok(())
}
