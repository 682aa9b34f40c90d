//! Signal-driven control plane.
//!
//! Signal handlers only wake a dedicated `control` thread; the report and the
//! shutdown both run there, outside signal context. Which thread takes the
//! report signal is decided by signal masks: workers and the control thread
//! block `SIGUSR1`, the acceptor unblocks it, so the kernel can only deliver
//! it to the acceptor.

use crate::context::ServerContext;
use crate::error::{Result, ServerError};
use log::{error, info, warn};
use std::io;
use std::mem::MaybeUninit;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Makes writes to a channel without a reader fail with `BrokenPipe`
/// instead of killing the process.
pub fn ignore_broken_pipe() -> Result<()> {
    // SAFETY: installing SIG_IGN has no handler code to run.
    let previous = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    if previous == libc::SIG_ERR {
        return Err(ServerError::Signal(io::Error::last_os_error()));
    }
    Ok(())
}

fn set_report_mask(how: libc::c_int) -> io::Result<()> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initialises the set before it is read.
    let rc = unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGUSR1);
        libc::pthread_sigmask(how, set.as_ptr(), std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Stops the report signal from being delivered to the calling thread.
/// Threads spawned afterwards inherit the mask.
pub fn block_report_signal() -> io::Result<()> {
    set_report_mask(libc::SIG_BLOCK)
}

/// Lets the report signal be delivered to the calling thread.
pub fn unblock_report_signal() -> io::Result<()> {
    set_report_mask(libc::SIG_UNBLOCK)
}

struct Signals {
    report: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl Signals {
    fn install() -> io::Result<Self> {
        Ok(Self {
            report: signal(SignalKind::user_defined1())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }
}

/// Starts the control thread and waits until its handlers are installed.
///
/// On `SIGINT` / `SIGTERM` the context is torn down and `on_shutdown` runs
/// on the control thread; the binary passes `process::exit` there.
pub fn spawn<F>(ctx: Arc<ServerContext>, on_shutdown: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel::<io::Result<()>>();

    let handle = thread::Builder::new()
        .name("control".to_owned())
        .spawn(move || {
            if let Err(e) = block_report_signal() {
                warn!("Control thread could not mask the report signal: {}", e);
            }
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let signals = match runtime.block_on(async { Signals::install() }) {
                Ok(signals) => signals,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            runtime.block_on(control_loop(&ctx, signals));
            ctx.teardown();
            on_shutdown();
        })
        .map_err(|source| ServerError::Spawn {
            role: "control".to_owned(),
            source,
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => Err(ServerError::Signal(e)),
        Err(_) => Err(ServerError::Signal(io::Error::new(
            io::ErrorKind::Other,
            "control thread exited during startup",
        ))),
    }
}

async fn control_loop(ctx: &ServerContext, mut signals: Signals) {
    loop {
        tokio::select! {
            _ = signals.report.recv() => write_report(ctx),
            _ = signals.interrupt.recv() => {
                info!("Received SIGINT, shutting down");
                return;
            }
            _ = signals.terminate.recv() => {
                info!("Received SIGTERM, shutting down");
                return;
            }
        }
    }
}

fn write_report(ctx: &ServerContext) {
    let path = &ctx.config.report_path;
    match ctx.scoreboard.write_report(path) {
        Ok(()) => info!("Score report written to {}", path.display()),
        Err(e) => error!("Failed to write score report {}: {}", path.display(), e),
    }
}
