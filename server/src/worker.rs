//! Worker pool: long-lived threads that each serve one session at a time.

use crate::context::ServerContext;
use crate::control;
use crate::dispatch::SessionRecord;
use crate::error::{Result, ServerError};
use crate::level::resolve_stages;
use crate::session::run_session;
use log::{error, info, warn};
use shared::fifo;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Starts `pool_size` workers sharing `ctx`.
pub fn spawn_pool(ctx: &Arc<ServerContext>) -> Result<Vec<JoinHandle<()>>> {
    (0..ctx.config.pool_size)
        .map(|id| {
            let ctx = Arc::clone(ctx);
            thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || run_worker(&ctx, id))
                .map_err(|source| ServerError::Spawn {
                    role: format!("worker-{}", id),
                    source,
                })
        })
        .collect()
}

/// Consumer loop of one worker. Never returns.
pub fn run_worker(ctx: &ServerContext, id: usize) {
    // Before anything else, so the report signal only ever lands on the
    // acceptor.
    if let Err(e) = control::block_report_signal() {
        error!("Worker {} could not mask the report signal: {}", id, e);
    }
    info!("Worker {} ready", id);

    loop {
        let record = ctx.queue.dequeue();
        serve(ctx, id, &record);
    }
}

/// Serves one dequeued session from channel opening to score finalisation.
///
/// A session without stages is abandoned: both channels are opened and
/// closed again so the client sees end-of-channel, and no score entry is
/// created.
pub fn serve(ctx: &ServerContext, id: usize, record: &SessionRecord) {
    let stages = match resolve_stages(&ctx.config.levels_dir) {
        Ok(stages) => stages,
        Err(e) => {
            warn!(
                "Worker {}: cannot list levels in {}: {}",
                id,
                ctx.config.levels_dir.display(),
                e
            );
            Vec::new()
        }
    };

    let notify = match fifo::open_writer(&record.notify_pipe) {
        Ok(file) => file,
        Err(e) => {
            warn!(
                "Worker {}: cannot open {}: {}",
                id,
                record.notify_pipe.display(),
                e
            );
            return;
        }
    };
    let request = match fifo::open_reader(&record.request_pipe) {
        Ok(file) => file,
        Err(e) => {
            warn!(
                "Worker {}: cannot open {}: {}",
                id,
                record.request_pipe.display(),
                e
            );
            return;
        }
    };

    if stages.is_empty() {
        warn!("Worker {}: no stages available, abandoning session", id);
        return;
    }

    let slot = ctx.scoreboard.register();
    match &slot {
        Some(slot) => info!("Worker {} serving client {}", id, slot.client_id()),
        None => warn!("Worker {}: score board full, session is not ranked", id),
    }

    let summary = run_session(&stages, &notify, &request, |points| {
        if let Some(slot) = &slot {
            ctx.scoreboard.update(slot, points);
        }
    });

    if let Some(slot) = slot {
        ctx.scoreboard.finish(slot, summary.points);
    }
    // The client only sees end-of-channel once its entry is final.
    drop(notify);
    drop(request);
    info!(
        "Worker {}: session ended {:?} after {} stages with {} points",
        id, summary.outcome, summary.stages_played, summary.points
    );
}
