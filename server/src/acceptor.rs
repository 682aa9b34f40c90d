//! The acceptor: the only reader of the registration channel.

use crate::context::ServerContext;
use crate::control;
use crate::dispatch::SessionRecord;
use crate::error::Result;
use log::{debug, info, warn};
use shared::fifo;
use shared::{ConnectRequest, ConnectResponse, CONNECT_REQUEST_SIZE};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

/// How long a client gets to open its response channel after writing its
/// connect-request.
pub const RESPONSE_PATIENCE: Duration = Duration::from_secs(2);

/// Reads connect-requests until end-of-channel, answering each one and
/// queueing the accepted sessions.
///
/// Must run on the thread meant to receive the report signal: it unblocks
/// that signal for the calling thread. Enqueueing blocks while every slot of
/// the dispatch queue is taken, which holds back further handshakes.
pub fn run<R: Read>(ctx: &ServerContext, mut registration: R) -> Result<()> {
    if let Err(e) = control::unblock_report_signal() {
        warn!("Acceptor could not unmask the report signal: {}", e);
    }

    let mut buf = [0u8; CONNECT_REQUEST_SIZE];
    loop {
        let n = match registration.read(&mut buf) {
            Ok(0) => {
                info!("Registration channel closed, acceptor stopping");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        let request = match ConnectRequest::decode(&buf[..n]) {
            Ok(request) => request,
            Err(e) => {
                warn!("Discarding connect-request: {}", e);
                continue;
            }
        };

        if let Some(record) = handshake(&request, RESPONSE_PATIENCE) {
            debug!(
                "Queueing session ({} waiting, {} free)",
                ctx.queue.occupied(),
                ctx.queue.free()
            );
            ctx.queue.enqueue(record);
        }
    }
}

/// Answers one connect-request on the client's response channel.
///
/// The request is accepted when the client's request channel exists.
/// Returns the session to queue, or `None` when it was rejected or the
/// response could not be delivered. A client that does not open its response
/// channel within `patience` is dropped.
pub fn handshake(request: &ConnectRequest, patience: Duration) -> Option<SessionRecord> {
    let record = SessionRecord {
        request_pipe: PathBuf::from(&request.request_pipe),
        notify_pipe: PathBuf::from(&request.notify_pipe),
    };
    let accepted = record.request_pipe.exists();
    let response = if accepted {
        ConnectResponse::accepted()
    } else {
        ConnectResponse::rejected()
    };

    let delivered = fifo::open_writer_within(&record.notify_pipe, patience)
        .and_then(|mut notify| notify.write_all(&response.encode()));
    if let Err(e) = delivered {
        warn!(
            "Could not answer client on {}: {}",
            record.notify_pipe.display(),
            e
        );
        return None;
    }

    if accepted {
        info!("Accepted client {}", record.request_pipe.display());
        Some(record)
    } else {
        warn!(
            "Rejected client: request channel {} does not exist",
            record.request_pipe.display()
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServerConfig;
    use std::fs;
    use std::io::Cursor;

    #[test]
    fn test_accepts_rejects_and_skips_garbage() {
        let dir = std::env::temp_dir().join(format!("acceptor_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let ctx = ServerContext::new(ServerConfig {
            levels_dir: dir.clone(),
            pool_size: 2,
            registration_path: dir.join("reg"),
            report_path: dir.join("report.txt"),
        })
        .unwrap();

        // Regular files stand in for the client channels.
        let good_req = dir.join("req_a");
        let good_notif = dir.join("notif_a");
        let bad_notif = dir.join("notif_b");
        fs::write(&good_req, b"").unwrap();
        fs::write(&good_notif, b"").unwrap();
        fs::write(&bad_notif, b"").unwrap();

        let mut input = Vec::new();
        let accepted = ConnectRequest::new(
            good_req.to_string_lossy(),
            good_notif.to_string_lossy(),
        )
        .unwrap();
        let rejected = ConnectRequest::new(
            dir.join("missing").to_string_lossy(),
            bad_notif.to_string_lossy(),
        )
        .unwrap();
        input.extend_from_slice(&accepted.encode());
        let mut garbage = [0u8; CONNECT_REQUEST_SIZE];
        garbage[0] = 9;
        input.extend_from_slice(&garbage);
        input.extend_from_slice(&rejected.encode());

        run(&ctx, Cursor::new(input)).unwrap();

        assert_eq!(ctx.queue.occupied(), 1);
        let record = ctx.queue.dequeue();
        assert_eq!(record.request_pipe, good_req);
        assert_eq!(record.notify_pipe, good_notif);

        assert_eq!(fs::read(&good_notif).unwrap(), vec![1, 0]);
        assert_eq!(fs::read(&bad_notif).unwrap(), vec![1, 1]);

        ctx.teardown();
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_client_gone_before_answer_is_skipped() {
        let dir = std::env::temp_dir().join(format!("acceptor_gone_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let request_pipe = dir.join("req");
        let notify_pipe = dir.join("notif");
        fs::write(&request_pipe, b"").unwrap();
        // A response channel left behind by a client that is no longer there.
        fifo::create(&notify_pipe).unwrap();

        let request = ConnectRequest::new(
            request_pipe.to_string_lossy(),
            notify_pipe.to_string_lossy(),
        )
        .unwrap();
        let start = std::time::Instant::now();
        assert_eq!(handshake(&request, Duration::from_millis(100)), None);
        assert!(start.elapsed() < Duration::from_secs(1));

        fs::remove_dir_all(&dir).unwrap();
    }
}
