//! Thread choreography for one running stage.
//!
//! Every stage runs four roles over one [`SharedBoard`]:
//!
//! - **broadcaster** sends a state-update right away, then once per tick
//!   until the termination flag is raised
//! - **pacman** drives the player entity; its exit value is the stage outcome
//!   and its exit is what triggers teardown
//! - **ghost-N** drives one monster each until termination
//! - **listener** reads client commands into the player's mailbox and
//!   raises the termination flag on disconnect or end-of-channel
//!
//! [`run_stage`] joins the player driver first, raises the flag, then joins
//! the rest. Threads only look at the flag at the top of their loop, after a
//! sleep, or after a blocking wait, so teardown takes at most one tick.

use crate::board::{Board, MoveOutcome};
use crate::state::SharedBoard;
use log::{debug, error, info, warn};
use shared::fifo;
use shared::{ClientRequest, ProtocolError, StateUpdate, MOVE_SIZE};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;

/// How a stage ended, as returned by the player driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The player reached the portal.
    Advance,
    /// The player died.
    Reload,
    /// The client disconnected or went away.
    Quit,
    /// The stage could not run to completion.
    Abandon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub outcome: StageOutcome,
    /// Player score when the stage ended, including earlier stages.
    pub points: i32,
}

fn spawn_role<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    role: String,
    f: F,
) -> io::Result<ScopedJoinHandle<'scope, T>>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    thread::Builder::new().name(role).spawn_scoped(scope, f)
}

fn join_role<T>(role: &str, handle: ScopedJoinHandle<'_, T>) -> Option<T> {
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            error!("Stage thread {} panicked", role);
            None
        }
    }
}

type RoleHandle<'scope> = (String, ScopedJoinHandle<'scope, ()>);

/// Spawns every role of the stage. The player driver's handle is returned;
/// the others are collected into `others` as they start so that a failed
/// spawn still leaves them joinable.
fn start_roles<'scope, 'env, N, R>(
    s: &'scope Scope<'scope, 'env>,
    shared: &'scope SharedBoard,
    notify: &'scope N,
    request: &'scope R,
    ghosts: usize,
    others: &mut Vec<RoleHandle<'scope>>,
) -> io::Result<ScopedJoinHandle<'scope, StageOutcome>>
where
    N: Sync,
    for<'a> &'a N: Write,
    R: AsRawFd + Sync,
    for<'a> &'a R: Read,
{
    let broadcaster = spawn_role(s, "broadcaster".to_owned(), move || broadcast(shared, notify))?;
    others.push(("broadcaster".to_owned(), broadcaster));

    let pacman = spawn_role(s, "pacman".to_owned(), move || drive_pacman(shared))?;

    let listener = spawn_role(s, "listener".to_owned(), move || listen(shared, request))?;
    others.push(("listener".to_owned(), listener));

    for index in 0..ghosts {
        let role = format!("ghost-{}", index);
        let ghost = spawn_role(s, role.clone(), move || drive_ghost(shared, index))?;
        others.push((role, ghost));
    }
    Ok(pacman)
}

/// Runs one stage to its end over the session's two channels.
///
/// `notify` carries state-updates to the client, `request` carries its
/// commands. Both stay open afterwards so the next stage can reuse them.
pub fn run_stage<N, R>(board: Board, notify: &N, request: &R) -> StageReport
where
    N: Sync,
    for<'a> &'a N: Write,
    R: AsRawFd + Sync,
    for<'a> &'a R: Read,
{
    let name = board.name.clone();
    let ghosts = board.ghosts.len();
    let shared = SharedBoard::new(board);
    info!("Stage {} started with {} monsters", name, ghosts);

    let outcome = thread::scope(|s| {
        let mut others = Vec::with_capacity(ghosts + 2);
        let outcome = match start_roles(s, &shared, notify, request, ghosts, &mut others) {
            Ok(pacman) => join_role("pacman", pacman).unwrap_or(StageOutcome::Abandon),
            Err(e) => {
                error!("Failed to start stage {}: {}", name, e);
                StageOutcome::Abandon
            }
        };

        shared.request_shutdown();
        for (role, handle) in others {
            join_role(&role, handle);
        }
        outcome
    });

    let board = shared.into_inner();
    if matches!(outcome, StageOutcome::Advance | StageOutcome::Reload) {
        if let Err(e) = board.snapshot().map(|update| send_update(notify, &update)) {
            warn!("Could not build final frame for {}: {}", name, e);
        }
    }

    let points = board.player_points();
    info!("Stage {} ended: {:?} with {} points", name, outcome, points);
    StageReport { outcome, points }
}

/// Writes one state-update. Returns false when the client is unreachable.
fn send_update<N>(notify: &N, update: &StateUpdate) -> bool
where
    for<'a> &'a N: Write,
{
    let mut writer = notify;
    match writer.write_all(&update.encode()) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("Client stopped reading state updates");
            false
        }
        Err(e) => {
            warn!("Failed to send state update: {}", e);
            false
        }
    }
}

fn send_snapshot<N>(shared: &SharedBoard, notify: &N) -> bool
where
    for<'a> &'a N: Write,
{
    match shared.snapshot() {
        Ok(update) => send_update(notify, &update),
        Err(e) => {
            error!("Failed to encode state update: {}", e);
            false
        }
    }
}

fn broadcast<N>(shared: &SharedBoard, notify: &N)
where
    for<'a> &'a N: Write,
{
    let tempo = shared.read().tempo;
    if !send_snapshot(shared, notify) {
        shared.request_shutdown();
        return;
    }
    loop {
        thread::sleep(tempo);
        if shared.is_shutdown() {
            break;
        }
        if !send_snapshot(shared, notify) {
            shared.request_shutdown();
            break;
        }
    }
}

fn drive_pacman(shared: &SharedBoard) -> StageOutcome {
    let mut rng = rand::thread_rng();
    loop {
        let delay = {
            let board = shared.read();
            if !board.player_alive() {
                return StageOutcome::Reload;
            }
            board.pacman_delay()
        };
        thread::sleep(delay);

        let outcome = {
            let mut board = shared.write();
            if board.shutdown {
                return StageOutcome::Quit;
            }
            let order = board.take_player_order();
            board.move_pacman(0, order, &mut rng)
        };
        match outcome {
            MoveOutcome::ReachedPortal => return StageOutcome::Advance,
            MoveOutcome::Dead => return StageOutcome::Reload,
            MoveOutcome::Valid | MoveOutcome::Invalid => {}
        }
    }
}

fn drive_ghost(shared: &SharedBoard, index: usize) {
    let mut rng = rand::thread_rng();
    loop {
        let delay = shared.read().ghost_delay(index);
        thread::sleep(delay);

        let mut board = shared.write();
        if board.shutdown {
            return;
        }
        board.move_ghost(index, &mut rng);
    }
}

/// Outcome of reading one framed request.
enum Received {
    Request(ClientRequest),
    Malformed(ProtocolError),
    Closed,
}

/// Reads one request: the opcode byte, then the rest of its fixed size.
///
/// The rest must become readable within `patience`; a request cut short is
/// reported as malformed so the caller never blocks on a silent peer.
fn read_request<R>(request: &R, patience: Duration) -> io::Result<Received>
where
    R: AsRawFd,
    for<'a> &'a R: Read,
{
    let mut reader = request;
    let mut buf = [0u8; MOVE_SIZE];
    if reader.read(&mut buf[..1])? == 0 {
        return Ok(Received::Closed);
    }
    let Some(size) = ClientRequest::size_for(buf[0]) else {
        return Ok(Received::Malformed(ProtocolError::UnknownOpcode(buf[0])));
    };
    let mut filled = 1;
    if size > filled {
        if !fifo::wait_readable(request.as_raw_fd(), patience)? {
            return Ok(Received::Malformed(ProtocolError::WrongSize {
                kind: "client request",
                expected: size,
                actual: filled,
            }));
        }
        filled += reader.read(&mut buf[filled..size])?;
    }
    Ok(match ClientRequest::decode(&buf[..filled]) {
        Ok(req) => Received::Request(req),
        Err(e) => Received::Malformed(e),
    })
}

fn listen<R>(shared: &SharedBoard, request: &R)
where
    R: AsRawFd,
    for<'a> &'a R: Read,
{
    let tempo = shared.read().tempo;
    loop {
        if shared.is_shutdown() {
            return;
        }
        match fifo::wait_readable(request.as_raw_fd(), tempo) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("Request channel wait failed: {}", e);
                shared.request_shutdown();
                return;
            }
        }

        match read_request(request, tempo) {
            Ok(Received::Request(ClientRequest::Move(key))) => {
                debug!("Client command {:?}", key as char);
                shared.post_command(key);
            }
            Ok(Received::Request(ClientRequest::Disconnect)) => {
                info!("Client requested disconnect");
                shared.request_shutdown();
                return;
            }
            Ok(Received::Malformed(e)) => warn!("Discarding client request: {}", e),
            Ok(Received::Closed) => {
                info!("Client closed its request channel");
                shared.request_shutdown();
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Request channel read failed: {}", e);
                shared.request_shutdown();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::tests::board_from_rows;
    use crate::board::Step;
    use shared::{StageState, StateUpdate, OP_MOVE, STATE_UPDATE_SIZE};
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    struct Client {
        notify: UnixStream,
        request: UnixStream,
    }

    fn start(board: Board) -> (Client, JoinHandle<StageReport>) {
        let (notify_srv, notify) = UnixStream::pair().unwrap();
        let (request_srv, request) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || run_stage(board, &notify_srv, &request_srv));
        (Client { notify, request }, handle)
    }

    fn read_frames(mut stream: UnixStream) -> Vec<StateUpdate> {
        let mut frames = Vec::new();
        let mut buf = vec![0u8; STATE_UPDATE_SIZE];
        while stream.read_exact(&mut buf).is_ok() {
            frames.push(StateUpdate::decode(&buf).unwrap());
        }
        frames
    }

    fn scripted(rows: &[&str], script: &[u8]) -> Board {
        let mut board = board_from_rows(rows);
        board.pacmans[0].moves = script.iter().map(|&k| Step::new(k, 1)).collect();
        board
    }

    #[test]
    fn test_portal_advances_with_final_frame() {
        let (client, handle) = start(scripted(&["C.@"], b"D"));
        let frames = std::thread::spawn(move || read_frames(client.notify));

        let report = handle.join().unwrap();
        assert_eq!(report.outcome, StageOutcome::Advance);
        assert_eq!(report.points, 1);

        drop(client.request);
        let frames = frames.join().unwrap();
        assert_eq!(frames.first().unwrap().state, StageState::Playing);
        let last = frames.last().unwrap();
        assert_eq!(last.state, StageState::Won);
        assert_eq!(last.points, 1);
    }

    #[test]
    fn test_ghost_kill_reloads() {
        let mut board = board_from_rows(&["#CM#"]);
        board.ghosts[0].moves = vec![Step::new(b'A', 1)];
        let (client, handle) = start(board);
        let frames = std::thread::spawn(move || read_frames(client.notify));

        let report = handle.join().unwrap();
        assert_eq!(report.outcome, StageOutcome::Reload);
        drop(client.request);
        let frames = frames.join().unwrap();
        assert_eq!(frames.last().unwrap().state, StageState::Lost);
        assert_eq!(frames.last().unwrap().lives, 0);
    }

    #[test]
    fn test_disconnect_quits_within_a_tick() {
        let (mut client, handle) = start(board_from_rows(&["C   "]));
        std::thread::sleep(Duration::from_millis(30));

        let sent = Instant::now();
        client
            .request
            .write_all(&ClientRequest::Disconnect.encode())
            .unwrap();
        let report = handle.join().unwrap();

        assert_eq!(report.outcome, StageOutcome::Quit);
        assert!(sent.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_closed_request_channel_quits() {
        let (client, handle) = start(board_from_rows(&["C   "]));
        drop(client.request);
        assert_eq!(handle.join().unwrap().outcome, StageOutcome::Quit);
    }

    #[test]
    fn test_player_command_drives_pacman() {
        let (mut client, handle) = start(board_from_rows(&["#C@#"]));
        client.request.write_all(&[9]).unwrap();
        client
            .request
            .write_all(&ClientRequest::Move(b'd').encode())
            .unwrap();

        let report = handle.join().unwrap();
        assert_eq!(report.outcome, StageOutcome::Advance);
    }

    #[test]
    fn test_half_sent_move_does_not_hold_teardown() {
        let (mut client, handle) = start(scripted(&["#C.@#"], b"D"));
        client.request.write_all(&[OP_MOVE]).unwrap();
        let frames = std::thread::spawn(move || read_frames(client.notify));

        let (done_tx, done_rx) = mpsc::channel();
        std::thread::spawn(move || done_tx.send(handle.join().unwrap()).unwrap());
        let report = done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("stage waited for the rest of the command");
        assert_eq!(report.outcome, StageOutcome::Advance);

        drop(client.request);
        assert_eq!(frames.join().unwrap().last().unwrap().state, StageState::Won);
    }

    #[test]
    fn test_command_split_across_writes_is_applied() {
        let (mut client, handle) = start(board_from_rows(&["#C@#"]));
        client.request.write_all(&[OP_MOVE]).unwrap();
        client.request.write_all(&[b'D']).unwrap();

        let report = handle.join().unwrap();
        assert_eq!(report.outcome, StageOutcome::Advance);
    }

    #[test]
    fn test_vanished_client_ends_stage() {
        let (client, handle) = start(board_from_rows(&["C   "]));
        drop(client.notify);
        let report = handle.join().unwrap();
        assert_eq!(report.outcome, StageOutcome::Quit);
        drop(client.request);
    }
}
