//! Runs a session: the session's stages in order over one pair of channels.

use crate::level::load_level;
use crate::stage::{run_stage, StageOutcome};
use log::{info, warn};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

/// How a whole session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every stage was cleared.
    Completed,
    /// The player died.
    Lost,
    /// The client left.
    Quit,
    /// A stage could not be loaded or run.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub outcome: SessionOutcome,
    pub points: i32,
    pub stages_played: usize,
}

/// Plays `stages` in order until one does not end with `Advance`.
///
/// Points carry over from stage to stage. `on_progress` receives the
/// running score after every stage.
pub fn run_session<N, R, F>(
    stages: &[PathBuf],
    notify: &N,
    request: &R,
    mut on_progress: F,
) -> SessionSummary
where
    N: Sync,
    for<'a> &'a N: Write,
    R: AsRawFd + Sync,
    for<'a> &'a R: Read,
    F: FnMut(i32),
{
    let mut points = 0;
    let mut stages_played = 0;

    for path in stages {
        let board = match load_level(path, points) {
            Ok(board) => board,
            Err(e) => {
                warn!("Abandoning session: {}", e);
                return SessionSummary {
                    outcome: SessionOutcome::Abandoned,
                    points,
                    stages_played,
                };
            }
        };

        let report = run_stage(board, notify, request);
        stages_played += 1;
        points = report.points;
        on_progress(points);

        let outcome = match report.outcome {
            StageOutcome::Advance => continue,
            StageOutcome::Reload => SessionOutcome::Lost,
            StageOutcome::Quit => SessionOutcome::Quit,
            StageOutcome::Abandon => SessionOutcome::Abandoned,
        };
        return SessionSummary {
            outcome,
            points,
            stages_played,
        };
    }

    info!("All {} stages cleared with {} points", stages_played, points);
    SessionSummary {
        outcome: SessionOutcome::Completed,
        points,
        stages_played,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::net::UnixStream;
    use std::path::Path;

    const RUN_RIGHT: &str = "DIM 1 4\nTEMPO 10\nPAC right.p\nP.@X\n";

    fn level_dir(tag: &str, levels: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("session_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("right.p"), "D\n").unwrap();
        for (name, text) in levels {
            fs::write(dir.join(name), text).unwrap();
        }
        dir
    }

    fn play(dir: &Path, names: &[&str]) -> (SessionSummary, Vec<i32>) {
        let stages: Vec<PathBuf> = names.iter().map(|n| dir.join(n)).collect();
        let (notify, notify_client) = UnixStream::pair().unwrap();
        let (request, _request_client) = UnixStream::pair().unwrap();
        let drain = std::thread::spawn(move || {
            let mut sink = Vec::new();
            let mut notify_client = notify_client;
            let _ = notify_client.read_to_end(&mut sink);
        });

        let mut progress = Vec::new();
        let summary = run_session(&stages, &notify, &request, |p| progress.push(p));
        drop(notify);
        drain.join().unwrap();
        (summary, progress)
    }

    #[test]
    fn test_points_carry_across_stages() {
        let dir = level_dir("carry", &[("1.lvl", RUN_RIGHT), ("2.lvl", RUN_RIGHT)]);
        let (summary, progress) = play(&dir, &["1.lvl", "2.lvl"]);

        assert_eq!(summary.outcome, SessionOutcome::Completed);
        assert_eq!(summary.stages_played, 2);
        assert_eq!(summary.points, 2);
        assert_eq!(progress, vec![1, 2]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unloadable_stage_abandons() {
        let dir = level_dir("broken", &[("1.lvl", RUN_RIGHT), ("2.lvl", "no dimensions\n")]);
        let (summary, progress) = play(&dir, &["1.lvl", "2.lvl", "3.lvl"]);

        assert_eq!(summary.outcome, SessionOutcome::Abandoned);
        assert_eq!(summary.stages_played, 1);
        assert_eq!(summary.points, 1);
        assert_eq!(progress, vec![1]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_death_ends_session() {
        let deadly = "DIM 1 3\nTEMPO 10\nMON left.m\nP M\n";
        let dir = level_dir("death", &[("1.lvl", deadly), ("2.lvl", RUN_RIGHT)]);
        fs::write(dir.join("left.m"), "A\n").unwrap();

        let (summary, _) = play(&dir, &["1.lvl", "2.lvl"]);
        assert_eq!(summary.outcome, SessionOutcome::Lost);
        assert_eq!(summary.stages_played, 1);
        fs::remove_dir_all(&dir).unwrap();
    }
}
