//! Process-wide score board and the top-five report.

use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Number of sessions the board tracks at once.
pub const SCOREBOARD_SLOTS: usize = 100;
/// Entries listed in a report.
pub const REPORT_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreEntry {
    pub client_id: u32,
    pub score: i32,
    pub active: bool,
}

/// Handle to the entry a worker owns for the length of one session.
#[derive(Debug, PartialEq, Eq)]
pub struct ScoreSlot {
    index: usize,
    client_id: u32,
}

impl ScoreSlot {
    pub fn client_id(&self) -> u32 {
        self.client_id
    }
}

#[derive(Debug)]
struct Entries {
    slots: Vec<Option<ScoreEntry>>,
    next_client_id: u32,
}

/// Scores of current and finished sessions, behind one mutex that no
/// session lock ever nests with.
#[derive(Debug)]
pub struct ScoreBoard {
    entries: Mutex<Entries>,
}

impl Default for ScoreBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                slots: vec![None; SCOREBOARD_SLOTS],
                next_client_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens an active entry for a new session.
    ///
    /// Uses a free slot, or recycles the lowest-scoring finished entry when
    /// the board is full. Returns `None` when every slot is active.
    pub fn register(&self) -> Option<ScoreSlot> {
        let mut entries = self.lock();
        let index = match entries.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => entries
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, e)| e.filter(|e| !e.active).map(|e| (i, e.score)))
                .min_by_key(|&(_, score)| score)
                .map(|(i, _)| i)?,
        };

        let client_id = entries.next_client_id;
        entries.next_client_id += 1;
        entries.slots[index] = Some(ScoreEntry {
            client_id,
            score: 0,
            active: true,
        });
        Some(ScoreSlot { index, client_id })
    }

    pub fn update(&self, slot: &ScoreSlot, score: i32) {
        let mut entries = self.lock();
        if let Some(entry) = entries.slots[slot.index].as_mut() {
            entry.score = score;
        }
    }

    /// Records the final score and marks the session as no longer playing.
    pub fn finish(&self, slot: ScoreSlot, score: i32) {
        let mut entries = self.lock();
        if let Some(entry) = entries.slots[slot.index].as_mut() {
            entry.score = score;
            entry.active = false;
        }
    }

    fn ranked(entries: &Entries, limit: usize) -> Vec<ScoreEntry> {
        let mut ranked: Vec<ScoreEntry> = entries
            .slots
            .iter()
            .flatten()
            .filter(|e| e.score > 0 || e.active)
            .copied()
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked.truncate(limit);
        ranked
    }

    /// Highest scores first, at most `limit` entries, skipping finished
    /// sessions that never scored.
    pub fn top(&self, limit: usize) -> Vec<ScoreEntry> {
        Self::ranked(&self.lock(), limit)
    }

    /// Writes the top-five report to `path`, holding the board lock until
    /// the file is written.
    pub fn write_report(&self, path: &Path) -> io::Result<()> {
        let entries = self.lock();
        let report = render_report(&Self::ranked(&entries, REPORT_SIZE));
        std::fs::write(path, report)
    }
}

/// Text of the score report for already ranked entries.
pub fn render_report(ranked: &[ScoreEntry]) -> String {
    let mut report = String::from("=== TOP 5 SCORES ===\n");
    if ranked.is_empty() {
        report.push_str("No scores recorded yet.\n");
    }
    for (rank, entry) in ranked.iter().enumerate() {
        report.push_str(&format!(
            "{}. Client {}: {} points{}\n",
            rank + 1,
            entry.client_id,
            entry.score,
            if entry.active { " (playing)" } else { "" }
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_register_assigns_increasing_ids() {
        let board = ScoreBoard::new();
        let a = board.register().unwrap();
        let b = board.register().unwrap();
        assert_eq!(a.client_id(), 1);
        assert_eq!(b.client_id(), 2);
    }

    #[test]
    fn test_report_format() {
        let board = ScoreBoard::new();
        assert_eq!(
            render_report(&board.top(REPORT_SIZE)),
            "=== TOP 5 SCORES ===\nNo scores recorded yet.\n"
        );

        let first = board.register().unwrap();
        let second = board.register().unwrap();
        let idle = board.register().unwrap();
        board.update(&first, 3);
        board.finish(second, 12);
        board.finish(idle, 0);

        assert_eq!(
            render_report(&board.top(REPORT_SIZE)),
            "=== TOP 5 SCORES ===\n\
             1. Client 2: 12 points\n\
             2. Client 1: 3 points (playing)\n"
        );
    }

    #[test]
    fn test_full_board_recycles_finished_entries() {
        let board = ScoreBoard::new();
        let mut slots: Vec<_> = (0..SCOREBOARD_SLOTS)
            .map(|_| board.register().unwrap())
            .collect();
        assert!(board.register().is_none());

        let low = slots.remove(10);
        let high = slots.remove(20);
        board.finish(high, 50);
        board.finish(low, 1);

        let recycled = board.register().unwrap();
        assert_eq!(recycled.client_id(), SCOREBOARD_SLOTS as u32 + 1);
        let top = board.top(SCOREBOARD_SLOTS);
        assert!(top.iter().any(|e| e.score == 50));
        assert!(!top.iter().any(|e| e.score == 1));
    }

    #[test]
    fn test_top_five_under_concurrent_sessions() {
        let board = Arc::new(ScoreBoard::new());
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let board = Arc::clone(&board);
                thread::spawn(move || {
                    let slot = board.register().unwrap();
                    for score in 0..=i {
                        board.update(&slot, score);
                        let top = board.top(REPORT_SIZE);
                        assert!(top.len() <= REPORT_SIZE);
                        assert!(top.windows(2).all(|w| w[0].score >= w[1].score));
                    }
                    slot
                })
            })
            .collect();
        let slots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let top = board.top(REPORT_SIZE);
        let scores: Vec<i32> = top.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![49, 48, 47, 46, 45]);
        assert!(top.iter().all(|e| e.active));

        for slot in slots {
            board.finish(slot, 1);
        }
        assert!(board.top(REPORT_SIZE).iter().all(|e| !e.active));
    }

    #[test]
    fn test_write_report_file() {
        let board = ScoreBoard::new();
        let slot = board.register().unwrap();
        board.update(&slot, 7);

        let path = std::env::temp_dir().join(format!("score_report_{}.txt", std::process::id()));
        board.write_report(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "=== TOP 5 SCORES ===\n1. Client 1: 7 points (playing)\n");
        std::fs::remove_file(&path).unwrap();
    }
}
