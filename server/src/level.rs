//! Stage definitions: level files, behavior scripts and stage resolution.
//!
//! A level file is line oriented. Blank lines and `#` comments are skipped;
//! `DIM <h> <w>`, `TEMPO <ms>`, `PAC <file>` and `MON <file>...` are
//! directives; any other line after `DIM` is a map row until the grid is
//! full. Behavior files referenced by `PAC` / `MON` are resolved relative to
//! the level file's directory.

use crate::board::{Board, Ghost, Pacman, Step, Tile, MAX_GHOSTS, MAX_MOVES};
use log::{debug, warn};
use shared::MAX_BOARD_SIZE;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Most stages a single session plays.
pub const MAX_LEVELS: usize = 32;
/// Tick period used when a level omits `TEMPO` or sets it to zero.
pub const DEFAULT_TEMPO: Duration = Duration::from_millis(100);

const LEVEL_EXTENSIONS: [&str; 2] = ["lvl", "txt"];

#[derive(Debug, thiserror::Error)]
pub enum LevelError {
    #[error("cannot read stage file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stage {name} has no valid DIM line")]
    MissingDimensions { name: String },

    #[error("stage {name} is {width}x{height}, more than {MAX_BOARD_SIZE} cells")]
    TooLarge {
        name: String,
        width: usize,
        height: usize,
    },
}

/// Parsed contents of a behavior file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Behavior {
    pub passo: u32,
    /// Start position as `(x, y)`.
    pub start: Option<(usize, usize)>,
    pub moves: Vec<Step>,
}

fn effective_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
}

/// Parses a behavior script (`PASSO`, `POS`, then one command per token).
pub fn parse_behavior(text: &str) -> Behavior {
    let mut behavior = Behavior::default();

    for line in effective_lines(text) {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            match token {
                "PASSO" => {
                    if let Some(passo) = tokens.next().and_then(|v| v.parse().ok()) {
                        behavior.passo = passo;
                    }
                }
                "POS" => {
                    let y = tokens.next().and_then(|v| v.parse().ok());
                    let x = tokens.next().and_then(|v| v.parse().ok());
                    if let (Some(y), Some(x)) = (y, x) {
                        behavior.start = Some((x, y));
                    }
                }
                _ => {
                    if behavior.moves.len() >= MAX_MOVES {
                        continue;
                    }
                    let key = token.as_bytes()[0];
                    let mut turns = 1;
                    if key == b'T' {
                        if let Some(n) = tokens.next().and_then(|v| v.parse().ok()) {
                            turns = n;
                        }
                    }
                    behavior.moves.push(Step::new(key, turns));
                }
            }
        }
    }
    behavior
}

/// Builds a board from level text.
///
/// `load_behavior` resolves a `PAC` / `MON` file name to its parsed script;
/// `None` leaves the entity with default behavior.
pub fn parse_level<F>(
    name: &str,
    text: &str,
    points: i32,
    mut load_behavior: F,
) -> Result<Board, LevelError>
where
    F: FnMut(&str) -> Option<Behavior>,
{
    let mut board: Option<Board> = None;
    let mut tempo = DEFAULT_TEMPO;
    let mut pac_file: Option<String> = None;
    let mut ghost_files: Vec<String> = Vec::new();
    let mut rows_read = 0;
    let mut pac_marker = None;
    let mut ghost_markers = Vec::new();

    for line in effective_lines(text) {
        let mut tokens = line.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        match first {
            "DIM" => {
                let height: usize = tokens.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                let width: usize = tokens.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                if width == 0 || height == 0 {
                    return Err(LevelError::MissingDimensions {
                        name: name.to_owned(),
                    });
                }
                if width.checked_mul(height).map_or(true, |cells| cells > MAX_BOARD_SIZE) {
                    return Err(LevelError::TooLarge {
                        name: name.to_owned(),
                        width,
                        height,
                    });
                }
                board = Some(Board::new(name, width, height, DEFAULT_TEMPO));
                rows_read = 0;
            }
            "TEMPO" => {
                let millis: u64 = tokens.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                tempo = if millis == 0 {
                    DEFAULT_TEMPO
                } else {
                    Duration::from_millis(millis)
                };
            }
            "PAC" => pac_file = tokens.next().map(str::to_owned),
            "MON" => {
                for file in tokens {
                    if ghost_files.len() >= MAX_GHOSTS {
                        warn!("Stage {} declares more than {} monsters", name, MAX_GHOSTS);
                        break;
                    }
                    ghost_files.push(file.to_owned());
                }
            }
            _ => {
                let Some(board) = board.as_mut() else {
                    continue;
                };
                if rows_read >= board.height {
                    continue;
                }
                for (x, ch) in line.bytes().take(board.width).enumerate() {
                    let at = board.index(x, rows_read);
                    let cell = &mut board.cells[at];
                    match ch {
                        b'X' | b'W' => cell.tile = Tile::Wall,
                        b'.' | b'o' => cell.has_dot = true,
                        b'@' => cell.has_portal = true,
                        b'P' => pac_marker = Some((x, rows_read)),
                        b'M' if ghost_markers.len() < MAX_GHOSTS => {
                            ghost_markers.push((x, rows_read))
                        }
                        _ => {}
                    }
                }
                rows_read += 1;
            }
        }
    }

    let mut board = board.ok_or_else(|| LevelError::MissingDimensions {
        name: name.to_owned(),
    })?;
    board.tempo = tempo;

    let pac_behavior = pac_file.as_deref().and_then(&mut load_behavior);
    let mut pacman = Pacman::new(points);
    let mut start = pac_marker;
    if let Some(behavior) = pac_behavior {
        pacman.passo = behavior.passo;
        pacman.moves = behavior.moves;
        start = behavior.start.or(start);
    }
    if let Some((x, y)) = place(&board, start) {
        pacman.x = x;
        pacman.y = y;
        let at = board.index(x, y);
        board.cells[at].tile = Tile::Pacman;
    }
    board.pacmans.push(pacman);

    let mut markers = ghost_markers.into_iter();
    for file in &ghost_files {
        let behavior = load_behavior(file).unwrap_or_default();
        let start = behavior.start.or_else(|| markers.next());
        let mut ghost = Ghost {
            passo: behavior.passo,
            moves: behavior.moves,
            ..Ghost::default()
        };
        if let Some((x, y)) = place(&board, start) {
            ghost.x = x;
            ghost.y = y;
            let at = board.index(x, y);
            board.cells[at].tile = Tile::Ghost;
        }
        board.ghosts.push(ghost);
    }

    debug!(
        "Loaded stage {} ({}x{}, {} monsters, tick {:?})",
        board.name,
        board.width,
        board.height,
        board.ghosts.len(),
        board.tempo
    );
    Ok(board)
}

/// Resolves where an entity starts: the requested cell if playable, else the
/// first playable cell.
fn place(board: &Board, wanted: Option<(usize, usize)>) -> Option<(usize, usize)> {
    match wanted {
        Some((x, y)) if board.is_playable(x, y) => Some((x, y)),
        _ => board.first_playable(),
    }
}

/// Reads a level file and its behavior files from disk.
///
/// `points` carries the score accumulated in earlier stages.
pub fn load_level(path: &Path, points: i32) -> Result<Board, LevelError> {
    let text = std::fs::read_to_string(path).map_err(|source| LevelError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    parse_level(&name, &text, points, |file| {
        let behavior_path = dir.join(file);
        match std::fs::read_to_string(&behavior_path) {
            Ok(text) => Some(parse_behavior(&text)),
            Err(e) => {
                warn!(
                    "Behavior file {} unavailable: {}",
                    behavior_path.display(),
                    e
                );
                None
            }
        }
    })
}

/// Lists the stages of a session: level files in `dir`, sorted by name.
pub fn resolve_stages(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut stages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_level = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| LEVEL_EXTENSIONS.contains(&ext));
        if is_level && path.is_file() {
            stages.push(path);
        }
    }
    stages.sort();
    stages.truncate(MAX_LEVELS);
    Ok(stages)
}
