//! Command capture: turns keystrokes or a scripted command file into
//! requests on the session's request channel.

use log::{debug, info, warn};
use shared::ClientRequest;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Pause between two scripted commands.
pub const SCRIPT_STEP: Duration = Duration::from_millis(100);

/// What a single keystroke asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A movement key, already upper-cased (`W`, `A`, `S` or `D`).
    Move(u8),
    Quit,
}

impl Key {
    /// The request this key turns into on the wire.
    pub fn to_request(self) -> ClientRequest {
        match self {
            Key::Move(key) => ClientRequest::Move(key),
            Key::Quit => ClientRequest::Disconnect,
        }
    }
}

/// Maps a typed character to a key. Anything that is neither a movement key
/// nor `q` is ignored.
pub fn parse_key(c: char) -> Option<Key> {
    match c.to_ascii_uppercase() {
        'Q' => Some(Key::Quit),
        c @ ('W' | 'A' | 'S' | 'D') => Some(Key::Move(c as u8)),
        _ => None,
    }
}

/// Where commands come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    /// One command character per line, replayed [`SCRIPT_STEP`] apart.
    Script(Vec<char>),
    /// Lines typed on standard input.
    Interactive,
}

impl CommandSource {
    /// Loads a command file. Blank lines are kept out of the script.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_script(&text))
    }

    pub fn from_script(text: &str) -> Self {
        CommandSource::Script(
            text.lines()
                .filter_map(|line| line.trim().chars().next())
                .collect(),
        )
    }
}

/// Feeds `source` into the request channel until a quit key, the end of the
/// source or a write failure.
///
/// A disconnect is sent whenever the source runs out, so the server ends the
/// session instead of waiting for more commands.
pub fn pump_commands<W: Write>(source: CommandSource, request: W) {
    match source {
        CommandSource::Script(commands) => {
            pump(request, commands.into_iter(), Some(SCRIPT_STEP))
        }
        CommandSource::Interactive => {
            info!("Controls: w/a/s/d then Enter to move, q to quit");
            let stdin = io::stdin();
            let typed = stdin
                .lock()
                .lines()
                .map_while(|line| line.ok())
                .flat_map(|line| line.chars().collect::<Vec<_>>());
            pump(request, typed, None)
        }
    }
}

fn pump<W, I>(mut request: W, chars: I, step: Option<Duration>)
where
    W: Write,
    I: Iterator<Item = char>,
{
    for c in chars {
        let Some(key) = parse_key(c) else {
            debug!("Ignoring command {:?}", c);
            continue;
        };
        if let Err(e) = send(&mut request, key.to_request()) {
            warn!("Could not send command: {}", e);
            return;
        }
        if key == Key::Quit {
            info!("Disconnect sent");
            return;
        }
        if let Some(step) = step {
            thread::sleep(step);
        }
    }

    if let Err(e) = send(&mut request, ClientRequest::Disconnect) {
        debug!("Final disconnect not delivered: {}", e);
    }
}

fn send<W: Write>(request: &mut W, message: ClientRequest) -> io::Result<()> {
    request.write_all(&message.encode())?;
    request.flush()
}
