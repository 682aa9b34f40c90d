//! Wire protocol shared by the game server and its clients.
//!
//! Every message is a fixed-layout byte buffer. There is no framing and no
//! length prefix: a receiver reads exactly the declared size for the message
//! kind it expects, and any other byte count is a protocol error. Multi-byte
//! integers are little-endian.
//!
//! | Message          | Size | Layout                                                        |
//! |------------------|------|---------------------------------------------------------------|
//! | connect-request  | 81   | opcode 1, request channel name (40), response channel name (40) |
//! | connect-response | 2    | opcode 1, result (0 accepted, nonzero rejected)                |
//! | disconnect       | 1    | opcode 2                                                      |
//! | move             | 2    | opcode 3, command character                                    |
//! | state-update     | 2442 | opcode 4, stage state, width, height, points, lives, name (32), cells (2400) |

pub mod fifo;

pub const OP_CONNECT: u8 = 1;
pub const OP_DISCONNECT: u8 = 2;
pub const OP_MOVE: u8 = 3;
pub const OP_UPDATE: u8 = 4;

/// Width of a channel name field, short names are NUL padded.
pub const PIPE_NAME_SIZE: usize = 40;
/// Width of the stage name field, always NUL terminated.
pub const MAX_LEVEL_NAME: usize = 32;
/// Capacity of the cell array carried by a state-update (e.g. 60x40).
pub const MAX_BOARD_SIZE: usize = 2400;

pub const CONNECT_REQUEST_SIZE: usize = 1 + 2 * PIPE_NAME_SIZE;
pub const CONNECT_RESPONSE_SIZE: usize = 2;
pub const DISCONNECT_SIZE: usize = 1;
pub const MOVE_SIZE: usize = 2;
pub const STATE_HEADER_SIZE: usize = 10;
pub const STATE_UPDATE_SIZE: usize = STATE_HEADER_SIZE + MAX_LEVEL_NAME + MAX_BOARD_SIZE;

/// Result code for an accepted connection.
pub const CONNECT_ACCEPTED: u8 = 0;
/// Result code used by the server when it refuses a connection.
pub const CONNECT_REJECTED: u8 = 1;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("{kind} must be {expected} bytes, got {actual}")]
    WrongSize {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("expected opcode {expected}, got {actual}")]
    UnexpectedOpcode { expected: u8, actual: u8 },

    #[error("channel name is {len} bytes, the limit is {PIPE_NAME_SIZE}")]
    NameTooLong { len: usize },

    #[error("name field is not valid UTF-8")]
    InvalidName,

    #[error("name field has no NUL terminator")]
    UnterminatedName,

    #[error("board {width}x{height} exceeds {MAX_BOARD_SIZE} cells")]
    BoardTooLarge { width: u16, height: u16 },

    #[error("cell array holds {actual} cells, the board needs {expected}")]
    CellCountMismatch { expected: usize, actual: usize },

    #[error("invalid stage state {0}")]
    InvalidStageState(u8),
}

fn expect_size(kind: &'static str, bytes: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() != expected {
        return Err(ProtocolError::WrongSize {
            kind,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn expect_opcode(bytes: &[u8], expected: u8) -> Result<(), ProtocolError> {
    match bytes.first() {
        Some(&actual) if actual == expected => Ok(()),
        Some(&actual) => Err(ProtocolError::UnexpectedOpcode { expected, actual }),
        None => Err(ProtocolError::WrongSize {
            kind: "message",
            expected: 1,
            actual: 0,
        }),
    }
}

/// Reads a NUL padded text field. A field with no NUL uses every byte.
fn read_name(field: &[u8]) -> Result<String, ProtocolError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidName)
}

/// Reads a text field that must hold a NUL within its width.
fn read_terminated_name(field: &[u8]) -> Result<String, ProtocolError> {
    if !field.contains(&0) {
        return Err(ProtocolError::UnterminatedName);
    }
    read_name(field)
}

fn write_name(field: &mut [u8], name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

/// Truncates `name` to at most `max` bytes without splitting a character.
fn truncate_on_char(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Handshake message a client writes into the shared registration channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Channel the client writes commands into.
    pub request_pipe: String,
    /// Channel the server writes responses and state updates into.
    pub notify_pipe: String,
}

impl ConnectRequest {
    pub fn new(
        request_pipe: impl Into<String>,
        notify_pipe: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let request = Self {
            request_pipe: request_pipe.into(),
            notify_pipe: notify_pipe.into(),
        };
        for name in [&request.request_pipe, &request.notify_pipe] {
            if name.len() > PIPE_NAME_SIZE {
                return Err(ProtocolError::NameTooLong { len: name.len() });
            }
            if name.as_bytes().contains(&0) {
                return Err(ProtocolError::InvalidName);
            }
        }
        Ok(request)
    }

    pub fn encode(&self) -> [u8; CONNECT_REQUEST_SIZE] {
        let mut buf = [0u8; CONNECT_REQUEST_SIZE];
        buf[0] = OP_CONNECT;
        write_name(&mut buf[1..1 + PIPE_NAME_SIZE], &self.request_pipe);
        write_name(&mut buf[1 + PIPE_NAME_SIZE..], &self.notify_pipe);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        expect_size("connect-request", bytes, CONNECT_REQUEST_SIZE)?;
        expect_opcode(bytes, OP_CONNECT)?;
        Ok(Self {
            request_pipe: read_name(&bytes[1..1 + PIPE_NAME_SIZE])?,
            notify_pipe: read_name(&bytes[1 + PIPE_NAME_SIZE..])?,
        })
    }
}

/// Server answer to a [`ConnectRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponse {
    pub result: u8,
}

impl ConnectResponse {
    pub fn accepted() -> Self {
        Self {
            result: CONNECT_ACCEPTED,
        }
    }

    pub fn rejected() -> Self {
        Self {
            result: CONNECT_REJECTED,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == CONNECT_ACCEPTED
    }

    pub fn encode(&self) -> [u8; CONNECT_RESPONSE_SIZE] {
        [OP_CONNECT, self.result]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        expect_size("connect-response", bytes, CONNECT_RESPONSE_SIZE)?;
        expect_opcode(bytes, OP_CONNECT)?;
        Ok(Self { result: bytes[1] })
    }
}

/// Messages a client sends over its request channel during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    Disconnect,
    Move(u8),
}

impl ClientRequest {
    /// Full size of the request that starts with `opcode`, or `None` for an
    /// opcode clients never send.
    pub fn size_for(opcode: u8) -> Option<usize> {
        match opcode {
            OP_DISCONNECT => Some(DISCONNECT_SIZE),
            OP_MOVE => Some(MOVE_SIZE),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ClientRequest::Disconnect => vec![OP_DISCONNECT],
            ClientRequest::Move(key) => vec![OP_MOVE, *key],
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let Some(&opcode) = bytes.first() else {
            return Err(ProtocolError::WrongSize {
                kind: "request",
                expected: DISCONNECT_SIZE,
                actual: 0,
            });
        };
        match opcode {
            OP_DISCONNECT => {
                expect_size("disconnect", bytes, DISCONNECT_SIZE)?;
                Ok(ClientRequest::Disconnect)
            }
            OP_MOVE => {
                expect_size("move", bytes, MOVE_SIZE)?;
                Ok(ClientRequest::Move(bytes[1]))
            }
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Progress of the stage carried by a state-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    Playing = 0,
    Won = 1,
    Lost = 2,
}

impl TryFrom<u8> for StageState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StageState::Playing),
            1 => Ok(StageState::Won),
            2 => Ok(StageState::Lost),
            other => Err(ProtocolError::InvalidStageState(other)),
        }
    }
}

/// Snapshot of a running stage, broadcast by the server every tick.
///
/// `cells` holds one glyph per board cell in row-major order: `#` wall,
/// `C` player, `M` monster, `.` point, `@` portal, space for empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub state: StageState,
    pub width: u16,
    pub height: u16,
    pub points: i16,
    pub lives: i16,
    pub level_name: String,
    pub cells: Vec<u8>,
}

impl StateUpdate {
    /// Builds an update, truncating the name to fit its field.
    pub fn new(
        state: StageState,
        width: u16,
        height: u16,
        points: i16,
        lives: i16,
        level_name: &str,
        cells: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        let expected = width as usize * height as usize;
        if expected > MAX_BOARD_SIZE {
            return Err(ProtocolError::BoardTooLarge { width, height });
        }
        if cells.len() != expected {
            return Err(ProtocolError::CellCountMismatch {
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self {
            state,
            width,
            height,
            points,
            lives,
            level_name: truncate_on_char(level_name, MAX_LEVEL_NAME - 1).to_owned(),
            cells,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; STATE_UPDATE_SIZE];
        buf[0] = OP_UPDATE;
        buf[1] = self.state as u8;
        buf[2..4].copy_from_slice(&self.width.to_le_bytes());
        buf[4..6].copy_from_slice(&self.height.to_le_bytes());
        buf[6..8].copy_from_slice(&self.points.to_le_bytes());
        buf[8..10].copy_from_slice(&self.lives.to_le_bytes());
        let name = truncate_on_char(&self.level_name, MAX_LEVEL_NAME - 1);
        write_name(
            &mut buf[STATE_HEADER_SIZE..STATE_HEADER_SIZE + MAX_LEVEL_NAME],
            name,
        );
        let cells_at = STATE_HEADER_SIZE + MAX_LEVEL_NAME;
        let count = self.cells.len().min(MAX_BOARD_SIZE);
        buf[cells_at..cells_at + count].copy_from_slice(&self.cells[..count]);
        buf
    }

    /// Decodes a full-size frame. Bytes after the name's NUL and after the
    /// last board cell are padding and are not kept, so only frames built by
    /// [`StateUpdate::encode`] reproduce byte for byte.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        expect_size("state-update", bytes, STATE_UPDATE_SIZE)?;
        expect_opcode(bytes, OP_UPDATE)?;
        let state = StageState::try_from(bytes[1])?;
        let width = u16::from_le_bytes([bytes[2], bytes[3]]);
        let height = u16::from_le_bytes([bytes[4], bytes[5]]);
        let points = i16::from_le_bytes([bytes[6], bytes[7]]);
        let lives = i16::from_le_bytes([bytes[8], bytes[9]]);
        let count = width as usize * height as usize;
        if count > MAX_BOARD_SIZE {
            return Err(ProtocolError::BoardTooLarge { width, height });
        }
        let level_name =
            read_terminated_name(&bytes[STATE_HEADER_SIZE..STATE_HEADER_SIZE + MAX_LEVEL_NAME])?;
        let cells_at = STATE_HEADER_SIZE + MAX_LEVEL_NAME;
        Ok(Self {
            state,
            width,
            height,
            points,
            lives,
            level_name,
            cells: bytes[cells_at..cells_at + count].to_vec(),
        })
    }

    /// Iterates over the board one row at a time.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.cells.chunks(self.width.max(1) as usize)
    }
}
