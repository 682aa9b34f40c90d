//! Stage board and the movement rules applied to it.
//!
//! A [`Board`] is a plain value: it knows nothing about threads or locks. The
//! stage choreography wraps it in a [`SharedBoard`](crate::state::SharedBoard)
//! and calls [`Board::move_pacman`] / [`Board::move_ghost`] while holding the
//! write lock.

use rand::Rng;
use shared::{ProtocolError, StageState, StateUpdate};
use std::time::Duration;

/// Maximum number of monsters a stage may declare.
pub const MAX_GHOSTS: usize = 25;
/// Maximum number of scripted steps per behavior file.
pub const MAX_MOVES: usize = 20;
/// Score from which the player's pace is slowed by one extra tick.
pub const SLOWDOWN_THRESHOLD: i32 = 20;

const DIRECTIONS: [u8; 4] = [b'W', b'S', b'A', b'D'];

/// What occupies a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Empty,
    Wall,
    Pacman,
    Ghost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub tile: Tile,
    pub has_dot: bool,
    pub has_portal: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            tile: Tile::Empty,
            has_dot: false,
            has_portal: false,
        }
    }
}

impl Cell {
    /// Glyph sent to clients for this cell.
    pub fn glyph(&self) -> u8 {
        match self.tile {
            Tile::Wall => b'#',
            Tile::Pacman => b'C',
            Tile::Ghost => b'M',
            Tile::Empty if self.has_portal => b'@',
            Tile::Empty if self.has_dot => b'.',
            Tile::Empty => b' ',
        }
    }
}

/// One step of a behavior script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub key: u8,
    pub turns: u32,
    pub turns_left: u32,
}

impl Step {
    pub fn new(key: u8, turns: u32) -> Self {
        let turns = turns.max(1);
        Self {
            key,
            turns,
            turns_left: turns,
        }
    }

    /// Burns one turn of a wait step. Returns true once the wait is over,
    /// rearming the step for the next lap of the script.
    fn tick_wait(&mut self) -> bool {
        if self.turns_left <= 1 {
            self.turns_left = self.turns;
            true
        } else {
            self.turns_left -= 1;
            false
        }
    }
}

/// The player-controlled entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacman {
    pub x: usize,
    pub y: usize,
    pub alive: bool,
    pub points: i32,
    pub passo: u32,
    pub waiting: u32,
    pub moves: Vec<Step>,
    pub current_move: usize,
    /// Single-slot mailbox filled by the command listener.
    pub pending: Option<u8>,
}

impl Pacman {
    pub fn new(points: i32) -> Self {
        Self {
            x: 0,
            y: 0,
            alive: true,
            points,
            passo: 0,
            waiting: 0,
            moves: Vec::new(),
            current_move: 0,
            pending: None,
        }
    }
}

/// A monster driven by its script, or randomly when it has none.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ghost {
    pub x: usize,
    pub y: usize,
    pub passo: u32,
    pub waiting: u32,
    pub moves: Vec<Step>,
    pub current_move: usize,
    pub charged: bool,
}

/// Which command the player entity runs this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// A command typed by the remote player.
    Key(u8),
    /// The next step of the entity's own script.
    Scripted,
    /// Nothing to do.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Valid,
    Invalid,
    Dead,
    ReachedPortal,
}

/// Mutable state of one running stage.
#[derive(Debug, Clone)]
pub struct Board {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub cells: Vec<Cell>,
    pub pacmans: Vec<Pacman>,
    pub ghosts: Vec<Ghost>,
    pub tempo: Duration,
    pub level_finished: bool,
    pub shutdown: bool,
}

fn direction_delta(key: u8) -> Option<(isize, isize)> {
    match key {
        b'W' => Some((0, -1)),
        b'S' => Some((0, 1)),
        b'A' => Some((-1, 0)),
        b'D' => Some((1, 0)),
        _ => None,
    }
}

fn random_direction(rng: &mut impl Rng) -> u8 {
    DIRECTIONS[rng.gen_range(0..DIRECTIONS.len())]
}

impl Board {
    /// Creates an empty board with no entities.
    pub fn new(name: impl Into<String>, width: usize, height: usize, tempo: Duration) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            cells: vec![Cell::default(); width * height],
            pacmans: Vec::new(),
            ghosts: Vec::new(),
            tempo,
            level_finished: false,
            shutdown: false,
        }
    }

    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<&Cell> {
        if x < self.width && y < self.height {
            self.cells.get(self.index(x, y))
        } else {
            None
        }
    }

    /// Neighbour of `(x, y)` one step along `(dx, dy)`, if on the board.
    fn neighbour(&self, x: usize, y: usize, dx: isize, dy: isize) -> Option<(usize, usize)> {
        let nx = x.checked_add_signed(dx)?;
        let ny = y.checked_add_signed(dy)?;
        (nx < self.width && ny < self.height).then_some((nx, ny))
    }

    /// A cell an entity may be placed on at load time.
    pub fn is_playable(&self, x: usize, y: usize) -> bool {
        match self.cell(x, y) {
            Some(cell) => cell.tile == Tile::Empty && !cell.has_portal,
            None => false,
        }
    }

    pub fn first_playable(&self) -> Option<(usize, usize)> {
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .find(|&(x, y)| self.is_playable(x, y))
    }

    fn kill_pacman(&mut self, index: usize) {
        let (x, y) = (self.pacmans[index].x, self.pacmans[index].y);
        let at = self.index(x, y);
        if self.cells[at].tile == Tile::Pacman {
            self.cells[at].tile = Tile::Empty;
        }
        self.pacmans[index].alive = false;
    }

    fn kill_pacman_at(&mut self, x: usize, y: usize) -> MoveOutcome {
        let victim = self
            .pacmans
            .iter()
            .position(|p| p.alive && p.x == x && p.y == y);
        match victim {
            Some(index) => {
                self.kill_pacman(index);
                MoveOutcome::Dead
            }
            None => MoveOutcome::Valid,
        }
    }

    /// Applies one command to the player entity at `index`.
    pub fn move_pacman(&mut self, index: usize, order: Order, rng: &mut impl Rng) -> MoveOutcome {
        let Some(pac) = self.pacmans.get_mut(index) else {
            return MoveOutcome::Dead;
        };
        if !pac.alive {
            return MoveOutcome::Dead;
        }
        if pac.waiting > 0 {
            pac.waiting -= 1;
            return MoveOutcome::Valid;
        }
        pac.waiting = pac.passo;

        let key = match order {
            Order::Key(key) => key.to_ascii_uppercase(),
            Order::Scripted if !pac.moves.is_empty() => {
                let len = pac.moves.len();
                pac.moves[pac.current_move % len].key.to_ascii_uppercase()
            }
            Order::Scripted | Order::Idle => return MoveOutcome::Invalid,
        };
        let key = if key == b'R' { random_direction(rng) } else { key };

        if key == b'T' {
            if order == Order::Scripted {
                let len = pac.moves.len();
                if pac.moves[pac.current_move % len].tick_wait() {
                    pac.current_move += 1;
                }
            }
            return MoveOutcome::Valid;
        }
        let Some((dx, dy)) = direction_delta(key) else {
            return MoveOutcome::Invalid;
        };
        pac.current_move += 1;

        let (x, y) = (pac.x, pac.y);
        let Some((nx, ny)) = self.neighbour(x, y, dx, dy) else {
            return MoveOutcome::Invalid;
        };
        let from = self.index(x, y);
        let to = self.index(nx, ny);

        if self.cells[to].has_portal {
            self.cells[from].tile = Tile::Empty;
            self.cells[to].tile = Tile::Pacman;
            self.pacmans[index].x = nx;
            self.pacmans[index].y = ny;
            self.level_finished = true;
            return MoveOutcome::ReachedPortal;
        }
        let target = self.cells[to].tile;
        match target {
            Tile::Wall => return MoveOutcome::Invalid,
            Tile::Ghost => {
                self.kill_pacman(index);
                return MoveOutcome::Dead;
            }
            Tile::Empty | Tile::Pacman => {}
        }

        let pac = &mut self.pacmans[index];
        if self.cells[to].has_dot {
            self.cells[to].has_dot = false;
            pac.points += 1;
        }
        pac.x = nx;
        pac.y = ny;
        self.cells[from].tile = Tile::Empty;
        self.cells[to].tile = Tile::Pacman;
        MoveOutcome::Valid
    }

    /// Runs the next scripted (or random) step of the monster at `index`.
    pub fn move_ghost(&mut self, index: usize, rng: &mut impl Rng) -> MoveOutcome {
        let Some(ghost) = self.ghosts.get_mut(index) else {
            return MoveOutcome::Invalid;
        };
        if ghost.waiting > 0 {
            ghost.waiting -= 1;
            return MoveOutcome::Valid;
        }
        ghost.waiting = ghost.passo;

        let scripted = !ghost.moves.is_empty();
        let key = if scripted {
            let len = ghost.moves.len();
            ghost.moves[ghost.current_move % len].key.to_ascii_uppercase()
        } else {
            b'R'
        };
        let key = if key == b'R' { random_direction(rng) } else { key };

        match key {
            b'C' => {
                ghost.current_move += 1;
                ghost.charged = true;
                return MoveOutcome::Valid;
            }
            b'T' => {
                if scripted {
                    let len = ghost.moves.len();
                    if ghost.moves[ghost.current_move % len].tick_wait() {
                        ghost.current_move += 1;
                    }
                }
                return MoveOutcome::Valid;
            }
            _ => {}
        }
        let Some((dx, dy)) = direction_delta(key) else {
            return MoveOutcome::Invalid;
        };
        ghost.current_move += 1;

        if ghost.charged {
            ghost.charged = false;
            return self.charge_ghost(index, dx, dy);
        }

        let (x, y) = (ghost.x, ghost.y);
        let Some((nx, ny)) = self.neighbour(x, y, dx, dy) else {
            return MoveOutcome::Invalid;
        };
        let target = self.cells[self.index(nx, ny)].tile;
        let outcome = match target {
            Tile::Wall | Tile::Ghost => return MoveOutcome::Invalid,
            Tile::Pacman => self.kill_pacman_at(nx, ny),
            Tile::Empty => MoveOutcome::Valid,
        };
        self.relocate_ghost(index, nx, ny);
        outcome
    }

    /// Slides a charged monster until the next obstacle, running over the
    /// player if it is in the way.
    fn charge_ghost(&mut self, index: usize, dx: isize, dy: isize) -> MoveOutcome {
        let (mut x, mut y) = (self.ghosts[index].x, self.ghosts[index].y);
        let mut moved = false;
        let mut outcome = MoveOutcome::Valid;

        while let Some((nx, ny)) = self.neighbour(x, y, dx, dy) {
            let target = self.cells[self.index(nx, ny)].tile;
            match target {
                Tile::Wall | Tile::Ghost => break,
                Tile::Pacman => {
                    (x, y) = (nx, ny);
                    moved = true;
                    outcome = self.kill_pacman_at(nx, ny);
                    break;
                }
                Tile::Empty => {
                    (x, y) = (nx, ny);
                    moved = true;
                }
            }
        }
        if !moved {
            return MoveOutcome::Invalid;
        }
        self.relocate_ghost(index, x, y);
        outcome
    }

    fn relocate_ghost(&mut self, index: usize, x: usize, y: usize) {
        let from = self.index(self.ghosts[index].x, self.ghosts[index].y);
        let to = self.index(x, y);
        self.cells[from].tile = Tile::Empty;
        self.cells[to].tile = Tile::Ghost;
        self.ghosts[index].x = x;
        self.ghosts[index].y = y;
    }

    /// Consumes the player's mailbox, falling back to the script.
    pub fn take_player_order(&mut self) -> Order {
        let Some(pac) = self.pacmans.first_mut() else {
            return Order::Idle;
        };
        match pac.pending.take() {
            Some(key) => Order::Key(key),
            None if !pac.moves.is_empty() => Order::Scripted,
            None => Order::Idle,
        }
    }

    /// Overwrites the player's mailbox. An unread command is lost.
    pub fn post_command(&mut self, key: u8) {
        if let Some(pac) = self.pacmans.first_mut() {
            pac.pending = Some(key);
        }
    }

    pub fn player_alive(&self) -> bool {
        self.pacmans.first().is_some_and(|p| p.alive)
    }

    pub fn player_points(&self) -> i32 {
        self.pacmans.first().map_or(0, |p| p.points)
    }

    pub fn stage_state(&self) -> StageState {
        if self.level_finished {
            StageState::Won
        } else if !self.player_alive() {
            StageState::Lost
        } else {
            StageState::Playing
        }
    }

    /// Sleep before the player's next cycle.
    pub fn pacman_delay(&self) -> Duration {
        let Some(pac) = self.pacmans.first() else {
            return self.tempo;
        };
        let mut ticks = 1 + pac.passo;
        if pac.points >= SLOWDOWN_THRESHOLD {
            ticks += 1;
        }
        self.tempo * ticks
    }

    pub fn ghost_delay(&self, index: usize) -> Duration {
        let passo = self.ghosts.get(index).map_or(0, |g| g.passo);
        self.tempo * (1 + passo)
    }

    /// Copies the board into a state-update message.
    pub fn snapshot(&self) -> Result<StateUpdate, ProtocolError> {
        let points = self
            .player_points()
            .clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        let lives = i16::from(self.player_alive());
        let width = u16::try_from(self.width).unwrap_or(u16::MAX);
        let height = u16::try_from(self.height).unwrap_or(u16::MAX);
        StateUpdate::new(
            self.stage_state(),
            width,
            height,
            points,
            lives,
            &self.name,
            self.cells.iter().map(Cell::glyph).collect(),
        )
    }
}
