//! Terminal renderer for state-updates

use shared::{StageState, StateUpdate};
use std::fmt::Write as _;
use std::io::{self, Write};

/// Clears the screen and homes the cursor.
const CLEAR: &str = "\x1b[2J\x1b[H";

/// Draws every received state-update onto a terminal-like sink.
pub struct Renderer<W: Write> {
    out: W,
    frames: u64,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, frames: 0 }
    }

    /// Replaces whatever is on screen with `update`.
    pub fn draw(&mut self, update: &StateUpdate) -> io::Result<()> {
        self.out.write_all(CLEAR.as_bytes())?;
        self.out.write_all(render_frame(update).as_bytes())?;
        self.out.flush()?;
        self.frames += 1;
        Ok(())
    }

    /// Number of frames drawn so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

/// Text of one frame: a status line, the board and, once the stage is over,
/// a banner with the outcome.
pub fn render_frame(update: &StateUpdate) -> String {
    let mut frame = String::new();
    let _ = writeln!(
        frame,
        "Stage: {}  Points: {}  Lives: {}",
        update.level_name, update.points, update.lives
    );
    for row in update.rows() {
        frame.extend(row.iter().map(|&glyph| glyph_char(glyph)));
        frame.push('\n');
    }
    match update.state {
        StageState::Playing => {}
        StageState::Won => frame.push_str("*** STAGE CLEARED ***\n"),
        StageState::Lost => frame.push_str("*** GAME OVER ***\n"),
    }
    frame
}

// Zero padding and stray control bytes show as blanks.
fn glyph_char(glyph: u8) -> char {
    if glyph.is_ascii_graphic() {
        glyph as char
    } else {
        ' '
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(state: StageState) -> StateUpdate {
        StateUpdate::new(state, 3, 2, 7, 1, "maze.lvl", b"#C.M@\0".to_vec()).unwrap()
    }

    #[test]
    fn test_frame_layout() {
        let frame = render_frame(&update(StageState::Playing));
        assert_eq!(frame, "Stage: maze.lvl  Points: 7  Lives: 1\n#C.\nM@ \n");
    }

    #[test]
    fn test_outcome_banners() {
        assert!(render_frame(&update(StageState::Won)).ends_with("*** STAGE CLEARED ***\n"));
        assert!(render_frame(&update(StageState::Lost)).ends_with("*** GAME OVER ***\n"));
    }

    #[test]
    fn test_draw_clears_before_each_frame() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.draw(&update(StageState::Playing)).unwrap();
        renderer.draw(&update(StageState::Won)).unwrap();
        assert_eq!(renderer.frames(), 2);

        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(text.matches(CLEAR).count(), 2);
        assert!(text.starts_with(CLEAR));
    }
}
