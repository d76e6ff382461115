//! Styled console output.
//!
//! All writers are generic so the session can render into a buffer in tests.

use crate::config::Model;
use crossterm::{
    cursor::MoveTo,
    queue,
    style::{style, Color, PrintStyledContent, Stylize},
    terminal::{Clear, ClearType},
};
use std::fmt::Display;
use std::io::{self, Write};

/// Glyph shown before the user prompt.
const PERSON_GLYPH: &str = "󰙊 ";

/// Glyph shown before assistant output.
const ROBOT_GLYPH: &str = "󰚩 ";

const USER_COLOR: Color = Color::Green;
const ASSISTANT_COLOR: Color = Color::Magenta;
const METRICS_COLOR: Color = Color::Yellow;
const ERROR_COLOR: Color = Color::Red;

/// Clear the visible terminal area and home the cursor.
pub fn clear_screen<W: Write>(out: &mut W) -> io::Result<()> {
    queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
    out.flush()
}

/// One-time greeting naming the model and the control commands.
pub fn banner<W: Write>(out: &mut W, model: Model) -> io::Result<()> {
    writeln!(out, "Chat started using model: {} (type 'exit' to quit)", model)?;
    writeln!(out, "Type 'clear' to clear the screen")?;
    writeln!(out, "For multiline input, type 'paste' and press Enter")?;
    out.flush()
}

pub fn user_prompt<W: Write>(out: &mut W) -> io::Result<()> {
    styled(out, format!("\n{} You: ", PERSON_GLYPH), USER_COLOR)?;
    out.flush()
}

pub fn paste_prompt<W: Write>(out: &mut W) -> io::Result<()> {
    styled(
        out,
        "Enter your text (type 'done' on a new line when finished):\n",
        USER_COLOR,
    )?;
    out.flush()
}

pub fn assistant_marker<W: Write>(out: &mut W) -> io::Result<()> {
    styled(out, format!("{} Assistant: ", ROBOT_GLYPH), ASSISTANT_COLOR)?;
    out.flush()
}

/// Print one streamed fragment immediately.
pub fn fragment<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    styled(out, text, ASSISTANT_COLOR)?;
    out.flush()
}

pub fn metrics_line<W: Write>(out: &mut W, line: impl Display) -> io::Result<()> {
    styled(out, format!("{}\n", line), METRICS_COLOR)
}

pub fn error<W: Write>(out: &mut W, err: impl Display) -> io::Result<()> {
    styled(out, format!("{}\n", err), ERROR_COLOR)?;
    out.flush()
}

fn styled<W: Write, D: Display>(out: &mut W, text: D, color: Color) -> io::Result<()> {
    queue!(out, PrintStyledContent(style(text).with(color)))
}
