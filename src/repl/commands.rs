//! Control command parsing and paste collection.
//!
//! Commands are exact, case-sensitive matches on the whole line. Anything
//! else, including the empty line, is literal chat input.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Line that ends paste mode.
pub const PASTE_TERMINATOR: &str = "done";

/// One line of user input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Leave the session
    Exit,

    /// Clear the screen, keep the conversation
    Clear,

    /// Start collecting a multiline message
    Paste,

    /// Send this text as-is
    Text(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line {
            "exit" => Command::Exit,
            "clear" => Command::Clear,
            "paste" => Command::Paste,
            _ => Command::Text(line.to_string()),
        }
    }
}

/// Line reader that accepts arbitrary bytes.
///
/// Invalid UTF-8 is replaced with U+FFFD instead of failing the read.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Next line without its `\n` or `\r\n` terminator; `None` at end of input.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Read lines until [`PASTE_TERMINATOR`] or end of input.
///
/// Returns the lines joined with `\n`, trimmed at both ends. The terminator
/// itself is not included.
pub async fn collect_paste<R>(lines: &mut LineReader<R>) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut collected = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line == PASTE_TERMINATOR {
            break;
        }
        collected.push(line);
    }
    Ok(collected.join("\n").trim().to_string())
}
