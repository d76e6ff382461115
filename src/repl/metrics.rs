//! Per-turn timing and throughput.
//!
//! Token counts are the number of pieces left after splitting on single
//! spaces, not model tokens. Empty text still counts as one piece.

use crate::console;
use std::io::{self, Write};
use std::time::Duration;

/// Approximate token count of `text`.
pub fn approximate_tokens(text: &str) -> usize {
    text.split(' ').count()
}

/// Metrics for one completed exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnMetrics {
    pub elapsed: Duration,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TurnMetrics {
    pub fn measure(input: &str, output: &str, elapsed: Duration) -> Self {
        Self {
            elapsed,
            input_tokens: approximate_tokens(input),
            output_tokens: approximate_tokens(output),
        }
    }

    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    /// Total tokens divided by elapsed seconds; 0 when no time elapsed.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_tokens() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        console::metrics_line(out, "\nMetrics:")?;
        console::metrics_line(
            out,
            format_args!("Time taken: {:.2} seconds", self.elapsed.as_secs_f64()),
        )?;
        console::metrics_line(
            out,
            format_args!("Speed: {:.2} tokens/second", self.tokens_per_second()),
        )?;
        console::metrics_line(out, format_args!("Input tokens: {}", self.input_tokens))?;
        console::metrics_line(out, format_args!("Output tokens: {}", self.output_tokens))?;
        console::metrics_line(out, format_args!("Total tokens: {}", self.total_tokens()))?;
        out.flush()
    }
}
