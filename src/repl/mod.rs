//! Read-eval-print loop for the chat client.

mod commands;
mod metrics;
mod session;

pub use session::start;
