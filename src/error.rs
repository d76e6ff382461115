//! Error types for chat-cli.
//!
//! Every variant is reported to the user on the console. Only a missing
//! credential ends the session; stream failures abandon the current turn.

use thiserror::Error;

/// Errors surfaced by the session and the completion backend.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The API credential is absent or empty.
    #[error("{var} environment variable not set")]
    MissingCredential { var: &'static str },

    /// The completion request could not be started.
    #[error("Error creating stream: {0:#}")]
    StreamCreation(anyhow::Error),

    /// The stream broke after it was started.
    #[error("Error receiving response: {0:#}")]
    StreamReceive(anyhow::Error),
}
