//! Streaming completion backends.
//!
//! A backend takes the whole transcript and hands back a stream of text
//! fragments. The stream ends with `None` on a normal finish; an `Err` item
//! reports a broken stream. Dropping the stream releases the connection.

pub mod openai;
pub mod sse;

use crate::error::ChatError;
use crate::protocol::Turn;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

/// Incremental text fragments of one assistant reply.
pub type FragmentStream = BoxStream<'static, Result<String, ChatError>>;

/// Body of a chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Turn],
    pub temperature: f32,
    pub stream: bool,
}

/// Something that can start a streaming completion.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Start a completion. Errors here mean no stream was opened.
    async fn create_stream(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<FragmentStream, ChatError>;
}
