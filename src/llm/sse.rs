//! Server-sent events decoding for OpenAI-style streaming responses.
//!
//! Each event line looks like `data: {json chunk}`; the stream is closed with
//! `data: [DONE]`. Only the text deltas are kept.

use crate::error::ChatError;
use crate::llm::FragmentStream;
use anyhow::anyhow;
use futures::stream::{self, Fuse, Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use tracing::{debug, trace};

const DONE_MARKER: &str = "[DONE]";

/// Turn a raw HTTP byte stream into a stream of text fragments.
pub fn text_fragments<S, B, E>(byte_stream: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = DecoderState {
        inner: Box::pin(byte_stream.fuse()),
        buffer: Vec::new(),
        eof: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.next_line() {
                match parse_line(&line) {
                    Event::Fragment(text) => return Some((Ok(text), state)),
                    Event::Skip => continue,
                    Event::Done => {
                        debug!("stream finished");
                        return None;
                    }
                    Event::Error(err) => {
                        state.finish();
                        return Some((Err(err), state));
                    }
                }
            }

            if state.eof {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    state.finish();
                    let err = anyhow::Error::new(err).context("Error in HTTP stream");
                    return Some((Err(ChatError::StreamReceive(err)), state));
                }
                None => {
                    debug!("transport closed without done marker");
                    state.eof = true;
                    if !state.buffer.is_empty() {
                        state.buffer.push(b'\n');
                    }
                }
            }
        }
    })
    .boxed()
}

struct DecoderState<S> {
    inner: Pin<Box<Fuse<S>>>,
    buffer: Vec<u8>,
    eof: bool,
}

impl<S> DecoderState<S> {
    /// Pop the next complete line, without its line terminator.
    fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Stop yielding after an error.
    fn finish(&mut self) {
        self.eof = true;
        self.buffer.clear();
    }
}

enum Event {
    Fragment(String),
    Skip,
    Done,
    Error(ChatError),
}

fn parse_line(line: &str) -> Event {
    if line.is_empty() || line.starts_with(':') {
        return Event::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        trace!(line = %line, "ignoring non-data field");
        return Event::Skip;
    };
    let data = data.trim();

    if data == DONE_MARKER {
        return Event::Done;
    }

    match serde_json::from_str::<StreamPayload>(data) {
        Ok(StreamPayload::Chunk(chunk)) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map_or(Event::Skip, Event::Fragment),
        Ok(StreamPayload::Error { error }) => {
            Event::Error(ChatError::StreamReceive(anyhow!("{}", error.message)))
        }
        Err(err) => Event::Error(ChatError::StreamReceive(
            anyhow::Error::new(err).context("Failed to parse stream chunk"),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StreamPayload {
    Error { error: StreamErrorDetail },
    Chunk(ChatCompletionChunk),
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorDetail {
    message: String,
}
