//! Interactive chat session.
//!
//! Reads a line, dispatches control commands, and otherwise sends the text
//! with the whole transcript to the completion backend, echoing the reply as
//! it streams in. One exchange is in flight at a time.

use super::commands::{collect_paste, Command, LineReader};
use super::metrics::TurnMetrics;
use crate::config::{SessionConfig, SYSTEM_PROMPT};
use crate::console;
use crate::error::ChatError;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::protocol::Transcript;
use anyhow::Result;
use futures::StreamExt;
use std::io::Write;
use std::time::Instant;
use tokio::io::AsyncBufRead;
use tracing::{debug, info};

/// Start a chat session, or report why it cannot start.
///
/// A configuration error is printed and the function returns without
/// prompting or connecting. Otherwise `connect` builds the backend and the
/// session runs until `exit` or end of input.
pub async fn start<C, F, R, W>(
    config: Result<SessionConfig, ChatError>,
    connect: F,
    input: R,
    out: &mut W,
) -> Result<()>
where
    C: CompletionClient,
    F: FnOnce(&SessionConfig) -> Result<C>,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            console::error(out, format_args!("Error: {}", err))?;
            return Ok(());
        }
    };
    info!(model = %config.model, verbose = config.verbose, "starting chat session");

    let client = connect(&config)?;
    let mut session = Session::new(&config, client);
    session.run(input, out).await?;

    debug!(turns = session.transcript().len(), "session ended");
    Ok(())
}

/// State for one run of the chat loop.
pub struct Session<'a, C> {
    config: &'a SessionConfig,
    client: C,
    transcript: Transcript,
}

impl<'a, C: CompletionClient> Session<'a, C> {
    pub fn new(config: &'a SessionConfig, client: C) -> Self {
        Self {
            config,
            client,
            transcript: Transcript::new(SYSTEM_PROMPT),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run until `exit` or end of input.
    ///
    /// Backend failures are printed and the loop continues; only console I/O
    /// errors are returned.
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        console::clear_screen(out)?;
        console::banner(out, self.config.model)?;

        let mut lines = LineReader::new(input);
        loop {
            console::user_prompt(out)?;
            let Some(line) = lines.next_line().await? else {
                debug!("input closed");
                break;
            };

            let text = match Command::parse(&line) {
                Command::Exit => break,
                Command::Clear => {
                    console::clear_screen(out)?;
                    continue;
                }
                Command::Paste => {
                    console::paste_prompt(out)?;
                    collect_paste(&mut lines).await?
                }
                Command::Text(text) => text,
            };

            if text.is_empty() {
                continue;
            }

            self.exchange(text, out).await?;
        }

        Ok(())
    }

    /// Send one user message and stream the reply.
    async fn exchange<W: Write>(&mut self, text: String, out: &mut W) -> Result<()> {
        self.transcript.push_user(text.as_str());
        let start = Instant::now();

        let request = CompletionRequest {
            model: self.config.model.id(),
            messages: self.transcript.turns(),
            temperature: self.config.temperature,
            stream: true,
        };

        let mut stream = match self.client.create_stream(&request).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!("{:#}", err);
                console::error(out, &err)?;
                return Ok(());
            }
        };

        console::assistant_marker(out)?;
        let mut response = String::new();
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    console::fragment(out, &fragment)?;
                    response.push_str(&fragment);
                }
                Err(err) => {
                    debug!("{:#}", err);
                    console::error(out, &err)?;
                    break;
                }
            }
        }
        drop(stream);

        writeln!(out)?;
        let elapsed = start.elapsed();

        let metrics = TurnMetrics::measure(&text, &response, elapsed);
        self.transcript.push_assistant(response);
        debug!(
            turns = self.transcript.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "exchange complete"
        );

        if self.config.verbose {
            metrics.render(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FragmentStream;
    use crate::protocol::{Role, Turn};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures::stream::{self, Stream};
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    /// What the fake backend does for one request.
    enum Reply {
        Refuse(&'static str),
        Stream(Vec<Result<&'static str, &'static str>>),
    }

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<Vec<Turn>>>,
        opened: AtomicUsize,
        released: AtomicUsize,
    }

    struct ScriptedClient {
        replies: Mutex<VecDeque<Reply>>,
        recorder: Arc<Recorder>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Reply>) -> (Self, Arc<Recorder>) {
            let recorder = Arc::new(Recorder::default());
            let client = Self {
                replies: Mutex::new(replies.into()),
                recorder: Arc::clone(&recorder),
            };
            (client, recorder)
        }
    }

    /// Counts its own release so tests can check streams are dropped once.
    struct TrackedStream {
        inner: FragmentStream,
        recorder: Arc<Recorder>,
    }

    impl Stream for TrackedStream {
        type Item = Result<String, ChatError>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inner.poll_next_unpin(cx)
        }
    }

    impl Drop for TrackedStream {
        fn drop(&mut self) {
            self.recorder.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn create_stream(
            &self,
            request: &CompletionRequest<'_>,
        ) -> Result<FragmentStream, ChatError> {
            assert!(request.stream);
            assert_eq!(request.temperature, 0.7);
            self.recorder
                .requests
                .lock()
                .unwrap()
                .push(request.messages.to_vec());

            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Stream(vec![Ok("ok")]));

            match reply {
                Reply::Refuse(message) => Err(ChatError::StreamCreation(anyhow!(message))),
                Reply::Stream(items) => {
                    self.recorder.opened.fetch_add(1, Ordering::SeqCst);
                    let items = items.into_iter().map(|item| {
                        item.map(str::to_string)
                            .map_err(|e| ChatError::StreamReceive(anyhow!(e)))
                    });
                    Ok(TrackedStream {
                        inner: stream::iter(items).boxed(),
                        recorder: Arc::clone(&self.recorder),
                    }
                    .boxed())
                }
            }
        }
    }

    fn config(verbose: bool) -> SessionConfig {
        SessionConfig::from_vars(Some("gsk_test".into()), None, verbose).unwrap()
    }

    async fn run_session(
        config: &SessionConfig,
        replies: Vec<Reply>,
        input: impl AsRef<[u8]>,
    ) -> (Transcript, Arc<Recorder>, String) {
        let (client, recorder) = ScriptedClient::new(replies);
        let mut session = Session::new(config, client);
        let mut out = Vec::new();
        session.run(input.as_ref(), &mut out).await.unwrap();
        let output = String::from_utf8(out).unwrap();
        (session.transcript().clone(), recorder, output)
    }

    fn roles(transcript: &Transcript) -> Vec<Role> {
        transcript.turns().iter().map(|t| t.role).collect()
    }

    #[tokio::test]
    async fn test_exchanges_alternate_after_seed() {
        let config = config(false);
        let replies = vec![
            Reply::Stream(vec![Ok("Hi"), Ok(" there")]),
            Reply::Stream(vec![Ok("Fine")]),
            Reply::Stream(vec![Ok("Bye")]),
        ];
        let (transcript, recorder, output) =
            run_session(&config, replies, "hello\nhow are you\nsee ya\nexit\n").await;

        assert_eq!(transcript.len(), 1 + 2 * 3);
        assert_eq!(
            roles(&transcript),
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
            ]
        );
        assert_eq!(transcript.turns()[0], Turn::system(SYSTEM_PROMPT));
        assert_eq!(transcript.turns()[2], Turn::assistant("Hi there"));
        assert!(output.contains("Hi there"));

        // Each request carries the full transcript up to the new user turn.
        let requests = recorder.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].len(), 2);
        assert_eq!(requests[2].len(), 6);
        assert_eq!(requests[2].last().unwrap(), &Turn::user("see ya"));
    }

    #[tokio::test]
    async fn test_banner_and_model_in_request() {
        let config = SessionConfig::from_vars(Some("k".into()), Some("llama-70b".into()), false)
            .unwrap();
        let (_, _, output) = run_session(&config, vec![], "exit\n").await;
        assert!(output.contains("Chat started using model: llama3-70b-8192"));
    }

    #[tokio::test]
    async fn test_paste_collects_until_done() {
        let config = config(false);
        let (transcript, recorder, output) =
            run_session(&config, vec![], "paste\na\nb\ndone\nexit\n").await;

        assert!(output.contains("Enter your text"));
        assert_eq!(transcript.turns()[1], Turn::user("a\nb"));
        assert_eq!(recorder.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_paste_makes_no_call() {
        let config = config(false);
        let (transcript, recorder, _) = run_session(&config, vec![], "paste\ndone\nexit\n").await;
        assert_eq!(transcript.len(), 1);
        assert!(recorder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_line_makes_no_call() {
        let config = config(false);
        let (transcript, recorder, _) = run_session(&config, vec![], "\n\nexit\n").await;
        assert_eq!(transcript.len(), 1);
        assert!(recorder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exit_stops_prompting() {
        let config = config(false);
        let (transcript, recorder, output) =
            run_session(&config, vec![], "exit\nhello\nexit\n").await;
        assert_eq!(output.matches("You: ").count(), 1);
        assert_eq!(transcript.len(), 1);
        assert!(recorder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_of_input_ends_session() {
        let config = config(false);
        let (transcript, _, output) = run_session(&config, vec![], "hello\n").await;
        assert_eq!(transcript.len(), 3);
        assert_eq!(output.matches("You: ").count(), 2);
    }

    #[tokio::test]
    async fn test_clear_never_touches_transcript() {
        let config = config(false);
        let (transcript, recorder, output) = run_session(&config, vec![], "clear\nexit\n").await;
        assert_eq!(transcript.len(), 1);
        assert!(recorder.requests.lock().unwrap().is_empty());
        // Once at startup, once for the command.
        assert_eq!(output.matches("\u{1b}[2J").count(), 2);
    }

    #[tokio::test]
    async fn test_stream_creation_failure_leaves_unpaired_user_turn() {
        let config = config(false);
        let replies = vec![
            Reply::Refuse("401 Invalid API Key"),
            Reply::Stream(vec![Ok("second answer")]),
        ];
        let (transcript, recorder, output) =
            run_session(&config, replies, "first\nsecond\nexit\n").await;

        assert!(output.contains("Error creating stream: 401 Invalid API Key"));
        assert_eq!(transcript.len(), 4);
        assert_eq!(
            roles(&transcript),
            vec![Role::System, Role::User, Role::User, Role::Assistant]
        );
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_receive_error_keeps_partial_response() {
        let config = config(false);
        let replies = vec![Reply::Stream(vec![
            Ok("partial"),
            Ok(" answer"),
            Err("connection reset"),
            Ok("never seen"),
        ])];
        let (transcript, recorder, output) = run_session(&config, replies, "q\nexit\n").await;

        assert!(output.contains("Error receiving response: connection reset"));
        assert!(!output.contains("never seen"));
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.turns()[2], Turn::assistant("partial answer"));
        assert_eq!(recorder.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_still_committed() {
        let config = config(false);
        let (transcript, _, _) =
            run_session(&config, vec![Reply::Stream(vec![])], "q\nexit\n").await;
        assert_eq!(transcript.turns()[2], Turn::assistant(""));
    }

    #[tokio::test]
    async fn test_every_stream_released_once() {
        let config = config(false);
        let replies = vec![
            Reply::Stream(vec![Ok("a")]),
            Reply::Stream(vec![Err("boom")]),
            Reply::Stream(vec![Ok("c")]),
        ];
        let (_, recorder, _) = run_session(&config, replies, "1\n2\n3\nexit\n").await;
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.released.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_verbose_prints_metrics() {
        let config = config(true);
        let replies = vec![Reply::Stream(vec![Ok("one two"), Ok(" three")])];
        let (_, _, output) = run_session(&config, replies, "hello big world\nexit\n").await;
        assert!(output.contains("Metrics:"));
        assert!(output.contains("Input tokens: 3"));
        assert!(output.contains("Output tokens: 3"));
        assert!(output.contains("Total tokens: 6"));
        assert!(output.contains("tokens/second"));
    }

    #[tokio::test]
    async fn test_quiet_omits_metrics() {
        let config = config(false);
        let (_, _, output) = run_session(&config, vec![], "hello\nexit\n").await;
        assert!(!output.contains("Metrics:"));
    }

    #[tokio::test]
    async fn test_verbose_counts_pasted_lines_as_one_token() {
        let config = config(true);
        let replies = vec![Reply::Stream(vec![])];
        let (_, _, output) = run_session(&config, replies, "paste\na\nb\ndone\nexit\n").await;
        assert!(output.contains("Input tokens: 1"));
        assert!(output.contains("Output tokens: 1"));
        assert!(output.contains("Total tokens: 2"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_session() {
        let config = config(false);
        let (transcript, recorder, _) =
            run_session(&config, vec![], b"caf\xe9\nhello\nexit\n").await;

        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript.turns()[1], Turn::user("caf\u{fffd}"));
        assert_eq!(transcript.turns()[3], Turn::user("hello"));
        assert_eq!(recorder.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_without_credential_never_prompts_or_connects() {
        let connected = Arc::new(AtomicUsize::new(0));
        let connect = {
            let connected = Arc::clone(&connected);
            move |_: &SessionConfig| -> Result<ScriptedClient> {
                connected.fetch_add(1, Ordering::SeqCst);
                Ok(ScriptedClient::new(vec![]).0)
            }
        };
        let config = SessionConfig::from_vars(None, Some("mixtral".into()), true);
        let mut out = Vec::new();
        start(config, connect, "hello\nexit\n".as_bytes(), &mut out)
            .await
            .unwrap();

        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Error: GROQ_API_KEY environment variable not set"));
        assert!(!output.contains("You: "));
        assert!(!output.contains("Chat started"));
        assert_eq!(connected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_with_credential_runs_session() {
        let (client, recorder) = ScriptedClient::new(vec![Reply::Stream(vec![Ok("hey")])]);
        let mut out = Vec::new();
        start(
            Ok(config(false)),
            move |_: &SessionConfig| Ok(client),
            "hello\nexit\n".as_bytes(),
            &mut out,
        )
        .await
        .unwrap();

        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Chat started using model: llama-3.1-8b-instant"));
        assert_eq!(output.matches("You: ").count(), 2);
        assert!(output.contains("hey"));
        assert_eq!(recorder.requests.lock().unwrap().len(), 1);
    }

    /// Captures formatted log output for one test.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_backend_errors_shown_once_under_default_filter() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("chat_cli=warn"))
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let config = config(false);
        let replies = vec![
            Reply::Refuse("401 Invalid API Key"),
            Reply::Stream(vec![Ok("partial"), Err("connection reset")]),
        ];
        let (_, _, output) = run_session(&config, replies, "a\nb\nexit\n").await;

        assert_eq!(output.matches("Error creating stream").count(), 1);
        assert_eq!(output.matches("Error receiving response").count(), 1);
        let logged = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(!logged.contains("Error creating stream"));
        assert!(!logged.contains("Error receiving response"));
    }
}
