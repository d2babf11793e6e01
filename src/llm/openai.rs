use super::{ChatClient, ChatMessage, ChatRequest, LlmError, TokenStream};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct OpenAiStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    error: Option<OpenAiErrorBody>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

/// POST a JSON body to `{base_url}{path}`, turning non-2xx replies into `LlmError::Api`.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    config: &OpenAiConfig,
    path: &str,
    body: &T,
) -> Result<Response, LlmError> {
    let mut req = client
        .post(format!("{}{}", config.base_url, path))
        .header("Content-Type", "application/json")
        .json(body);

    if !config.api_key.is_empty() {
        req = req.header("Authorization", format!("Bearer {}", config.api_key));
    }

    let resp = req.send().await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }

    Ok(resp)
}

/// Run `operation`, retrying transient failures up to `max_retries` extra times
/// with exponential backoff starting at `base_delay`.
pub(crate) async fn retry_transient<F, Fut, T>(
    max_retries: u32,
    base_delay: Duration,
    operation: F,
) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let delay = base_delay * 2u32.pow(attempt);
                tracing::warn!(
                    "Chat request failed (attempt {}/{}): {}; retrying in {:?}",
                    attempt + 1,
                    max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Streaming chat client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiChat {
    client: Client,
    config: OpenAiConfig,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAiChat {
    pub fn new(config: OpenAiConfig, max_retries: u32) -> Self {
        Self {
            client: Client::new(),
            config,
            max_retries,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiChat {
    async fn chat_stream(&self, request: &ChatRequest) -> Result<TokenStream, LlmError> {
        let body = OpenAiRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            temperature: request.temperature,
        };

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Starting chat completion stream"
        );

        let resp = retry_transient(self.max_retries, self.retry_delay, || {
            post_json(&self.client, &self.config, "/chat/completions", &body)
        })
        .await?;

        Ok(decode_token_stream(resp.bytes_stream()))
    }
}

/// One decoded server-sent event of a completion stream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Splits raw SSE bytes into lines. Bytes are buffered until a full line is
/// available so multi-byte characters split across network chunks survive.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(parse_line(&String::from_utf8_lossy(&line)));
        }
        events
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&rest))
    }
}

fn parse_line(line: &str) -> Vec<SseEvent> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return vec![];
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return vec![SseEvent::Done];
    }

    let parsed = match serde_json::from_str::<OpenAiStreamResponse>(data) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("Skipping unparseable stream line: {}", e);
            return vec![];
        }
    };

    if let Some(error) = parsed.error {
        return vec![SseEvent::Error(error.message)];
    }

    let mut events = Vec::new();
    if let Some(choice) = parsed.choices.into_iter().next() {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(SseEvent::Delta(content));
        }
        if choice.finish_reason.is_some() {
            events.push(SseEvent::Done);
        }
    }
    events
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Turn a body byte stream into a stream of content fragments that ends at
/// `[DONE]`, at a `finish_reason`, or when the body ends.
pub(crate) fn decode_token_stream<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                match event {
                    SseEvent::Delta(text) => return Some((Ok(text), state)),
                    SseEvent::Done => return None,
                    SseEvent::Error(message) => {
                        state.finished = true;
                        state.pending.clear();
                        return Some((Err(LlmError::Stream(message)), state));
                    }
                }
            }

            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.finished = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}
