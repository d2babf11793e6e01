//! In-process stand-ins for the hosted services, used by unit tests.

use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::embedding::Embedder;
use crate::llm::{ChatClient, ChatRequest, LlmError, TokenStream};
use crate::session::Services;

const DIMENSIONS: usize = 256;

/// Bag-of-words embedding: lowercase alphanumeric words hashed into buckets.
/// Texts sharing words get a positive cosine similarity.
#[derive(Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[fnv1a(&word.to_lowercase()) % DIMENSIONS] += 1.0;
        }
        vector
    }
}

fn fnv1a(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash as usize
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Err(LlmError::Api {
            status: 400,
            message: "embedding rejected".into(),
        })
    }
}

enum Script {
    Answer(Vec<String>),
    BreakAfter(Vec<String>, String),
    Fail(Mutex<Option<LlmError>>),
}

/// Chat client replaying a fixed script and recording every request.
pub struct ScriptedChat {
    script: Script,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    fn with(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(tokens: &[&str]) -> Self {
        Self::with(Script::Answer(tokens.iter().map(|t| t.to_string()).collect()))
    }

    pub fn breaking_after(tokens: &[&str], message: &str) -> Self {
        Self::with(Script::BreakAfter(
            tokens.iter().map(|t| t.to_string()).collect(),
            message.to_string(),
        ))
    }

    /// Fails the first request with `error`.
    pub fn failing(error: LlmError) -> Self {
        Self::with(Script::Fail(Mutex::new(Some(error))))
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn chat_stream(&self, request: &ChatRequest) -> Result<TokenStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());

        let items: Vec<Result<String, LlmError>> = match &self.script {
            Script::Answer(tokens) => tokens.iter().cloned().map(Ok).collect(),
            Script::BreakAfter(tokens, message) => tokens
                .iter()
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(LlmError::Stream(message.clone()))))
                .collect(),
            Script::Fail(error) => {
                let error = error
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or_else(|| LlmError::Stream("script exhausted".into()));
                return Err(error);
            }
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

pub fn fake_services(chat: impl Into<Arc<ScriptedChat>>) -> Services {
    let chat: Arc<ScriptedChat> = chat.into();
    Services {
        embedder: Arc::new(HashEmbedder::default()),
        chat,
    }
}
