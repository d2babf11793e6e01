//! Per-user conversation state, passed explicitly to every handler.

use std::sync::Arc;
use uuid::Uuid;

use crate::commands::knowledge::IndexState;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::llm::{ChatClient, ChatMessage};

pub const GREETING: &str = "Ask something about the uploaded article";

/// Where the session is in answering a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingRetrieval,
    AwaitingCompletionStream,
}

/// Hosted capabilities the pipeline calls out to.
#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatClient>,
}

pub struct Session {
    id: Uuid,
    config: Config,
    services: Services,
    history: Vec<ChatMessage>,
    index: Option<IndexState>,
    phase: Phase,
}

impl Session {
    /// Start a session: greeting in the history, no documents yet.
    pub fn new(config: Config, services: Services) -> Self {
        let id = Uuid::new_v4();
        tracing::info!(session = %id, "Session started");
        Self {
            id,
            config,
            services,
            history: vec![ChatMessage::assistant(GREETING)],
            index: None,
            phase: Phase::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn index(&self) -> Option<&IndexState> {
        self.index.as_ref()
    }

    /// Questions are accepted once a batch has been indexed.
    pub fn has_documents(&self) -> bool {
        self.index.is_some()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        tracing::debug!(session = %self.id, ?phase, "Phase change");
        self.phase = phase;
    }

    pub(crate) fn push_message(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    /// Drop the current batch, e.g. because a new upload started.
    pub(crate) fn clear_index(&mut self) {
        if let Some(old) = self.index.take() {
            tracing::info!(session = %self.id, batch = %old.batch_id, "Discarding previous batch");
        }
    }

    pub(crate) fn replace_index(&mut self, index: IndexState) -> &IndexState {
        self.clear_index();
        self.index.insert(index)
    }

    /// Tear the session down, releasing the store and the history.
    pub fn end(self) {
        tracing::info!(
            session = %self.id,
            messages = self.history.len(),
            "Session ended"
        );
    }
}
