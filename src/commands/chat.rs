use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::commands::knowledge::retrieve;
use crate::db::models::RetrievedChunk;
use crate::error::{AppError, Result};
use crate::llm::{ChatMessage, ChatRequest, TokenStream};
use crate::session::{Phase, Session};

const CONTEXT_PREAMBLE: &str = "Here's the extracted context from the uploaded documents:\n\n";

/// Retrieved chunk contents, separated by blank lines.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One system message carrying the context, then the whole conversation.
pub fn build_messages(context: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(format!("{}{}", CONTEXT_PREAMBLE, context)));
    messages.extend(history.iter().cloned());
    messages
}

/// Handle a question: record it, retrieve context and start the completion.
///
/// The returned stream yields answer fragments as they arrive; the assembled
/// answer joins the history once the stream ends. Any failure puts the
/// session back to idle with the question kept and no answer stored.
pub async fn on_question<'s>(session: &'s mut Session, question: &str) -> Result<AnswerStream<'s>> {
    if !session.has_documents() {
        return Err(AppError::NoDocuments);
    }

    session.push_message(ChatMessage::user(question));

    let started = start_completion(session, question).await;
    match started {
        Ok((tokens, sources)) => Ok(AnswerStream {
            session,
            tokens,
            answer: String::new(),
            sources,
            done: false,
        }),
        Err(e) => {
            tracing::error!(session = %session.id(), "Question failed: {}", e);
            session.set_phase(Phase::Idle);
            Err(e)
        }
    }
}

async fn start_completion(
    session: &mut Session,
    question: &str,
) -> Result<(TokenStream, Vec<RetrievedChunk>)> {
    session.set_phase(Phase::AwaitingRetrieval);

    let services = session.services().clone();
    let top_k = session.config().top_k;
    let index = session.index().ok_or(AppError::NoDocuments)?;
    let sources = retrieve(index, services.embedder.as_ref(), question, top_k).await?;

    let context = build_context(&sources);
    let request = ChatRequest {
        messages: build_messages(&context, session.history()),
        model: session.config().chat_model.clone(),
        temperature: session.config().temperature,
    };

    session.set_phase(Phase::AwaitingCompletionStream);
    let tokens = services.chat.chat_stream(&request).await?;
    Ok((tokens, sources))
}

/// Answer fragments for one question, in arrival order.
pub struct AnswerStream<'s> {
    session: &'s mut Session,
    tokens: TokenStream,
    answer: String,
    sources: Vec<RetrievedChunk>,
    done: bool,
}

impl AnswerStream<'_> {
    /// The chunks the answer was grounded on.
    pub fn sources(&self) -> &[RetrievedChunk] {
        &self.sources
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    /// Drain the stream and return the full answer.
    pub async fn finish(mut self) -> Result<String> {
        while let Some(token) = self.next().await {
            token?;
        }
        Ok(self.answer.clone())
    }
}

impl Stream for AnswerStream<'_> {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.tokens.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(delta))) => {
                this.answer.push_str(&delta);
                Poll::Ready(Some(Ok(delta)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                tracing::error!(session = %this.session.id(), "Completion stream failed: {}", e);
                this.session.set_phase(Phase::Idle);
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                this.done = true;
                tracing::debug!(
                    session = %this.session.id(),
                    chars = this.answer.chars().count(),
                    "Answer complete"
                );
                this.session
                    .push_message(ChatMessage::assistant(this.answer.clone()));
                this.session.set_phase(Phase::Idle);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for AnswerStream<'_> {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!(session = %self.session.id(), "Answer dropped before the stream ended");
            self.session.set_phase(Phase::Idle);
        }
    }
}
