//! Line-oriented terminal front end: renders the conversation, reads
//! questions and slash commands, and streams answers as they arrive.

use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::commands::{chat, knowledge};
use crate::doc_processor::UploadedFile;
use crate::error::{AppError, Result};
use crate::llm::Role;
use crate::session::Session;

const TITLE: &str = "File Q&A";

const HELP: &str = "\
Commands:
  /upload <path>...  index .txt or .pdf files, replacing the current ones
  /sources           list the files the answers are drawn from
  /history           show the conversation so far
  /help              show this message
  /quit              end the session
Anything else is a question about the uploaded files.";

/// One line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Upload(Vec<PathBuf>),
    Sources,
    History,
    Help,
    Quit,
    Question(String),
    Unknown(String),
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if !line.starts_with('/') {
        return Input::Question(line.to_string());
    }

    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    match command {
        "/upload" => Input::Upload(words.map(PathBuf::from).collect()),
        "/sources" => Input::Sources,
        "/history" => Input::History,
        "/help" => Input::Help,
        "/quit" | "/exit" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

pub struct Repl<W> {
    out: W,
    show_sources: bool,
}

impl<W: AsyncWrite + Unpin> Repl<W> {
    pub fn new(out: W, show_sources: bool) -> Self {
        Self { out, show_sources }
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn line(&mut self, text: &str) -> Result<()> {
        self.write(text).await?;
        self.write("\n").await
    }

    /// Title and the conversation so far.
    pub async fn greet(&mut self, session: &Session) -> Result<()> {
        self.line(&format!("{}  (type /help for commands)", TITLE)).await?;
        self.print_history(session).await
    }

    pub async fn print_history(&mut self, session: &Session) -> Result<()> {
        for message in session.history() {
            self.line(&format!("{}> {}", role_label(message.role), message.content))
                .await?;
        }
        Ok(())
    }

    /// Read the files from disk and index them as a new batch.
    pub async fn upload(&mut self, session: &mut Session, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return self.line("usage: /upload <path>...").await;
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match UploadedFile::read(path).await {
                Ok(file) => files.push(file),
                Err(e) => {
                    return self
                        .line(&format!("error: cannot read {}: {}", path.display(), e))
                        .await;
                }
            }
        }

        let index = knowledge::on_upload(session, &files).await?;
        let stats = index.stats()?;
        let skipped: Vec<String> = index
            .skipped
            .iter()
            .map(|s| format!("skipped {}: {}", s.source, s.reason))
            .collect();

        for notice in &skipped {
            self.line(notice).await?;
        }
        self.line(&format!(
            "Indexed {} chunk(s) from {} file(s)",
            stats.chunks, stats.sources
        ))
        .await
    }

    pub async fn print_sources(&mut self, session: &Session) -> Result<()> {
        let Some(index) = session.index() else {
            return self.line(&AppError::NoDocuments.to_string()).await;
        };
        let mut lines: Vec<String> = index.sources.iter().map(|s| format!("  {}", s)).collect();
        lines.extend(
            index
                .skipped
                .iter()
                .map(|s| format!("  {} (skipped: {})", s.source, s.reason)),
        );
        if lines.is_empty() {
            lines.push("  (no readable text in the uploaded files)".into());
        }
        for line in lines {
            self.line(&line).await?;
        }
        Ok(())
    }

    /// Ask a question and write the answer token by token.
    pub async fn ask(&mut self, session: &mut Session, question: &str) -> Result<()> {
        let mut answer = chat::on_question(session, question).await?;
        let sources: Vec<String> = answer
            .sources()
            .iter()
            .map(|c| format!("{}#{} ({:.2})", c.source, c.chunk_index, c.score))
            .collect();

        self.write(&format!("{}> ", role_label(Role::Assistant))).await?;
        while let Some(token) = answer.next().await {
            match token {
                Ok(delta) => self.write(&delta).await?,
                Err(e) => {
                    self.write("\n").await?;
                    return Err(e);
                }
            }
        }
        self.write("\n").await?;

        if self.show_sources && !sources.is_empty() {
            self.line(&format!("sources: {}", sources.join(", "))).await?;
        }
        Ok(())
    }

    /// Run until `/quit` or end of input. Failed interactions are reported and
    /// the loop carries on.
    pub async fn run<R>(&mut self, session: &mut Session, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let outcome = match parse_input(&line) {
                Input::Empty => Ok(()),
                Input::Quit => break,
                Input::Help => self.line(HELP).await,
                Input::History => self.print_history(session).await,
                Input::Sources => self.print_sources(session).await,
                Input::Upload(paths) => self.upload(session, &paths).await,
                Input::Question(question) => self.ask(session, &question).await,
                Input::Unknown(command) => {
                    self.line(&format!("unknown command {}, try /help", command)).await
                }
            };

            self.report(outcome).await?;
        }
        Ok(())
    }

    /// Show a failed interaction to the user. Only output errors propagate.
    pub async fn report(&mut self, outcome: Result<()>) -> Result<()> {
        if let Err(e) = outcome {
            tracing::debug!("Interaction failed: {}", e);
            self.line(&format!("error: {}", e)).await?;
        }
        Ok(())
    }
}
