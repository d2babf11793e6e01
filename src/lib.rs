pub mod chunker;
pub mod commands;
pub mod config;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod repl;
pub mod session;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

use config::Config;
use embedding::OpenAiEmbedder;
use error::Result;
use llm::openai::{OpenAiChat, OpenAiConfig};
use repl::Repl;
use session::{Services, Session};

/// Run one interactive session on stdin/stdout, indexing `files` first if any.
pub async fn run(config: Config, files: Vec<PathBuf>, show_sources: bool) -> Result<()> {
    tracing::info!(?config, "Starting doc-qa");

    let openai = OpenAiConfig {
        api_key: config.api_key.clone(),
        base_url: config.base_url.clone(),
    };
    let services = Services {
        embedder: Arc::new(OpenAiEmbedder::new(openai.clone(), &config.embedding_model)),
        chat: Arc::new(OpenAiChat::new(openai, config.max_retries)),
    };

    let mut session = Session::new(config, services);
    let mut repl = Repl::new(tokio::io::stdout(), show_sources);

    let result = async {
        repl.greet(&session).await?;
        if !files.is_empty() {
            let outcome = repl.upload(&mut session, &files).await;
            repl.report(outcome).await?;
        }
        repl.run(&mut session, BufReader::new(tokio::io::stdin())).await
    }
    .await;

    session.end();
    result
}
