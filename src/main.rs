use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doc_qa::config::Config;

#[derive(Parser)]
#[command(name = "doc-qa")]
#[command(about = "Ask questions about uploaded text and PDF documents", long_about = None)]
#[command(version)]
struct Cli {
    /// .txt or .pdf files to index before the first question
    files: Vec<PathBuf>,

    /// Maximum chunk length in characters
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Characters shared between consecutive chunks
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Number of chunks passed to the model as context
    #[arg(long)]
    top_k: Option<usize>,

    /// Chat completion model (overrides DOC_QA_CHAT_MODEL)
    #[arg(long)]
    chat_model: Option<String>,

    /// Embedding model (overrides DOC_QA_EMBEDDING_MODEL)
    #[arg(long)]
    embedding_model: Option<String>,

    /// OpenAI-compatible API root (overrides OPENAI_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Print the chunks each answer was drawn from
    #[arg(long)]
    show_sources: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.chunk_overlap = overlap;
        }
        if let Some(k) = self.top_k {
            config.top_k = k;
        }
        if let Some(model) = &self.chat_model {
            config.chat_model = model.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = model.clone();
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.trim_end_matches('/').to_string();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the conversation.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_qa=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    cli.apply(&mut config);

    doc_qa::run(config, cli.files, cli.show_sources).await?;
    Ok(())
}
