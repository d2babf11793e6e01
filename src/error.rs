use crate::llm::LlmError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },
    #[error("Embedding failed: {0}")]
    Embedding(#[source] LlmError),
    #[error("Vector store error: {0}")]
    VectorStore(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("No documents uploaded yet, upload a .txt or .pdf file first")]
    NoDocuments,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::VectorStore(err.to_string())
    }
}
