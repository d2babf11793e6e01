use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::error::{AppError, Result};

/// Metadata key holding the originating filename.
pub const SOURCE_KEY: &str = "source";

/// A file as handed over by the user: raw bytes plus its name.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk, using its file name as the source name.
    pub async fn read(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self { name, bytes })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Pdf,
}

impl FileKind {
    /// Pick the extraction method from the filename extension (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "txt" => Some(FileKind::Text),
            "pdf" => Some(FileKind::Pdf),
            _ => None,
        }
    }
}

/// Extracted text of one uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(content: String, source: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(SOURCE_KEY.to_string(), source.to_string());
        Self { content, metadata }
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedExtension,
    NoExtractableText,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnsupportedExtension => write!(f, "only .txt and .pdf files are supported"),
            SkipReason::NoExtractableText => write!(f, "no extractable text (scanned or image-only PDF?)"),
        }
    }
}

/// A file that produced no document.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub source: String,
    pub reason: SkipReason,
}

/// Documents loaded from one upload batch, plus the files that yielded none.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

/// Decode a text file; invalid UTF-8 sequences become U+FFFD. Always one document.
pub fn load_text(bytes: &[u8], source: &str) -> Vec<Document> {
    let content = String::from_utf8_lossy(bytes).into_owned();
    vec![Document::new(content, source)]
}

/// Join the pages that carry text with newlines. No text at all means no document.
/// A page counts as empty when it is blank after trimming, not only when it is
/// the empty string: image-only pages extract to bare newlines.
pub fn documents_from_pages(pages: Vec<String>, source: &str) -> Vec<Document> {
    let joined = pages
        .into_iter()
        .filter(|page| !page.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if joined.is_empty() {
        vec![]
    } else {
        vec![Document::new(joined, source)]
    }
}

/// Extract a PDF page by page.
///
/// `pdf_extract` panics on some malformed inputs instead of returning an
/// error; those panics are caught and reported as a parse failure.
pub fn load_pdf(bytes: &[u8], source: &str) -> Result<Vec<Document>> {
    let extracted = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));

    let pages = match extracted {
        Ok(Ok(pages)) => pages,
        Ok(Err(e)) => {
            return Err(AppError::file_parse(source, format!("PDF parse error: {}", e)));
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(source = %source, "PDF extraction panicked: {}", message);
            return Err(AppError::file_parse(
                source,
                format!("malformed PDF: {}", message),
            ));
        }
    };
    Ok(documents_from_pages(pages, source))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "extraction aborted".to_string()
    }
}

/// Load a single file, returning its documents or why it produced none.
pub fn load_file(file: &UploadedFile) -> Result<std::result::Result<Vec<Document>, SkipReason>> {
    let docs = match FileKind::from_name(&file.name) {
        Some(FileKind::Text) => load_text(&file.bytes, &file.name),
        Some(FileKind::Pdf) => load_pdf(&file.bytes, &file.name)?,
        None => return Ok(Err(SkipReason::UnsupportedExtension)),
    };

    if docs.is_empty() {
        Ok(Err(SkipReason::NoExtractableText))
    } else {
        Ok(Ok(docs))
    }
}

/// Load every file of an upload batch in order.
pub fn load_files(files: &[UploadedFile]) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for file in files {
        match load_file(file)? {
            Ok(docs) => {
                tracing::debug!(source = %file.name, bytes = file.bytes.len(), "Loaded file");
                report.documents.extend(docs);
            }
            Err(reason) => {
                tracing::warn!(source = %file.name, "Skipping file: {}", reason);
                report.skipped.push(SkippedFile {
                    source: file.name.clone(),
                    reason,
                });
            }
        }
    }

    Ok(report)
}
