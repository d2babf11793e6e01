use uuid::Uuid;

use crate::chunker::{chunk_documents, Chunk};
use crate::db::models::{RetrievedChunk, StoreStats};
use crate::db::VectorStore;
use crate::doc_processor::{self, SkippedFile, UploadedFile};
use crate::embedding::Embedder;
use crate::error::{AppError, Result};
use crate::llm::LlmError;
use crate::session::Session;

/// The searchable state built from one upload batch.
pub struct IndexState {
    pub batch_id: Uuid,
    pub store: VectorStore,
    /// Sources that produced at least one document, in upload order
    pub sources: Vec<String>,
    /// Files that produced no document
    pub skipped: Vec<SkippedFile>,
}

impl IndexState {
    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }
}

/// Handle a new upload batch: load, chunk and index the files, replacing
/// whatever the session had indexed before.
pub async fn on_upload<'s>(
    session: &'s mut Session,
    files: &[UploadedFile],
) -> Result<&'s IndexState> {
    // The file set changed, so the old batch is no longer current even if this one fails.
    session.clear_index();

    let report = doc_processor::load_files(files)?;
    let config = session.config().clone();
    let chunks = chunk_documents(&report.documents, config.chunk_size, config.chunk_overlap);

    let mut sources: Vec<String> = Vec::new();
    for doc in &report.documents {
        if !sources.iter().any(|s| s == doc.source()) {
            sources.push(doc.source().to_string());
        }
    }

    let embedder = session.services().embedder.clone();
    let store = build_index(&chunks, embedder.as_ref(), config.embedding_batch_size).await?;

    let index = IndexState {
        batch_id: Uuid::new_v4(),
        store,
        sources,
        skipped: report.skipped,
    };

    tracing::info!(
        session = %session.id(),
        batch = %index.batch_id,
        files = files.len(),
        documents = report.documents.len(),
        chunks = chunks.len(),
        skipped = index.skipped.len(),
        "Indexed upload batch"
    );

    Ok(session.replace_index(index))
}

/// Embed every chunk and load it into a fresh store.
pub async fn build_index(
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<VectorStore> {
    let store = VectorStore::open_in_memory()?;

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder
            .embed_documents(&texts)
            .await
            .map_err(AppError::Embedding)?;

        if embeddings.len() != batch.len() {
            return Err(AppError::Embedding(LlmError::Parse(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                embeddings.len()
            ))));
        }

        let entries: Vec<(Chunk, Vec<f32>)> = batch.iter().cloned().zip(embeddings).collect();
        store.insert_chunks(&entries)?;
    }

    Ok(store)
}

/// The `top_k` chunks of the current batch closest to the question.
pub async fn retrieve(
    index: &IndexState,
    embedder: &dyn Embedder,
    question: &str,
    top_k: usize,
) -> Result<Vec<RetrievedChunk>> {
    let query_embedding = embedder
        .embed_query(question)
        .await
        .map_err(AppError::Embedding)?;

    let hits = index.store.similarity_search(&query_embedding, top_k)?;
    tracing::debug!(
        batch = %index.batch_id,
        hits = hits.len(),
        top_score = hits.first().map(|h| h.score),
        "Retrieved context"
    );
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::doc_processor::SkipReason;
    use crate::testing::{fake_services, FailingEmbedder, HashEmbedder, ScriptedChat};
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(Config::default(), fake_services(ScriptedChat::answering(&["ok"])))
    }

    fn txt(name: &str, content: &str) -> UploadedFile {
        UploadedFile::new(name, content.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_upload_indexes_single_chunk() {
        let mut session = session();
        let index = on_upload(&mut session, &[txt("sky.txt", "The sky is blue. Grass is green.")])
            .await
            .unwrap();
        assert_eq!(index.sources, vec!["sky.txt"]);
        assert_eq!(
            index.stats().unwrap(),
            StoreStats {
                chunks: 1,
                sources: 1
            }
        );
        assert!(session.has_documents());
    }

    #[tokio::test]
    async fn test_upload_records_skipped_files() {
        let mut session = session();
        let index = on_upload(
            &mut session,
            &[txt("notes.txt", "some notes"), txt("deck.pptx", "slides")],
        )
        .await
        .unwrap();
        assert_eq!(index.sources, vec!["notes.txt"]);
        assert_eq!(index.skipped.len(), 1);
        assert_eq!(index.skipped[0].source, "deck.pptx");
        assert_eq!(index.skipped[0].reason, SkipReason::UnsupportedExtension);
    }

    #[tokio::test]
    async fn test_upload_with_nothing_loadable_gives_empty_store() {
        let mut session = session();
        let index = on_upload(&mut session, &[txt("image.png", "")]).await.unwrap();
        assert!(index.store.is_empty().unwrap());
        assert!(index.sources.is_empty());
    }

    #[tokio::test]
    async fn test_reupload_replaces_previous_batch() {
        let mut session = session();
        let first = on_upload(&mut session, &[txt("cats.txt", "Cats purr when they are happy.")])
            .await
            .unwrap()
            .batch_id;
        let second = on_upload(&mut session, &[txt("rockets.txt", "Rockets launch into orbit.")])
            .await
            .unwrap()
            .batch_id;
        assert_ne!(first, second);

        let index = session.index().unwrap();
        let hits = retrieve(index, &HashEmbedder::default(), "Why do cats purr?", 3)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.source == "rockets.txt"));
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_no_index() {
        let services = crate::session::Services {
            embedder: Arc::new(FailingEmbedder),
            chat: Arc::new(ScriptedChat::answering(&[])),
        };
        let mut session = Session::new(Config::default(), services);
        let err = on_upload(&mut session, &[txt("a.txt", "alpha")]).await.err().unwrap();
        assert!(matches!(err, AppError::Embedding(_)));
        assert!(!session.has_documents());
    }

    #[tokio::test]
    async fn test_build_index_batches_requests() {
        let embedder = HashEmbedder::default();
        let docs = vec![crate::doc_processor::Document::new(
            "one two three four five six seven eight nine ten".into(),
            "n.txt",
        )];
        let chunks = chunk_documents(&docs, 10, 0);
        assert!(chunks.len() > 3);

        let store = build_index(&chunks, &embedder, 2).await.unwrap();
        assert_eq!(store.stats().unwrap().chunks, chunks.len());
        assert_eq!(embedder.calls(), chunks.len().div_ceil(2));
    }

    #[tokio::test]
    async fn test_retrieve_ranks_and_limits() {
        let embedder = HashEmbedder::default();
        let docs = vec![
            crate::doc_processor::Document::new("Rockets launch into orbit.".into(), "a.txt"),
            crate::doc_processor::Document::new("Cats purr when happy.".into(), "b.txt"),
            crate::doc_processor::Document::new("Gardens grow tomatoes.".into(), "c.txt"),
            crate::doc_processor::Document::new("Orbit decay ends satellites.".into(), "d.txt"),
        ];
        let chunks = chunk_documents(&docs, 800, 100);
        let index = IndexState {
            batch_id: Uuid::new_v4(),
            store: build_index(&chunks, &embedder, 64).await.unwrap(),
            sources: vec![],
            skipped: vec![],
        };

        let hits = retrieve(&index, &embedder, "rockets launch", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].source, "a.txt");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
