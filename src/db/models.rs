/// A stored chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: String,
    pub source: String,
    pub chunk_index: i64,
    pub content: String,
    /// Cosine similarity to the query, higher is closer
    pub score: f32,
}

/// Row counts of a store, for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub chunks: usize,
    pub sources: usize,
}
