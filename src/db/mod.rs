pub mod models;

use models::{RetrievedChunk, StoreStats};
use rusqlite::{params, Connection};
use std::sync::{Mutex, MutexGuard};

use crate::chunker::Chunk;
use crate::embedding::{bytes_to_embedding, embedding_to_bytes, search_similar};
use crate::error::{AppError, Result};

/// Similarity store for one upload batch, held in an in-memory SQLite database.
/// Dropping the store discards every entry.
pub struct VectorStore {
    conn: Mutex<Connection>,
}

impl VectorStore {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chunks (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::VectorStore("connection lock poisoned".into()))
    }

    /// Insert chunks with their embeddings in one transaction.
    pub fn insert_chunks(&self, entries: &[(Chunk, Vec<f32>)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, source, chunk_index, content, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (chunk, embedding) in entries {
                let chunk_id = uuid::Uuid::new_v4().to_string();
                stmt.execute(params![
                    chunk_id,
                    chunk.source(),
                    chunk.chunk_index as i64,
                    chunk.content,
                    embedding_to_bytes(embedding),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The `top_k` stored chunks closest to `query_embedding`, most similar first.
    pub fn similarity_search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let conn = self.lock()?;

        let emb_pairs: Vec<(i64, Vec<f32>)> = {
            let mut stmt = conn.prepare("SELECT row_id, embedding FROM chunks ORDER BY row_id")?;
            let rows = stmt.query_map([], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok((row.get(0)?, bytes_to_embedding(&bytes)))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut stmt = conn.prepare(
            "SELECT id, source, chunk_index, content FROM chunks WHERE row_id = ?1",
        )?;
        let hits = search_similar(query_embedding, &emb_pairs, top_k)
            .into_iter()
            .map(|(row_id, score)| -> Result<RetrievedChunk> {
                let hit = stmt.query_row(params![row_id], |row| {
                    Ok(RetrievedChunk {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        chunk_index: row.get(2)?,
                        content: row.get(3)?,
                        score,
                    })
                })?;
                Ok(hit)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(hits)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let (chunks, sources): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT source) FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StoreStats {
            chunks: chunks as usize,
            sources: sources as usize,
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.stats()?.chunks == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_documents;
    use crate::doc_processor::Document;

    fn chunk(content: &str, source: &str) -> Chunk {
        chunk_documents(&[Document::new(content.into(), source)], 800, 100)
            .pop()
            .unwrap()
    }

    #[test]
    fn test_empty_store() {
        let store = VectorStore::open_in_memory().unwrap();
        assert!(store.is_empty().unwrap());
        assert!(store.similarity_search(&[1.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_search_ranked() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .insert_chunks(&[
                (chunk("north", "a.txt"), vec![0.0, 1.0]),
                (chunk("east", "a.txt"), vec![1.0, 0.0]),
                (chunk("north-east", "b.txt"), vec![0.7, 0.7]),
                (chunk("mostly east", "b.txt"), vec![0.9, 0.1]),
            ])
            .unwrap();

        assert_eq!(
            store.stats().unwrap(),
            StoreStats {
                chunks: 4,
                sources: 2
            }
        );

        let hits = store.similarity_search(&[1.0, 0.0], 3).unwrap();
        let contents: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["east", "mostly east", "north-east"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(hits[1].source, "b.txt");
        assert_eq!(hits[0].chunk_index, 0);
    }

    #[test]
    fn test_search_returns_fewer_than_k_when_small() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .insert_chunks(&[(chunk("only", "a.txt"), vec![1.0])])
            .unwrap();
        assert_eq!(store.similarity_search(&[1.0], 3).unwrap().len(), 1);
    }
}
