use anyhow::{Context, Result};
use futures_util::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::IndexingConfig;
use crate::llm::{Clock, SharedEmbedder};
use crate::models::{Chunk, EmbeddingRecord};
use crate::store::SharedStore;

/// Embeds chunks in batches and appends them to a repository's code space.
pub struct Indexer {
    embedder: SharedEmbedder,
    store: SharedStore,
    clock: Arc<dyn Clock>,
    config: IndexingConfig,
}

impl Indexer {
    pub fn new(
        embedder: SharedEmbedder,
        store: SharedStore,
        clock: Arc<dyn Clock>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            clock,
            config,
        }
    }

    /// Embed and persist `chunks`. Returns how many records were stored.
    ///
    /// Each batch is embedded concurrently and persisted before the next one
    /// starts. An embedding error stops the run; batches already persisted
    /// stay in the store.
    pub async fn index(&self, chunks: &[Chunk], repository_id: Uuid) -> Result<usize> {
        let batch_size = self.config.batch_size.max(1);
        let total_batches = chunks.len().div_ceil(batch_size);
        let mut stored = 0usize;

        for (n, batch) in chunks.chunks(batch_size).enumerate() {
            if n > 0 {
                self.clock
                    .sleep(Duration::from_millis(self.config.batch_pause_ms))
                    .await;
            }

            let vectors = try_join_all(batch.iter().map(|chunk| {
                let text = truncate_chars(&chunk.content, self.config.embed_char_limit);
                self.embedder.embed(text)
            }))
            .await
            .with_context(|| {
                format!(
                    "Embedding batch {}/{total_batches} failed for repository {repository_id}",
                    n + 1
                )
            })?;

            let records: Vec<EmbeddingRecord> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddingRecord {
                    content: chunk.content.clone(),
                    vector,
                    metadata: chunk.metadata(),
                })
                .collect();

            stored += records.len();
            self.store
                .append_code_embeddings(repository_id, records)
                .await?;
            tracing::info!(
                "Indexed batch {}/{total_batches} for repository {repository_id} ({stored}/{} chunks)",
                n + 1,
                chunks.len()
            );
        }

        Ok(stored)
    }
}

/// First `limit` characters of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
