//! Embedding index and similarity search over the two embedding spaces.

pub mod indexer;
pub mod vector;

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::llm::Embedder;
use crate::models::ChunkMetadata;
use crate::store::Store;

pub use indexer::Indexer;
pub use vector::{cosine_similarity, filter_by_threshold, top_k, top_k_above, Scored};

/// Which embedding space to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Code(Uuid),
    Conversation(Uuid),
}

/// How many results to keep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Retrieval {
    TopK(usize),
    Threshold {
        min_score: f32,
        /// Conversation whose own pairs are skipped.
        exclude: Option<Uuid>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "space", rename_all = "snake_case")]
pub enum HitSource {
    Code(ChunkMetadata),
    Conversation { conversation_id: Uuid },
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
    pub source: HitSource,
}

/// Embed `query` and search one space of a repository.
pub async fn find_similar(
    store: &dyn Store,
    embedder: &dyn Embedder,
    query: &str,
    space: Space,
    retrieval: Retrieval,
) -> Result<Vec<SearchHit>> {
    let query_vector = embedder
        .embed(query)
        .await
        .context("Failed to embed search query")?;

    let hits = match space {
        Space::Code(repository_id) => {
            let corpus = store.code_embeddings(repository_id).await?;
            select(&query_vector, &corpus, retrieval)
                .into_iter()
                .map(|s| SearchHit {
                    text: s.item.content.clone(),
                    score: s.score,
                    source: HitSource::Code(s.item.metadata.clone()),
                })
                .collect()
        }
        Space::Conversation(repository_id) => {
            let corpus = store.conversation_embeddings(repository_id).await?;
            select(&query_vector, &corpus, retrieval)
                .into_iter()
                .map(|s| SearchHit {
                    text: s.item.text.clone(),
                    score: s.score,
                    source: HitSource::Conversation {
                        conversation_id: s.item.conversation_id,
                    },
                })
                .collect()
        }
    };

    Ok(hits)
}

fn select<'a, T: vector::Embedded>(
    query: &[f32],
    corpus: &'a [T],
    retrieval: Retrieval,
) -> Vec<Scored<&'a T>> {
    match retrieval {
        Retrieval::TopK(k) => top_k(query, corpus, k),
        Retrieval::Threshold { min_score, exclude } => {
            filter_by_threshold(query, corpus, min_score, exclude)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::models::{ChunkKind, ConversationEmbeddingRecord, EmbeddingRecord};
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Maps a text to a fixed direction by its first word.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError> {
            Ok(match text.split_whitespace().next() {
                Some("parse") => vec![1.0, 0.0],
                Some("render") => vec![0.0, 1.0],
                _ => vec![0.7, 0.7],
            })
        }
    }

    fn code(name: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            content: format!("fn {name}() {{}}"),
            vector,
            metadata: ChunkMetadata {
                kind: ChunkKind::Function,
                name: name.into(),
                location: "src/lib.rs".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_find_similar_code_top_k() {
        let store = LocalStore::in_memory();
        let repo = Uuid::new_v4();
        store
            .append_code_embeddings(
                repo,
                vec![
                    code("render", vec![0.0, 1.0]),
                    code("parse", vec![1.0, 0.0]),
                    code("mixed", vec![0.6, 0.4]),
                ],
            )
            .await
            .unwrap();

        let hits = find_similar(
            &store,
            &KeywordEmbedder,
            "parse the input",
            Space::Code(repo),
            Retrieval::TopK(2),
        )
        .await
        .unwrap();

        assert_eq!(hits.len(), 2);
        match &hits[0].source {
            HitSource::Code(meta) => assert_eq!(meta.name, "parse"),
            other => panic!("unexpected source {other:?}"),
        }
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_find_similar_conversation_threshold() {
        let store = LocalStore::in_memory();
        let repo = Uuid::new_v4();
        let active = Uuid::new_v4();
        let earlier = Uuid::new_v4();
        for (id, vector) in [(active, vec![1.0, 0.0]), (earlier, vec![0.9, 0.2])] {
            store
                .append_conversation_embedding(
                    repo,
                    ConversationEmbeddingRecord {
                        conversation_id: id,
                        text: "User: parse?\nAssistant: yes".into(),
                        vector,
                        timestamp: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let hits = find_similar(
            &store,
            &KeywordEmbedder,
            "parse",
            Space::Conversation(repo),
            Retrieval::Threshold {
                min_score: 0.7,
                exclude: Some(active),
            },
        )
        .await
        .unwrap();

        assert_eq!(hits.len(), 1);
        assert!(matches!(
            hits[0].source,
            HitSource::Conversation { conversation_id } if conversation_id == earlier
        ));
    }
}
