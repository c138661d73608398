//! Linear-scan cosine similarity over an embedding space.

use uuid::Uuid;

use crate::models::{ConversationEmbeddingRecord, EmbeddingRecord};

/// Anything stored with a vector.
pub trait Embedded {
    fn vector(&self) -> &[f32];

    /// Id used for threshold-search exclusion. Code vectors have none.
    fn owner_id(&self) -> Option<Uuid> {
        None
    }
}

impl Embedded for EmbeddingRecord {
    fn vector(&self) -> &[f32] {
        &self.vector
    }
}

impl Embedded for ConversationEmbeddingRecord {
    fn vector(&self) -> &[f32] {
        &self.vector
    }

    fn owner_id(&self) -> Option<Uuid> {
        Some(self.conversation_id)
    }
}

/// A corpus item with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

/// Cosine similarity. Zero when either vector has zero magnitude, the
/// lengths differ, or a component is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    let score = dot / denom;
    if denom == 0.0 || !score.is_finite() {
        0.0
    } else {
        score
    }
}

fn score_all<'a, T: Embedded>(query: &[f32], corpus: &'a [T]) -> Vec<Scored<&'a T>> {
    corpus
        .iter()
        .map(|item| Scored {
            score: cosine_similarity(query, item.vector()),
            item,
        })
        .collect()
}

/// Stable descending sort: equal scores keep insertion order.
fn sort_descending<T>(scored: &mut [Scored<T>]) {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// The `k` most similar items, best first.
pub fn top_k<'a, T: Embedded>(query: &[f32], corpus: &'a [T], k: usize) -> Vec<Scored<&'a T>> {
    let mut scored = score_all(query, corpus);
    sort_descending(&mut scored);
    scored.truncate(k);
    scored
}

/// Every item scoring at least `threshold`, best first, skipping items
/// owned by `exclude`.
pub fn filter_by_threshold<'a, T: Embedded>(
    query: &[f32],
    corpus: &'a [T],
    threshold: f32,
    exclude: Option<Uuid>,
) -> Vec<Scored<&'a T>> {
    let mut scored: Vec<_> = score_all(query, corpus)
        .into_iter()
        .filter(|s| s.score >= threshold)
        .filter(|s| exclude.is_none() || s.item.owner_id() != exclude)
        .collect();
    sort_descending(&mut scored);
    scored
}

/// Threshold filter followed by a top-k cut, as used when building prompts.
pub fn top_k_above<'a, T: Embedded>(
    query: &[f32],
    corpus: &'a [T],
    k: usize,
    threshold: f32,
    exclude: Option<Uuid>,
) -> Vec<Scored<&'a T>> {
    let mut scored = filter_by_threshold(query, corpus, threshold, exclude);
    scored.truncate(k);
    scored
}
