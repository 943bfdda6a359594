//! Pairwise similarity for consolidation
//!
//! Cosine similarity over embeddings when both sides have one; otherwise a
//! token-overlap fallback so embedding-free memories still participate in
//! association discovery and clustering.

use std::collections::HashSet;

use crate::types::Memory;

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Shared-token ratio (Jaccard) between two contents, in [0, 1]
///
/// Words of three characters or fewer are dropped; they are mostly stop
/// words and inflate overlap between unrelated texts.
pub fn token_overlap(content_a: &str, content_b: &str) -> f64 {
    let words_a: HashSet<String> = significant_tokens(content_a).collect();
    let words_b: HashSet<String> = significant_tokens(content_b).collect();

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn significant_tokens(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 3)
}

/// Similarity between two memories, in [0, 1]
///
/// Embedding cosine when both embeddings are present (negative cosine is
/// clamped to zero - anti-correlated vectors are simply "unrelated" for
/// consolidation purposes); token overlap otherwise.
pub fn memory_similarity(a: &Memory, b: &Memory) -> f64 {
    match (&a.embedding, &b.embedding) {
        (Some(emb_a), Some(emb_b)) => f64::from(cosine_similarity(emb_a, emb_b)).max(0.0),
        _ => token_overlap(&a.content, &b.content),
    }
}
