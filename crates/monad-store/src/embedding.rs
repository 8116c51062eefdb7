// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Embedding collaborator contract and the offline default.
//!
//! The runtime only needs two things from an embedding service: vectors for
//! query/memory text and a similarity measure between them.  A hosted
//! service can be plugged in behind [`EmbeddingClient`]; the bundled
//! [`HashEmbedder`] keeps context gathering functional with no network at
//! all.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts.  Returns one vector per input, same order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Cosine similarity of two vectors.  Returns 0.0 for mismatched dimensions
/// or zero-norm inputs so ranking code never divides by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Deterministic bag-of-words hashing embedder.
///
/// Each lowercased word is hashed into one of `dims` buckets with a hashed
/// sign; the accumulated vector is L2-normalized.  Texts sharing vocabulary
/// land near each other, which is all the similarity ranking needs for
/// offline operation and tests.
pub struct HashEmbedder {
    dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dims: 64 }
    }
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dims;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let e = HashEmbedder::default();
        let a = e.embed(&["rust systems language".into()]).await.unwrap();
        let b = e.embed(&["rust systems language".into()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn identical_texts_have_similarity_one() {
        let e = HashEmbedder::default();
        let v = e.embed(&["the quick brown fox".into()]).await.unwrap();
        let sim = cosine_similarity(&v[0], &v[0]);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn overlapping_vocabulary_scores_higher_than_disjoint() {
        let e = HashEmbedder::default();
        let vs = e
            .embed(&[
                "rust memory safety".into(),
                "rust memory model details".into(),
                "gardening tips tulips".into(),
            ])
            .await
            .unwrap();
        let related = cosine_similarity(&vs[0], &vs[1]);
        let unrelated = cosine_similarity(&vs[0], &vs[2]);
        assert!(
            related > unrelated,
            "related={related} should beat unrelated={unrelated}"
        );
    }

    #[test]
    fn cosine_mismatched_dims_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let e = HashEmbedder::default();
        let v = e.embed(&["".into()]).await.unwrap();
        assert!(v[0].iter().all(|x| *x == 0.0));
    }
}
