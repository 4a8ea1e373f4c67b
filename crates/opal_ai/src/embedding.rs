//! Deterministic local text embedding.
//!
//! Feature-hashed bag-of-words vectors: every token is hashed (SHA-256) to a
//! dimension index and a sign, weighted by term frequency, then L2-normalized.
//! No model download, no network, and identical input always yields an
//! identical vector, which the classifier determinism contract depends on.

use sha2::{Digest, Sha256};

/// Dimensionality of the hashed embedding space.
pub const EMBEDDING_DIM: usize = 256;

/// Tokenize text into lowercase word tokens.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Embed `text` into a normalized `EMBEDDING_DIM`-dimensional vector.
/// Empty or punctuation-only input yields the zero vector.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    for token in tokenize(text) {
        let digest = Sha256::digest(token.as_bytes());
        let index = u16::from_be_bytes([digest[0], digest[1]]) as usize % EMBEDDING_DIM;
        // Second hash byte decides the sign so collisions partially cancel
        // instead of always accumulating.
        let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Cosine similarity between two vectors. Returns 0.0 for mismatched lengths
/// or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let a = embed("play some lofi beats");
        let b = embed("play some lofi beats");
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_is_normalized() {
        let v = embed("what is the weather in berlin");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_input_is_zero_vector() {
        let v = embed("");
        assert!(v.iter().all(|&x| x == 0.0));
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[test]
    fn self_similarity_is_one() {
        let v = embed("generate an image of a sunset");
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_texts_score_higher_than_unrelated() {
        let music_a = embed("play a song by daft punk");
        let music_b = embed("play the new daft punk song");
        let other = embed("refactor this database migration");

        assert!(cosine(&music_a, &music_b) > cosine(&music_a, &other));
    }

    #[test]
    fn cosine_handles_zero_and_mismatched() {
        let zero = vec![0.0f32; EMBEDDING_DIM];
        let v = embed("hello");
        assert_eq!(cosine(&zero, &v), 0.0);
        assert_eq!(cosine(&v[..10], &v), 0.0);
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(tokenize("Hello, World! foo_bar"), vec![
            "hello", "world", "foo_bar"
        ]);
    }
}
