//! Hashing Fallback Embedder
//!
//! Deterministic in-process projection: character 3-grams are hashed into
//! a fixed number of buckets with a sign bit, then L2-normalized. Shape
//! compatible with the primary provider, semantically much weaker, but it
//! never fails and needs no model download.

/// Native dimension of the fallback projection
pub const FALLBACK_DIMENSIONS: usize = 768;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a over raw bytes. Also used as the stable embedding-cache key.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Project text into `dimensions` buckets via hashed character 3-grams.
///
/// The sign bit comes from a second hash round so that collisions cancel
/// rather than accumulate (standard feature-hashing trick). Output is
/// L2-normalized; an all-empty input yields the zero vector.
pub fn hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    let chars: Vec<char> = text.chars().collect();

    if chars.is_empty() {
        return vector;
    }

    // Short inputs still produce a gram
    let window = chars.len().min(3).max(1);

    for gram in chars.windows(window) {
        let mut buf = [0u8; 16];
        let mut len = 0;
        for c in gram {
            len += c.encode_utf8(&mut buf[len..]).len();
        }
        let hash = fnv1a(&buf[..len]);
        let bucket = (hash % dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    l2_normalize(&mut vector);
    vector
}

/// Normalize in place; the zero vector stays zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Fit a vector to `dimensions`: truncate or zero-pad, then renormalize.
pub fn fit_dimensions(mut vector: Vec<f32>, dimensions: usize) -> Vec<f32> {
    if vector.len() > dimensions {
        vector.truncate(dimensions);
    } else if vector.len() < dimensions {
        vector.resize(dimensions, 0.0);
    }
    l2_normalize(&mut vector);
    vector
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = hash_embedding("the quick brown fox", FALLBACK_DIMENSIONS);
        let b = hash_embedding("the quick brown fox", FALLBACK_DIMENSIONS);
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalized() {
        let v = hash_embedding("some text to embed", FALLBACK_DIMENSIONS);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_is_zero() {
        let v = hash_embedding("", FALLBACK_DIMENSIONS);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_short_input_produces_signal() {
        let v = hash_embedding("ab", FALLBACK_DIMENSIONS);
        assert!(v.iter().any(|x| *x != 0.0));
    }

    #[test]
    fn test_similar_texts_closer_than_different() {
        let a = hash_embedding("database storage engine", FALLBACK_DIMENSIONS);
        let b = hash_embedding("database storage engines", FALLBACK_DIMENSIONS);
        let c = hash_embedding("완전히 다른 내용의 문장", FALLBACK_DIMENSIONS);

        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(a, b)| a * b).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn test_fit_dimensions() {
        let v = fit_dimensions(vec![3.0, 4.0], 4);
        assert_eq!(v.len(), 4);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);

        let v = fit_dimensions(vec![1.0, 1.0, 1.0, 1.0], 2);
        assert_eq!(v.len(), 2);
    }
}
