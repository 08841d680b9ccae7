//! Small dense-vector helpers shared by validation, dedup and evolution.

/// Cosine similarity between two vectors. Returns 0.0 for zero-norm or
/// mismatched-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Mean cosine similarity over every unordered pair. Fewer than two vectors
/// is treated as perfectly coherent.
pub fn mean_pairwise_similarity(vectors: &[Vec<f32>]) -> f32 {
    let non_empty: Vec<&Vec<f32>> = vectors.iter().filter(|v| !v.is_empty()).collect();
    if non_empty.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..non_empty.len() {
        for j in (i + 1)..non_empty.len() {
            total += cosine_similarity(non_empty[i], non_empty[j]);
            pairs += 1;
        }
    }
    total / pairs as f32
}

/// `alpha * a + (1 - alpha) * b`, element-wise. Lengths must match; the
/// shorter length wins otherwise.
pub fn blend(alpha: f32, a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| alpha * x + (1.0 - alpha) * y)
        .collect()
}

/// Weighted average of vectors. Zero total weight yields a zero vector.
pub fn weighted_average(vectors: &[(&[f32], f32)], dimension: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; dimension];
    let total: f32 = vectors.iter().map(|(_, w)| *w).sum();
    if total <= 0.0 {
        return out;
    }
    for (vector, weight) in vectors {
        for (o, v) in out.iter_mut().zip(vector.iter()) {
            *o += v * weight / total;
        }
    }
    out
}

pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_works() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![0.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &d).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn pairwise_similarity_of_single_vector_is_one() {
        assert_eq!(mean_pairwise_similarity(&[vec![0.3, 0.4]]), 1.0);
        assert_eq!(mean_pairwise_similarity(&[]), 1.0);
    }

    #[test]
    fn pairwise_similarity_averages_all_pairs() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        // pairs: (0,1)=1, (0,2)=0, (1,2)=0
        let mean = mean_pairwise_similarity(&vectors);
        assert!((mean - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn blend_interpolates() {
        let out = blend(0.25, &[4.0, 0.0], &[0.0, 4.0]);
        assert_eq!(out, vec![1.0, 3.0]);
    }

    #[test]
    fn weighted_average_respects_weights() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let avg = weighted_average(&[(&a, 3.0), (&b, 1.0)], 2);
        assert!((avg[0] - 0.75).abs() < 1e-6);
        assert!((avg[1] - 0.25).abs() < 1e-6);
        assert_eq!(weighted_average(&[], 3), vec![0.0; 3]);
    }

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
