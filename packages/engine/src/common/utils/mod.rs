//! Small numeric helpers shared by the clustering and severity use cases.

/// Cosine similarity between two equal-length vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for a zero-length vector rather than dividing by zero; an
/// embedding provider should never hand back an all-zero vector, but a
/// defensive zero keeps a malformed response from poisoning a comparison.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Rounds to 2 decimal places, matching the precision severity scores are
/// persisted and compared at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
