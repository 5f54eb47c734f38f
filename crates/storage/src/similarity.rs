//! Vector similarity

/// Cosine similarity of two vectors, in [-1, 1]
///
/// Returns 0.0 when the lengths differ, either vector is empty, either has
/// zero magnitude, or a component is not finite. Sums are accumulated in f64
/// so large finite components cannot overflow.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !score.is_finite() {
        return 0.0;
    }
    // rounding can push |a·b| a hair past |a||b|
    score.clamp(-1.0, 1.0) as f32
}
