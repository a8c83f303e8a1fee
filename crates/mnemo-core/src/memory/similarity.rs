//! Vector similarity and embedding (de)serialization helpers.
//!
//! Embeddings are persisted on the memory row as a JSON array of floats.

/// Cosine similarity over the overlapping prefix of `a` and `b`.
///
/// Accumulates in `f64`. Returns 0.0 when either vector is empty or has a
/// zero norm over the compared prefix.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a[..len].iter().zip(&b[..len]) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Serialize a vector for the `embedding` column.
pub fn serialize_embedding(vector: &[f32]) -> Result<String, serde_json::Error> {
    serde_json::to_string(vector)
}

/// Parse a stored embedding. `None` for blank, malformed or empty values.
pub fn parse_embedding(raw: &str) -> Option<Vec<f32>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str::<Vec<f32>>(raw) {
        Ok(vector) if !vector.is_empty() => Some(vector),
        _ => None,
    }
}
