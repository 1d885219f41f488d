//! Vector blob encoding and similarity

/// Encode a vector as little-endian f32 bytes
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 blob, returning `None` if its length is not
/// `dimension * 4` or it holds non-finite values
pub(crate) fn decode_vector(blob: &[u8], dimension: usize) -> Option<Vec<f32>> {
    if blob.len() != dimension.checked_mul(std::mem::size_of::<f32>())? {
        return None;
    }

    let mut out = Vec::with_capacity(dimension);
    for bytes in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if !value.is_finite() {
            return None;
        }
        out.push(value);
    }
    Some(out)
}

/// Cosine similarity in f64 accumulation; 0.0 when either side has zero norm
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    (dot / denom) as f32
}
