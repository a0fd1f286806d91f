//! Embedding vectors at rest and the similarity used to rank them.
//!
//! A stored vector is the concatenation of its `f32` components in
//! little-endian order, so a `d`-dimensional vector always occupies `4 * d`
//! bytes. Ranking everywhere goes through [`cosine_similarity`].

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Serialize `vector` for a BLOB column.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Parse a BLOB written by [`vec_to_blob`].
///
/// Returns `None` when the length is not a whole number of `f32`s, which
/// only happens for a truncated or foreign value.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % F32_BYTES != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(F32_BYTES)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`.
///
/// Vectors of unequal width, empty vectors and zero vectors score `0.0`, so
/// they sink below every genuine match instead of producing NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });

    let norms = (aa * bb).sqrt();
    if norms < f32::EPSILON {
        0.0
    } else {
        (dot / norms).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_layout_is_little_endian() {
        let blob = vec_to_blob(&[1.0, -2.0]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(blob_to_vec(&blob), Some(vec![1.0, -2.0]));
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let mut blob = vec_to_blob(&[0.5, 0.25]);
        blob.pop();
        assert_eq!(blob_to_vec(&blob), None);
        assert_eq!(blob_to_vec(&[]), Some(Vec::new()));
    }

    #[test]
    fn test_similarity_tracks_direction_not_length() {
        let page = [3.0, 4.0, 0.0];
        assert!((cosine_similarity(&page, &[30.0, 40.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&page, &[0.0, 0.0, 7.0]).abs() < 1e-6);
        assert!((cosine_similarity(&page, &[-3.0, -4.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
