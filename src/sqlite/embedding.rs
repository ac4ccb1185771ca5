//! Vector BLOB encoding and cosine distance.

use super::Error;
use crate::embedding::EMBEDDING_DIMS;

pub type Result<T> = std::result::Result<T, Error>;

const EMBEDDING_BLOB_SIZE: usize = EMBEDDING_DIMS * 4;

/// Encode an embedding as a little-endian f32 BLOB.
///
/// # Errors
///
/// Returns `Error::MismatchedDimensions` if the vector is not exactly 384 long,
/// and `Error::InvalidEmbedding` if it contains NaN or infinite values.
pub fn vec_to_blob(vec: &[f32]) -> Result<Vec<u8>> {
    if vec.len() != EMBEDDING_DIMS {
        return Err(Error::MismatchedDimensions {
            expected: EMBEDDING_DIMS,
            actual: vec.len(),
        });
    }
    if vec.iter().any(|x| !x.is_finite()) {
        return Err(Error::InvalidEmbedding(
            "Vector contains NaN or infinite values".to_string(),
        ));
    }
    Ok(vec.iter().flat_map(|&x| x.to_le_bytes()).collect())
}

/// Decode a little-endian f32 BLOB.
///
/// # Errors
///
/// Returns `Error::InvalidBlobSize` if the blob is not exactly 1,536 bytes.
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() != EMBEDDING_BLOB_SIZE {
        return Err(Error::InvalidBlobSize {
            expected: EMBEDDING_BLOB_SIZE,
            actual: blob.len(),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Cosine similarity between two vectors.
///
/// # Errors
///
/// - `Error::EmptyVector` if either vector is empty.
/// - `Error::MismatchedDimensions` if lengths differ.
/// - `Error::InvalidEmbedding` if any value is NaN or infinite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.is_empty() || b.is_empty() {
        return Err(Error::EmptyVector);
    }

    if a.len() != b.len() {
        return Err(Error::MismatchedDimensions {
            expected: a.len(),
            actual: b.len(),
        });
    }

    if a.iter().chain(b.iter()).any(|x| !x.is_finite()) {
        return Err(Error::InvalidEmbedding(
            "Vector contains NaN or infinite values".to_string(),
        ));
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a * norm_b))
}

/// Cosine distance (`1 - similarity`), in `[0.0, 2.0]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f64> {
    let similarity = cosine_similarity(a, b)?.clamp(-1.0, 1.0);
    Ok(1.0 - similarity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_to_blob_correct_dimensions() {
        let vec = vec![0.1f32; 384];
        let blob = vec_to_blob(&vec).unwrap();
        assert_eq!(blob.len(), 1536);
    }

    #[test]
    fn test_vec_to_blob_wrong_dimensions() {
        let vec = vec![0.1f32; 256];
        assert!(matches!(
            vec_to_blob(&vec),
            Err(Error::MismatchedDimensions { .. })
        ));
    }

    #[test]
    fn test_vec_to_blob_rejects_nan() {
        let mut vec = vec![0.1f32; 384];
        vec[3] = f32::NAN;
        assert!(matches!(vec_to_blob(&vec), Err(Error::InvalidEmbedding(_))));
    }

    #[test]
    fn test_blob_to_vec_wrong_size() {
        let blob = vec![0u8; 1500];
        assert!(matches!(
            blob_to_vec(&blob),
            Err(Error::InvalidBlobSize { .. })
        ));
    }

    #[test]
    fn test_blob_preserves_values() {
        let vec: Vec<f32> = (0..384).map(|i| i as f32 / 384.0).collect();
        let recovered = blob_to_vec(&vec_to_blob(&vec).unwrap()).unwrap();
        assert_eq!(vec, recovered);
    }

    #[test]
    fn test_cosine_distance_identical() {
        let vec = vec![1.0f32; 384];
        let d = cosine_distance(&vec, &vec).unwrap();
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal() {
        let mut a = vec![0.0f32; 384];
        let mut b = vec![0.0f32; 384];
        a[0] = 1.0;
        b[1] = 1.0;
        let d = cosine_distance(&a, &b).unwrap();
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let a = vec![1.0f32; 384];
        let b = vec![-1.0f32; 384];
        let d = cosine_distance(&a, &b).unwrap();
        assert!((d - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_empty_vector() {
        let empty = vec![];
        let vec = vec![1.0f32; 384];
        assert!(matches!(
            cosine_similarity(&empty, &vec),
            Err(Error::EmptyVector)
        ));
    }

    #[test]
    fn test_cosine_similarity_mismatched_dimensions() {
        let a = vec![1.0f32; 384];
        let b = vec![1.0f32; 256];
        assert!(cosine_similarity(&a, &b).is_err());
    }

    #[test]
    fn test_cosine_similarity_zero_norm() {
        let zero = vec![0.0f32; 384];
        let vec = vec![1.0f32; 384];
        assert_eq!(cosine_similarity(&zero, &vec).unwrap(), 0.0);
    }
}
