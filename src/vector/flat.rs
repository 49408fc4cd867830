//! Append-only flat vector index with exact inner-product search.
//!
//! One `FlatIndex` backs one category. Vectors are stored contiguously in
//! insertion order and never move, so a vector's position doubles as its
//! stable identity for the record store. There is no remove and no update:
//! shrinking an index means rebuilding it from source records.
//!
//! # Storage Format
//!
//! Little-endian binary with a 16-byte header:
//! - Magic bytes `CPDX`
//! - Format version (u32)
//! - Dimension (u32)
//! - Vector count (u32)
//! - Payload: `count * dimension` f32 values in append order

use crate::vector::types::{IndexPosition, Score, VectorDimension, VectorError};

/// Current index format version.
const FORMAT_VERSION: u32 = 1;

/// Size of the index header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes identifying index blobs.
const MAGIC_BYTES: &[u8; 4] = b"CPDX";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Exact nearest-neighbor index over unit-length vectors.
///
/// Inner product over normalized vectors equals cosine similarity, so
/// callers get cosine ranking without a separate distance computation.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: VectorDimension,
    /// Flattened vector data, `dimension` floats per vector.
    data: Vec<f32>,
}

impl FlatIndex {
    /// Creates an empty index for the given dimension.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Returns the number of vectors in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension.get()
    }

    /// Returns true if the index holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the index dimension.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Returns the serialized size of the index in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        HEADER_SIZE + self.data.len() * BYTES_PER_F32
    }

    /// Appends a vector, returning its position.
    ///
    /// The position equals the pre-insert vector count; positions are
    /// monotonically increasing and gapless.
    pub fn add(&mut self, vector: &[f32]) -> Result<IndexPosition, VectorError> {
        self.dimension.validate_vector(vector)?;

        let position = self.len();
        if position > u32::MAX as usize {
            return Err(VectorError::PositionExhausted);
        }

        self.data.extend_from_slice(vector);
        Ok(IndexPosition::new(position as u32))
    }

    /// Finds up to `min(k, len())` nearest neighbors of `query`.
    ///
    /// Results are ordered by inner product descending; ties are broken by
    /// position ascending so repeated searches are deterministic. An empty
    /// index yields an empty result.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(IndexPosition, Score)>, VectorError> {
        self.dimension.validate_vector(query)?;

        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let dim = self.dimension.get();
        let mut scored = Vec::with_capacity(self.len());
        for (position, vector) in self.data.chunks_exact(dim).enumerate() {
            let dot: f32 = vector.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
            scored.push((
                IndexPosition::new(position as u32),
                Score::from_inner_product(dot)?,
            ));
        }

        scored.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Serializes the index to its binary blob form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_size());
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension.get() as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Deserializes an index from its binary blob form.
    ///
    /// Validates magic bytes, format version, and exact payload length;
    /// position order is preserved bit-for-bit.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VectorError> {
        if bytes.len() < HEADER_SIZE {
            return Err(VectorError::InvalidFormat {
                reason: format!(
                    "file too small to contain header: {} bytes, need {HEADER_SIZE}",
                    bytes.len()
                ),
            });
        }

        if &bytes[0..4] != MAGIC_BYTES {
            return Err(VectorError::InvalidFormat {
                reason: "invalid magic bytes".to_string(),
            });
        }

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: FORMAT_VERSION,
                actual: version,
            });
        }

        let dim_value = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let dimension = VectorDimension::new(dim_value as usize)?;

        let count = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let payload = &bytes[HEADER_SIZE..];

        // Header counts are untrusted; the length check runs in u64 so a
        // corrupt count/dimension pair cannot overflow it.
        let expected_values = u64::from(count) * u64::from(dim_value);
        let payload_values = (payload.len() / BYTES_PER_F32) as u64;
        if payload.len() % BYTES_PER_F32 != 0 || payload_values != expected_values {
            return Err(VectorError::InvalidFormat {
                reason: format!(
                    "payload length {} does not match header ({count} vectors of dimension {dim_value})",
                    payload.len()
                ),
            });
        }

        let mut data = Vec::with_capacity(payload.len() / BYTES_PER_F32);
        for chunk in payload.chunks_exact(BYTES_PER_F32) {
            data.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        Ok(Self { dimension, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim4() -> VectorDimension {
        VectorDimension::new(4).unwrap()
    }

    /// Unit vector along one axis, for exact inner products in tests.
    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 4];
        v[i] = 1.0;
        v
    }

    #[test]
    fn test_add_assigns_positions_in_order() {
        let mut index = FlatIndex::new(dim4());
        assert_eq!(index.len(), 0);

        let p0 = index.add(&axis(0)).unwrap();
        let p1 = index.add(&axis(1)).unwrap();
        assert_eq!(p0, IndexPosition::new(0));
        assert_eq!(p1, IndexPosition::new(1));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let mut index = FlatIndex::new(dim4());
        assert!(index.add(&[1.0, 0.0]).is_err());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_search_empty_index_returns_empty() {
        let index = FlatIndex::new(dim4());
        let hits = index.search(&axis(0), 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_ranks_by_inner_product() {
        let mut index = FlatIndex::new(dim4());
        index.add(&axis(0)).unwrap();
        index.add(&axis(1)).unwrap();
        // 45 degrees between axis 0 and axis 1
        let inv = std::f32::consts::FRAC_1_SQRT_2;
        index.add(&[inv, inv, 0.0, 0.0]).unwrap();

        let hits = index.search(&axis(0), 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, IndexPosition::new(0));
        assert!((hits[0].1.get() - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].0, IndexPosition::new(2));
        assert!((hits[1].1.get() - inv).abs() < 1e-6);
        assert_eq!(hits[2].0, IndexPosition::new(1));
    }

    #[test]
    fn test_search_truncates_to_k() {
        let mut index = FlatIndex::new(dim4());
        for i in 0..4 {
            index.add(&axis(i)).unwrap();
        }
        let hits = index.search(&axis(2), 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, IndexPosition::new(2));
    }

    #[test]
    fn test_search_ties_break_by_position() {
        let mut index = FlatIndex::new(dim4());
        // Two identical vectors must rank first-inserted first.
        index.add(&axis(3)).unwrap();
        index.add(&axis(0)).unwrap();
        index.add(&axis(3)).unwrap();

        let hits = index.search(&axis(3), 3).unwrap();
        assert_eq!(hits[0].0, IndexPosition::new(0));
        assert_eq!(hits[1].0, IndexPosition::new(2));
        assert_eq!(hits[0].1, hits[1].1);
    }

    #[test]
    fn test_serialize_roundtrip_preserves_order() {
        let mut index = FlatIndex::new(dim4());
        index.add(&axis(1)).unwrap();
        index.add(&axis(3)).unwrap();
        index.add(&[0.5, 0.5, 0.5, 0.5]).unwrap();

        let bytes = index.to_bytes();
        assert_eq!(bytes.len(), index.byte_size());

        let restored = FlatIndex::from_bytes(&bytes).unwrap();
        assert_eq!(restored, index);

        // Position 1 must still be the second vector added.
        let hits = restored.search(&axis(3), 1).unwrap();
        assert_eq!(hits[0].0, IndexPosition::new(1));
    }

    #[test]
    fn test_from_bytes_rejects_bad_magic() {
        let mut bytes = FlatIndex::new(dim4()).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            FlatIndex::from_bytes(&bytes),
            Err(VectorError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_from_bytes_rejects_wrong_version() {
        let mut bytes = FlatIndex::new(dim4()).to_bytes();
        bytes[4] = 99;
        assert!(matches!(
            FlatIndex::from_bytes(&bytes),
            Err(VectorError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_from_bytes_rejects_truncated_payload() {
        let mut index = FlatIndex::new(dim4());
        index.add(&axis(0)).unwrap();
        let mut bytes = index.to_bytes();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            FlatIndex::from_bytes(&bytes),
            Err(VectorError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_from_bytes_rejects_short_header() {
        assert!(FlatIndex::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_overflowing_header_counts() {
        // A count and dimension whose byte product overflows usize must
        // fail the length check rather than panic on the multiplication
        // or the allocation.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0x8000_0000u32.to_le_bytes());
        bytes.extend_from_slice(&0x8000_0000u32.to_le_bytes());
        assert!(matches!(
            FlatIndex::from_bytes(&bytes),
            Err(VectorError::InvalidFormat { .. })
        ));
    }
}
