//! Flat append-only vector index with file persistence.
//!
//! Slot ids are assigned in insertion order and equal the physical position
//! of the vector in the index; the size only grows. All vectors are
//! L2-normalized on the way in, so for unit vectors the L2 distance `d`
//! returned by [`VectorIndex::search`] converts to cosine similarity as
//! `1 - d^2 / 2`.
//!
//! ## File format
//!
//! ```text
//! magic "EGV1" | dimension u32 LE | count u64 LE | count*dimension f32 LE
//! ```
//!
//! [`VectorIndex::save`] writes to a sibling temp file and renames it into
//! place, so a failed write never clobbers a previously valid index file.

use crate::error::{EngineError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 4] = b"EGV1";
const HEADER_LEN: usize = 4 + 4 + 8;

/// Append-only store of fixed-dimension unit vectors.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index for the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    /// `true` when no vectors are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Dimension of every stored vector.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert a vector, returning its slot id (the index size before the
    /// insertion). The vector is L2-normalized first.
    pub fn insert(&mut self, mut vector: Vec<f32>) -> Result<u64> {
        if vector.len() != self.dimension {
            return Err(EngineError::config(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        normalize(&mut vector);
        let slot = self.len() as u64;
        self.data.extend_from_slice(&vector);
        Ok(slot)
    }

    /// Nearest neighbors of `query` by L2 distance, closest first, at most
    /// `k` results. The query is L2-normalized before comparison.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dimension {
            return Err(EngineError::config(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut hits: Vec<(u64, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, stored)| {
                let squared: f32 = stored
                    .iter()
                    .zip(&query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (slot as u64, squared.sqrt())
            })
            .collect();

        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    /// Persist the index, atomically replacing any previous file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(MAGIC)?;
            file.write_all(&(self.dimension as u32).to_le_bytes())?;
            file.write_all(&(self.len() as u64).to_le_bytes())?;
            file.write_all(bytemuck::cast_slice(&self.data))?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load a previously saved index, verifying the header and payload size.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(EngineError::corruption(format!(
                "{} is not a vector index file",
                path.display()
            )));
        }
        let dimension = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let count = u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]) as usize;

        let payload = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dimension)
            .and_then(|floats| floats.checked_mul(4))
            .ok_or_else(|| EngineError::corruption("vector index header overflows"))?;
        if payload.len() != expected {
            return Err(EngineError::corruption(format!(
                "vector index payload is {} bytes, expected {expected}",
                payload.len()
            )));
        }

        let mut data = vec![0f32; count * dimension];
        bytemuck::cast_slice_mut::<f32, u8>(&mut data).copy_from_slice(payload);
        Ok(Self { dimension, data })
    }
}

pub(crate) fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn unit(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn slots_ascend_with_insertion_order() -> Result<()> {
        let mut index = VectorIndex::new(4);
        assert_eq!(index.insert(unit(4, 0))?, 0);
        assert_eq!(index.insert(unit(4, 1))?, 1);
        assert_eq!(index.insert(unit(4, 2))?, 2);
        assert_eq!(index.len(), 3);
        Ok(())
    }

    #[test]
    fn search_returns_closest_first() -> Result<()> {
        let mut index = VectorIndex::new(3);
        index.insert(vec![1.0, 0.0, 0.0])?;
        index.insert(vec![0.0, 1.0, 0.0])?;
        index.insert(vec![0.9, 0.1, 0.0])?;

        let hits = index.search(&[1.0, 0.0, 0.0], 2)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 < 1e-6);
        assert_eq!(hits[1].0, 2);
        Ok(())
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = VectorIndex::new(3);
        assert!(index.insert(vec![1.0, 0.0]).is_err());
        assert!(index.search(&[1.0, 0.0], 5).is_err());
    }

    #[test]
    fn distance_converts_to_cosine_for_unit_vectors() -> Result<()> {
        let mut a = vec![0.3, -0.7, 0.2, 0.55];
        let mut b = vec![-0.1, 0.9, 0.4, 0.2];
        normalize(&mut a);
        normalize(&mut b);

        let cosine: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();

        let mut index = VectorIndex::new(4);
        index.insert(b.clone())?;
        let hits = index.search(&a, 1)?;
        let distance = hits[0].1;
        let similarity = 1.0 - distance * distance / 2.0;
        assert!((similarity - cosine).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn save_and_load_preserve_contents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("main_vectors.idx");

        let mut index = VectorIndex::new(3);
        index.insert(vec![1.0, 2.0, 2.0])?;
        index.insert(vec![0.0, 3.0, 4.0])?;
        index.save(&path)?;

        let loaded = VectorIndex::load(&path)?;
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.len(), 2);
        let hits = loaded.search(&[1.0, 2.0, 2.0], 1)?;
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 < 1e-6);
        Ok(())
    }

    #[test]
    fn load_rejects_garbage_files() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.idx");
        std::fs::write(&path, b"not an index at all")?;
        assert!(matches!(
            VectorIndex::load(&path),
            Err(crate::error::EngineError::IndexCorruption { .. })
        ));
        Ok(())
    }

    #[test]
    fn load_rejects_truncated_payload() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("truncated.idx");

        let mut index = VectorIndex::new(4);
        index.insert(vec![1.0, 0.0, 0.0, 0.0])?;
        index.save(&path)?;

        let bytes = std::fs::read(&path)?;
        std::fs::write(&path, &bytes[..bytes.len() - 4])?;
        assert!(VectorIndex::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn zero_k_and_empty_index_yield_no_hits() -> Result<()> {
        let index = VectorIndex::new(2);
        assert!(index.search(&[1.0, 0.0], 5)?.is_empty());
        let mut index = VectorIndex::new(2);
        index.insert(vec![1.0, 0.0])?;
        assert!(index.search(&[1.0, 0.0], 0)?.is_empty());
        Ok(())
    }
}
