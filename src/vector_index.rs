//! Nearest-neighbour search primitive.
//!
//! [`VectorIndex`] is the only surface the rest of the crate relies on:
//! append rows, search by L2 distance, report size. Rows are append-only and
//! row `i` always pairs with metadata record `i`.
//!
//! [`FlatL2Index`] is the bundled implementation: exact brute-force search
//! over a contiguous `f32` buffer.
//!
//! # File format
//!
//! ```text
//! offset  size        field
//! 0       4           magic  "ERVX"
//! 4       4           version (u32 LE, currently 1)
//! 8       4           dims    (u32 LE)
//! 12      8           rows    (u64 LE)
//! 20      rows*dims*4 row-major f32 LE
//! ```

use anyhow::{Context, Result};
use std::path::Path;

use crate::error::RagError;
use crate::persist::{stage, StagedFile};

const MAGIC: &[u8; 4] = b"ERVX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

/// A searchable, append-only collection of fixed-dimension vectors.
pub trait VectorIndex: Send + Sync {
    fn dims(&self) -> usize;

    /// Number of rows.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append rows in order. Every vector must have [`dims`](Self::dims) entries.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// Up to `k` nearest rows as `(distance, row)`, closest first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>>;
}

/// Exact squared-L2 index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dims: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&vec_to_blob(&self.data));
        bytes
    }

    pub fn from_bytes(bytes: &[u8], origin: &Path) -> Result<Self> {
        let corrupt = |reason: String| RagError::CorruptIndex {
            path: origin.to_path_buf(),
            reason,
        };

        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(corrupt("missing header".into()).into());
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != VERSION {
            return Err(corrupt(format!("unsupported version {}", version)).into());
        }
        let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut rows_le = [0u8; 8];
        rows_le.copy_from_slice(&bytes[12..20]);
        let rows = u64::from_le_bytes(rows_le) as usize;

        let expected = rows
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("row count overflow".into()))?;
        let body = &bytes[HEADER_LEN..];
        if body.len() != expected {
            return Err(corrupt(format!(
                "expected {} bytes of vectors for {} rows x {} dims, found {}",
                expected,
                rows,
                dims,
                body.len()
            ))
            .into());
        }

        Ok(Self {
            dims,
            data: blob_to_vec(body),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_bytes(&bytes, path)
    }

    /// Write the serialized index next to `path`; commit to publish it.
    pub fn stage_save(&self, path: &Path) -> Result<StagedFile> {
        stage(path, &self.to_bytes())
    }
}

impl VectorIndex for FlatL2Index {
    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            }
            .into());
        }
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>> {
        if query.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            }
            .into());
        }
        if k == 0 || self.dims == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(f32, usize)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(row, v)| (squared_l2(query, v), row))
            .collect();

        hits.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Encode floats as little-endian bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian bytes produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
