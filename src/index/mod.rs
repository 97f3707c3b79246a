//! Approximate nearest-neighbor index over chunk embeddings.
//!
//! Vectors are L2-normalized on the way in, so inner product equals cosine
//! similarity. Each index position carries the vector id of the chunk it was
//! built from; [`VectorIndex::vector_id_at`] is how search results are joined
//! back to the chunk store.
//!
//! The whole index persists as one snapshot file. [`VectorIndex::save`]
//! writes `<path>.tmp` and renames it over `<path>`, so readers only ever see
//! a complete snapshot.

mod hnsw;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::error::IndexError;
use hnsw::Hnsw;

const SNAPSHOT_VERSION: u32 = 1;

/// Largest `k` one search may request. Results are padded to `k`, so the
/// output is allocated up front.
pub const MAX_SEARCH_K: usize = 1 << 16;

/// Norms below this are clamped so zero vectors normalize to zero.
const MIN_NORM: f32 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for HnswParams {
    fn from(config: &IndexConfig) -> Self {
        Self {
            m: config.m,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            seed: config.seed,
        }
    }
}

/// Top-k result, padded to exactly `k` entries.
///
/// Missing slots have position `-1` and distance `f32::MIN`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutput {
    pub distances: Vec<f32>,
    pub positions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    version: u32,
    dims: usize,
    /// `ids[position]` is the vector id of the chunk stored at `position`.
    ids: Vec<i64>,
    graph: Hnsw,
}

pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector
        .iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt()
        .max(MIN_NORM);
    vector.iter().map(|x| x / norm).collect()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Write `<path>.tmp` with `write`, fsync it, then rename it over `path`.
/// The temporary file is removed if any step before the rename fails.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), IndexError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), IndexError>,
{
    let tmp = tmp_path(path);
    let written = File::create(&tmp)
        .map_err(IndexError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    std::fs::rename(&tmp, path)?;
    sync_parent_dir(path)?;
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<(), IndexError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all()?,
        _ => File::open(".")?.sync_all()?,
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<(), IndexError> {
    Ok(())
}

impl VectorIndex {
    pub fn new(dims: usize, params: HnswParams) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            dims,
            ids: Vec::new(),
            graph: Hnsw::new(params),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn reset(&mut self) {
        self.ids.clear();
        self.graph = Hnsw::new(*self.graph.params());
    }

    /// Append `vectors`, recording `ids[i]` as the vector id of the row added
    /// from `vectors[i]`. Nothing is added if any row has the wrong dimension.
    pub fn add(&mut self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<(), IndexError> {
        if vectors.len() != ids.len() {
            return Err(IndexError::LabelMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }

        for (vector, &id) in vectors.iter().zip(ids) {
            self.graph.insert(normalize(vector));
            self.ids.push(id);
        }
        Ok(())
    }

    /// Top `k` positions by descending cosine similarity. `k` may not exceed
    /// [`MAX_SEARCH_K`].
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchOutput, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if k > MAX_SEARCH_K {
            return Err(IndexError::KTooLarge {
                k,
                max: MAX_SEARCH_K,
            });
        }

        let hits = self.graph.search(&normalize(query), k);
        let mut distances = Vec::with_capacity(k);
        let mut positions = Vec::with_capacity(k);
        for (node, score) in hits {
            positions.push(node as i64);
            distances.push(score);
        }
        distances.resize(k, f32::MIN);
        positions.resize(k, -1);

        Ok(SearchOutput {
            distances,
            positions,
        })
    }

    /// Vector id recorded for `position`, or `None` if out of range.
    pub fn vector_id_at(&self, position: i64) -> Option<i64> {
        usize::try_from(position)
            .ok()
            .and_then(|p| self.ids.get(p).copied())
    }

    /// Atomically replace the snapshot at `path`.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        write_atomic(path, |writer| Ok(serde_json::to_writer(writer, self)?))
    }

    /// Load the snapshot at `path`.
    ///
    /// A missing file yields an empty index. A file that cannot be decoded,
    /// is internally inconsistent, or was built for a different dimension is
    /// an [`IndexError::IndexLoad`]. `params.ef_search` overrides the stored
    /// value so query breadth follows current configuration.
    pub fn load(path: &Path, dims: usize, params: HnswParams) -> Result<Self, IndexError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new(dims, params));
            }
            Err(e) => {
                return Err(IndexError::IndexLoad {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        let load_err = |reason: String| IndexError::IndexLoad {
            path: path.to_path_buf(),
            reason,
        };

        let mut index: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| load_err(e.to_string()))?;

        if index.version != SNAPSHOT_VERSION {
            return Err(load_err(format!(
                "unsupported snapshot version {}",
                index.version
            )));
        }
        if index.dims != dims {
            return Err(load_err(format!(
                "snapshot has dimension {}, expected {dims}",
                index.dims
            )));
        }
        if index.ids.len() != index.graph.len() || !index.graph.is_consistent() {
            return Err(load_err("snapshot graph is inconsistent".to_string()));
        }

        index.graph.set_ef_search(params.ef_search);
        Ok(index)
    }

    /// Remove the snapshot at `path`. A missing file is not an error.
    pub fn remove_snapshot(path: &Path) -> Result<bool, IndexError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
