//! # Chunk Persistence
//!
//! The server core only depends on the "save these chunks / load this chunk"
//! contract of [`ChunkStorage`]. Two implementations are provided:
//!
//! * [`FileChunkStorage`] - one file per chunk under a save directory
//! * [`InMemoryChunkStorage`] - keeps encoded chunks in memory
//!
//! ## File Format
//!
//! `<directory>/<container>/<x>_<y>_<z>.chunk`, little-endian:
//! - `VXCK` magic
//! - `u8` format version (1)
//! - `u32` × 3 chunk size
//! - one byte per voxel, in grid order

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use cgmath::Vector3;
use log::{debug, warn};
use thiserror::Error;

use super::block::BlockIndex;
use super::chunk::ChunkIndices;
use super::chunk_container::ChunkContainer;

const CHUNK_FILE_MAGIC: &[u8; 4] = b"VXCK";
const CHUNK_FILE_VERSION: u8 = 1;
const CHUNK_FILE_HEADER_LEN: usize = 4 + 1 + 3 * 4;

/// Errors raised while saving or loading chunks.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the storage failed.
    #[error("chunk storage I/O failed for {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A stored chunk could not be decoded.
    #[error("stored chunk {indices} is malformed: {reason}")]
    Malformed {
        /// Chunk being loaded.
        indices: ChunkIndices,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// A stored chunk has different dimensions than the live one.
    #[error("stored chunk {indices} has size {found:?}, expected {expected:?}")]
    SizeMismatch {
        /// Chunk being loaded.
        indices: ChunkIndices,
        /// Size of the live chunk.
        expected: [u32; 3],
        /// Size found in storage.
        found: [u32; 3],
    },
}

/// Copy of one chunk's content taken on the simulation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSnapshot {
    /// Name of the container the chunk belongs to.
    pub container: String,
    /// Position of the chunk in its container.
    pub indices: ChunkIndices,
    /// Dimensions of the chunk.
    pub size: Vector3<u32>,
    /// Blocks in grid order.
    pub blocks: Vec<BlockIndex>,
}

/// Save/load contract for chunk containers.
pub trait ChunkStorage: Send + Sync {
    /// Persists every snapshot. Returns the number of chunks written.
    fn save(&self, snapshots: &[ChunkSnapshot]) -> Result<usize, PersistenceError>;

    /// Loads one chunk. `Ok(None)` means nothing was saved for it.
    fn load(
        &self,
        container: &str,
        indices: ChunkIndices,
        size: Vector3<u32>,
    ) -> Result<Option<Vec<BlockIndex>>, PersistenceError>;
}

fn encode_chunk(snapshot: &ChunkSnapshot) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHUNK_FILE_HEADER_LEN + snapshot.blocks.len());
    out.extend_from_slice(CHUNK_FILE_MAGIC);
    out.push(CHUNK_FILE_VERSION);
    for extent in [snapshot.size.x, snapshot.size.y, snapshot.size.z] {
        out.extend_from_slice(&extent.to_le_bytes());
    }
    out.extend_from_slice(&snapshot.blocks);
    out
}

fn decode_chunk(
    indices: ChunkIndices,
    expected_size: Vector3<u32>,
    bytes: &[u8],
) -> Result<Vec<BlockIndex>, PersistenceError> {
    let malformed = |reason| PersistenceError::Malformed { indices, reason };

    if bytes.len() < CHUNK_FILE_HEADER_LEN {
        return Err(malformed("truncated header"));
    }
    let (header, blocks) = bytes.split_at(CHUNK_FILE_HEADER_LEN);
    if &header[0..4] != CHUNK_FILE_MAGIC {
        return Err(malformed("bad magic"));
    }
    if header[4] != CHUNK_FILE_VERSION {
        return Err(malformed("unsupported version"));
    }

    let mut found = [0u32; 3];
    for (axis, extent) in found.iter_mut().enumerate() {
        let start = 5 + axis * 4;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&header[start..start + 4]);
        *extent = u32::from_le_bytes(raw);
    }
    let expected = [expected_size.x, expected_size.y, expected_size.z];
    if found != expected {
        return Err(PersistenceError::SizeMismatch {
            indices,
            expected,
            found,
        });
    }

    let block_count = found.iter().map(|extent| *extent as usize).product::<usize>();
    if blocks.len() != block_count {
        return Err(malformed("block count does not match size"));
    }
    Ok(blocks.to_vec())
}

/// Stores each chunk in its own file.
#[derive(Debug, Clone)]
pub struct FileChunkStorage {
    directory: PathBuf,
}

impl FileChunkStorage {
    /// Creates a storage rooted at `directory`. Nothing is touched until the
    /// first save.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Root directory of the storage.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file holding one chunk.
    pub fn chunk_path(&self, container: &str, indices: ChunkIndices) -> PathBuf {
        self.directory
            .join(container)
            .join(format!("{}_{}_{}.chunk", indices.x, indices.y, indices.z))
    }
}

impl ChunkStorage for FileChunkStorage {
    fn save(&self, snapshots: &[ChunkSnapshot]) -> Result<usize, PersistenceError> {
        let mut written = 0;
        for snapshot in snapshots {
            let path = self.chunk_path(&snapshot.container, snapshot.indices);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, encode_chunk(snapshot))
                .map_err(|source| PersistenceError::Io { path, source })?;
            written += 1;
        }
        debug!("Wrote {written} chunk file(s) to {}", self.directory.display());
        Ok(written)
    }

    fn load(
        &self,
        container: &str,
        indices: ChunkIndices,
        size: Vector3<u32>,
    ) -> Result<Option<Vec<BlockIndex>>, PersistenceError> {
        let path = self.chunk_path(container, indices);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };
        decode_chunk(indices, size, &bytes).map(Some)
    }
}

/// Keeps encoded chunks in memory. Useful when persistence is not wanted and
/// for observing saves.
#[derive(Debug, Default)]
pub struct InMemoryChunkStorage {
    chunks: Mutex<HashMap<(String, ChunkIndices), Vec<u8>>>,
    saves: Mutex<usize>,
}

impl InMemoryChunkStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently stored.
    pub fn chunk_count(&self) -> usize {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of completed `save` calls.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChunkStorage for InMemoryChunkStorage {
    fn save(&self, snapshots: &[ChunkSnapshot]) -> Result<usize, PersistenceError> {
        let mut chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        for snapshot in snapshots {
            chunks.insert(
                (snapshot.container.clone(), snapshot.indices),
                encode_chunk(snapshot),
            );
        }
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(snapshots.len())
    }

    fn load(
        &self,
        container: &str,
        indices: ChunkIndices,
        size: Vector3<u32>,
    ) -> Result<Option<Vec<BlockIndex>>, PersistenceError> {
        let chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        match chunks.get(&(container.to_string(), indices)) {
            Some(bytes) => decode_chunk(indices, size, bytes).map(Some),
            None => Ok(None),
        }
    }
}

/// Fills every chunk of `container` that has saved data in `storage`.
///
/// Chunks with unreadable or mismatched data keep their current content; the
/// problem is logged. Returns the indices of the chunks that were loaded.
pub fn load_container(
    storage: &dyn ChunkStorage,
    name: &str,
    container: &ChunkContainer,
) -> Vec<ChunkIndices> {
    let mut loaded = Vec::new();
    for chunk in container.chunks() {
        match storage.load(name, chunk.indices(), chunk.size()) {
            Ok(Some(blocks)) => match chunk.load_content(&blocks) {
                Ok(()) => loaded.push(chunk.indices()),
                Err(error) => warn!("Skipping saved chunk: {error}"),
            },
            Ok(None) => {}
            Err(error) => warn!("Skipping saved chunk: {error}"),
        }
    }
    if !loaded.is_empty() {
        debug!("Loaded {} saved chunk(s) into {name}", loaded.len());
    }
    loaded
}
