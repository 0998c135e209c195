//! # In-Memory Store
//!
//! A [`ChunkStore`] held entirely in process memory. Used by tests and by
//! embedded worlds that do not need to survive a restart.
//!
//! [`set_offline`](MemoryStore::set_offline) makes every call fail with
//! [`StoreError::Offline`], which lets callers exercise their connectivity
//! failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use strata_procedural::{ChunkCoord, ChunkId, VoxelRecord};

use crate::error::{StoreError, StoreResult};
use crate::record::{validate_voxels, ChunkRecord};
use crate::store::ChunkStore;

#[derive(Default)]
struct MemoryInner {
    /// Unique index on (x, z).
    by_coord: HashMap<ChunkCoord, ChunkRecord>,
    /// Voxel sets by chunk; a key exists once a set has been written.
    voxels: HashMap<ChunkId, Vec<VoxelRecord>>,
    /// Every assigned id.
    known: HashMap<ChunkId, ChunkCoord>,
    next_id: u64,
}

/// Chunk store backed by hash maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    offline: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns true while the store is simulating a lost connection.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Total voxel records across all chunks.
    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.inner.read().voxels.values().map(Vec::len).sum()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.is_offline() {
            Err(StoreError::Offline)
        } else {
            Ok(())
        }
    }
}

impl ChunkStore for MemoryStore {
    fn find_chunk(&self, coord: ChunkCoord) -> StoreResult<Option<ChunkRecord>> {
        self.check_online()?;
        Ok(self.inner.read().by_coord.get(&coord).copied())
    }

    fn insert_chunk(&self, coord: ChunkCoord) -> StoreResult<ChunkRecord> {
        self.check_online()?;
        let mut inner = self.inner.write();

        if let Some(existing) = inner.by_coord.get(&coord) {
            return Err(StoreError::DuplicateChunk { existing: *existing });
        }

        inner.next_id += 1;
        let record = ChunkRecord::new(ChunkId(inner.next_id), coord);
        inner.by_coord.insert(coord, record);
        inner.known.insert(record.id, coord);
        Ok(record)
    }

    fn insert_voxels(&self, chunk_id: ChunkId, voxels: &[VoxelRecord]) -> StoreResult<()> {
        self.check_online()?;
        validate_voxels(chunk_id, voxels)?;

        let mut inner = self.inner.write();
        if !inner.known.contains_key(&chunk_id) {
            return Err(StoreError::UnknownChunk(chunk_id));
        }
        if inner.voxels.contains_key(&chunk_id) {
            return Err(StoreError::VoxelsExist(chunk_id));
        }
        inner.voxels.insert(chunk_id, voxels.to_vec());
        Ok(())
    }

    fn voxels_for_chunk(&self, chunk_id: ChunkId) -> StoreResult<Vec<VoxelRecord>> {
        self.check_online()?;
        let inner = self.inner.read();
        if !inner.known.contains_key(&chunk_id) {
            return Err(StoreError::UnknownChunk(chunk_id));
        }
        Ok(inner.voxels.get(&chunk_id).cloned().unwrap_or_default())
    }

    fn chunk_count(&self) -> StoreResult<usize> {
        self.check_online()?;
        Ok(self.inner.read().by_coord.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_procedural::VoxelType;

    #[test]
    fn test_insert_and_find() {
        let store = MemoryStore::new();
        let coord = ChunkCoord::new(2, -3);

        assert_eq!(store.find_chunk(coord).unwrap(), None);
        let record = store.insert_chunk(coord).unwrap();
        assert_eq!(store.find_chunk(coord).unwrap(), Some(record));
        assert_eq!(store.chunk_count().unwrap(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let store = MemoryStore::new();
        let a = store.insert_chunk(ChunkCoord::new(0, 0)).unwrap();
        let b = store.insert_chunk(ChunkCoord::new(0, 1)).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_offline_fails_every_call() {
        let store = MemoryStore::new();
        let record = store.insert_chunk(ChunkCoord::new(0, 0)).unwrap();

        store.set_offline(true);
        assert_eq!(store.find_chunk(ChunkCoord::new(0, 0)), Err(StoreError::Offline));
        assert_eq!(store.insert_chunk(ChunkCoord::new(1, 0)), Err(StoreError::Offline));
        assert_eq!(store.voxels_for_chunk(record.id), Err(StoreError::Offline));
        assert_eq!(store.chunk_count(), Err(StoreError::Offline));

        store.set_offline(false);
        assert_eq!(store.chunk_count(), Ok(1));
    }

    #[test]
    fn test_voxel_count() {
        let store = MemoryStore::new();
        let record = store.insert_chunk(ChunkCoord::new(0, 0)).unwrap();
        let voxels: Vec<VoxelRecord> = (0..5u8)
            .map(|y| VoxelRecord {
                chunk_id: record.id,
                x_pos: 1,
                y_pos: y,
                z_pos: 1,
                voxel_type: VoxelType::Stone,
            })
            .collect();
        store.insert_voxels(record.id, &voxels).unwrap();
        assert_eq!(store.voxel_count(), 5);
    }
}
