//! # Store Contract Tests
//!
//! Every store implementation must behave the same way. Each test here runs
//! against both `MemoryStore` and a fresh `DiskStore`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use strata_procedural::{
    Chunk, ChunkCoord, ChunkDataError, ChunkId, NoiseField, TerrainGenerator, VoxelRecord,
    VoxelType, WorldSeed,
};
use strata_store::{ChunkStore, DiskStore, MemoryStore, StoreError};

fn temp_dir() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("test_store_contract_{id}_{n}"))
}

/// Runs `check` against every store implementation.
fn for_each_store(check: impl Fn(&str, Arc<dyn ChunkStore>)) {
    check("memory", Arc::new(MemoryStore::new()));

    let dir = temp_dir();
    check("disk", Arc::new(DiskStore::open(&dir).unwrap()));
    std::fs::remove_dir_all(&dir).ok();
}

fn generated_chunk(coord: ChunkCoord) -> Chunk {
    TerrainGenerator::new(NoiseField::new(WorldSeed::new(200), 255.0, 0.5)).generate(coord)
}

/// Test: Generate, persist, and reload reproduces the identical grid.
#[test]
fn test_generate_persist_load_round_trip() {
    for_each_store(|name, store| {
        let coord = ChunkCoord::new(4, -6);
        let chunk = generated_chunk(coord);

        let record = store.insert_chunk(coord).unwrap();
        store.insert_voxels(record.id, &chunk.to_records(record.id)).unwrap();

        let found = store.find_chunk(coord).unwrap();
        assert_eq!(found, Some(record), "[{name}] lookup after insert");

        let voxels = store.voxels_for_chunk(record.id).unwrap();
        println!("[{name}] {} voxels persisted", voxels.len());
        assert_eq!(voxels.len(), chunk.solid_count());

        let reloaded = Chunk::from_records(coord, &voxels).unwrap();
        assert_eq!(reloaded, chunk, "[{name}] reload must reproduce the grid");
    });
}

/// Test: A second record for one coordinate is rejected and names the winner.
#[test]
fn test_unique_coordinate_index() {
    for_each_store(|name, store| {
        let coord = ChunkCoord::new(0, 0);
        let first = store.insert_chunk(coord).unwrap();

        match store.insert_chunk(coord) {
            Err(StoreError::DuplicateChunk { existing }) => assert_eq!(existing, first, "[{name}]"),
            other => panic!("[{name}] expected DuplicateChunk, got {other:?}"),
        }
        assert_eq!(store.chunk_count().unwrap(), 1, "[{name}]");
    });
}

/// Test: Concurrent inserts for one coordinate produce exactly one winner.
#[test]
fn test_concurrent_insert_single_winner() {
    for_each_store(|name, store| {
        let coord = ChunkCoord::new(9, 9);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.insert_chunk(coord))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "[{name}] exactly one insert must win");

        let winner = *winners[0];
        for result in &results {
            match result {
                Ok(record) => assert_eq!(*record, winner),
                Err(StoreError::DuplicateChunk { existing }) => assert_eq!(*existing, winner),
                Err(other) => panic!("[{name}] unexpected error {other:?}"),
            }
        }
    });
}

/// Test: A voxel set is written once and never replaced.
#[test]
fn test_voxels_written_once() {
    for_each_store(|name, store| {
        let record = store.insert_chunk(ChunkCoord::new(1, 2)).unwrap();
        let voxel = VoxelRecord {
            chunk_id: record.id,
            x_pos: 0,
            y_pos: 0,
            z_pos: 0,
            voxel_type: VoxelType::Stone,
        };

        store.insert_voxels(record.id, &[voxel]).unwrap();
        let replacement = VoxelRecord {
            voxel_type: VoxelType::Gravel,
            ..voxel
        };
        assert_eq!(
            store.insert_voxels(record.id, &[replacement]),
            Err(StoreError::VoxelsExist(record.id)),
            "[{name}]"
        );
        assert_eq!(store.voxels_for_chunk(record.id).unwrap(), vec![voxel], "[{name}]");
    });
}

/// Test: Malformed voxel batches are rejected whole.
#[test]
fn test_invalid_batches_write_nothing() {
    for_each_store(|name, store| {
        let record = store.insert_chunk(ChunkCoord::new(0, 0)).unwrap();
        let good = VoxelRecord {
            chunk_id: record.id,
            x_pos: 1,
            y_pos: 1,
            z_pos: 1,
            voxel_type: VoxelType::Dirt,
        };
        let bad = VoxelRecord { y_pos: 128, ..good };

        assert_eq!(
            store.insert_voxels(record.id, &[good, bad]),
            Err(StoreError::Data(ChunkDataError::RecordOutOfBounds { x: 1, y: 128, z: 1 })),
            "[{name}]"
        );
        assert!(store.voxels_for_chunk(record.id).unwrap().is_empty(), "[{name}]");

        // The chunk can still receive a valid set afterwards.
        store.insert_voxels(record.id, &[good]).unwrap();
    });
}

/// Test: Unknown ids are reported, not treated as empty chunks.
#[test]
fn test_unknown_chunk_id() {
    for_each_store(|name, store| {
        let ghost = ChunkId(999);
        assert_eq!(store.voxels_for_chunk(ghost), Err(StoreError::UnknownChunk(ghost)), "[{name}]");
        assert_eq!(store.insert_voxels(ghost, &[]), Err(StoreError::UnknownChunk(ghost)), "[{name}]");
    });
}

/// Test: A chunk record without voxels reads back as an empty set.
#[test]
fn test_record_without_voxels_reads_empty() {
    for_each_store(|name, store| {
        let record = store.insert_chunk(ChunkCoord::new(-1, -1)).unwrap();
        assert!(store.voxels_for_chunk(record.id).unwrap().is_empty(), "[{name}]");
    });
}

/// Test: Disk data survives process restart (simulated by reopening).
#[test]
fn test_disk_store_survives_reopen() {
    let dir = temp_dir();
    let coords = [ChunkCoord::new(0, 0), ChunkCoord::new(1, 0), ChunkCoord::new(-3, 8)];

    {
        let store = DiskStore::open(&dir).unwrap();
        for coord in coords {
            let record = store.insert_chunk(coord).unwrap();
            store
                .insert_voxels(record.id, &generated_chunk(coord).to_records(record.id))
                .unwrap();
        }
    }

    let store = DiskStore::open(&dir).unwrap();
    assert_eq!(store.chunk_count().unwrap(), coords.len());
    for coord in coords {
        let record = store.find_chunk(coord).unwrap().unwrap();
        let voxels = store.voxels_for_chunk(record.id).unwrap();
        assert_eq!(Chunk::from_records(coord, &voxels).unwrap(), generated_chunk(coord));
    }

    std::fs::remove_dir_all(&dir).ok();
}
