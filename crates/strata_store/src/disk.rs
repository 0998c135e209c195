//! # On-Disk Store
//!
//! A [`ChunkStore`] rooted at a directory.
//!
//! ## Guarantees
//!
//! 1. **Durability**: once `insert_chunk` or `insert_voxels` returns, the
//!    data is synced to disk
//! 2. **Atomicity**: a voxel file is written under a private temporary name
//!    and linked into place, so readers see the whole set or none of it
//! 3. **Uniqueness**: the chunk index is loaded at open and rejects a second
//!    record for the same coordinate
//! 4. **Recovery**: a failed index append is cut back off the log, and the
//!    id it used is never handed out again
//!
//! Lookups never wait on a disk sync. Index appends are ordered by the log
//! lock; voxel files for different chunks are written in parallel.
//!
//! ## Format
//!
//! ```text
//! chunks.idx
//!   [4 bytes: magic "SCIX"]
//!   [4 bytes: version]
//!   Entry (repeated, little-endian):
//!   [8 bytes: chunk id]
//!   [4 bytes: chunk x]
//!   [4 bytes: chunk z]
//!   [4 bytes: CRC32 of the 16 bytes above]
//!
//! voxels/<id>.bin
//!   [4 bytes: magic "SVOX"]
//!   [4 bytes: version]
//!   [4 bytes: voxel count]
//!   [4 bytes: CRC32 of payload]
//!   [N bytes: payload, LZ4 size-prepended (x, y, z, type) byte quads]
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use parking_lot::{Mutex, RwLock};
use strata_procedural::{ChunkCoord, ChunkId, VoxelRecord, VoxelType};

use crate::error::{StoreError, StoreResult};
use crate::record::{validate_voxels, ChunkRecord};
use crate::store::ChunkStore;

/// Magic bytes identifying a chunk index file.
const INDEX_MAGIC: &[u8; 4] = b"SCIX";

/// Magic bytes identifying a voxel file.
const VOXEL_MAGIC: &[u8; 4] = b"SVOX";

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

/// Index file header size.
const INDEX_HEADER_LEN: usize = 8;

/// Index entry size including its CRC.
const INDEX_ENTRY_LEN: usize = 20;

/// Voxel file header size.
const VOXEL_HEADER_LEN: usize = 16;

const INDEX_FILE: &str = "chunks.idx";
const VOXEL_DIR: &str = "voxels";
const TEMP_SUFFIX: &str = "tmp";

/// One voxel as stored in a voxel file.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
struct PackedVoxel {
    x: u8,
    y: u8,
    z: u8,
    voxel: u8,
}

impl PackedVoxel {
    fn pack(record: &VoxelRecord) -> Self {
        Self {
            x: record.x_pos,
            y: record.y_pos,
            z: record.z_pos,
            voxel: record.voxel_type.as_u8(),
        }
    }

    fn unpack(self, chunk_id: ChunkId) -> StoreResult<VoxelRecord> {
        Ok(VoxelRecord {
            chunk_id,
            x_pos: self.x,
            y_pos: self.y,
            z_pos: self.z,
            voxel_type: VoxelType::from_u8(self.voxel)?,
        })
    }
}

#[derive(Default)]
struct DiskIndex {
    by_coord: HashMap<ChunkCoord, ChunkRecord>,
    ids: HashMap<ChunkId, ChunkCoord>,
    last_id: u64,
}

impl DiskIndex {
    fn insert(&mut self, record: ChunkRecord) {
        self.by_coord.insert(record.coord(), record);
        self.ids.insert(record.id, record.coord());
        self.last_id = self.last_id.max(record.id.0);
    }
}

/// What the index log needs from the file behind it.
trait LogFile: Write {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append side of `chunks.idx`.
struct IndexLog<F = File> {
    file: F,
    /// Length of the committed prefix.
    len: u64,
    /// Highest id ever handed out, committed or not.
    last_id: u64,
    /// A failed append left bytes past `len` that are not cut off yet.
    torn: bool,
}

impl<F: LogFile> IndexLog<F> {
    fn new(file: F, len: u64, last_id: u64) -> Self {
        Self {
            file,
            len,
            last_id,
            torn: false,
        }
    }

    fn allocate_id(&mut self) -> ChunkId {
        self.last_id += 1;
        ChunkId(self.last_id)
    }

    /// Appends one entry and syncs it.
    ///
    /// On failure the file is cut back to the committed prefix. If the cut
    /// fails as well, it is retried before the next append.
    fn append(&mut self, entry: &[u8]) -> io::Result<()> {
        if self.torn {
            self.file.truncate(self.len)?;
            self.torn = false;
        }

        let written = self.file.write_all(entry).and_then(|()| self.file.sync());
        if let Err(e) = written {
            if let Err(cut) = self.file.truncate(self.len) {
                tracing::warn!(
                    "Could not cut failed index append back to {} bytes: {}",
                    self.len,
                    cut
                );
                self.torn = true;
            }
            return Err(e);
        }

        self.len += entry.len() as u64;
        Ok(())
    }
}

/// Chunk store persisted under a directory.
pub struct DiskStore {
    root: PathBuf,
    index: RwLock<DiskIndex>,
    log: Mutex<IndexLog>,
    /// Makes temporary voxel file names unique within this process.
    temp_counter: AtomicU64,
}

impl DiskStore {
    /// Opens or creates a store rooted at `root`.
    ///
    /// An index entry cut short by a crash is dropped; stale temporary voxel
    /// files are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or if the index
    /// has a bad header, a CRC mismatch, or two records for one coordinate.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(VOXEL_DIR))
            .map_err(|e| StoreError::io("creating store directory", &e))?;

        let index_path = root.join(INDEX_FILE);
        let mut log = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&index_path)
            .map_err(|e| StoreError::io("opening chunk index", &e))?;

        let mut bytes = Vec::new();
        log.read_to_end(&mut bytes)
            .map_err(|e| StoreError::io("reading chunk index", &e))?;

        let (index, valid_len) = if bytes.is_empty() {
            let mut header = Vec::with_capacity(INDEX_HEADER_LEN);
            header.extend_from_slice(INDEX_MAGIC);
            header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
            log.write_all(&header)
                .and_then(|()| log.sync_data())
                .map_err(|e| StoreError::io("writing chunk index header", &e))?;
            (DiskIndex::default(), INDEX_HEADER_LEN)
        } else {
            let (index, valid_len) = Self::parse_index(&bytes)?;
            if valid_len < bytes.len() {
                tracing::warn!(
                    "Chunk index {} has a torn tail entry ({} bytes), truncating",
                    index_path.display(),
                    bytes.len() - valid_len
                );
                log.set_len(valid_len as u64)
                    .map_err(|e| StoreError::io("truncating chunk index", &e))?;
            }
            (index, valid_len)
        };

        let last_id = index.last_id;
        let store = Self {
            root,
            index: RwLock::new(index),
            log: Mutex::new(IndexLog::new(log, valid_len as u64, last_id)),
            temp_counter: AtomicU64::new(0),
        };
        store.remove_stale_temp_files()?;

        tracing::info!(
            "Chunk store opened: {} chunks at {}",
            store.index.read().by_coord.len(),
            store.root.display()
        );
        Ok(store)
    }

    /// Directory this store lives in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parses index bytes, returning the index and the length of the valid prefix.
    fn parse_index(bytes: &[u8]) -> StoreResult<(DiskIndex, usize)> {
        if bytes.len() < INDEX_HEADER_LEN || &bytes[0..4] != INDEX_MAGIC {
            return Err(StoreError::Corrupt("invalid chunk index magic".to_string()));
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported chunk index version: {version}"
            )));
        }

        let mut index = DiskIndex::default();
        let entries = bytes[INDEX_HEADER_LEN..].chunks_exact(INDEX_ENTRY_LEN);
        let complete = entries.len();

        for (i, entry) in entries.enumerate() {
            let body = &entry[..16];
            let crc = read_u32(&entry[16..20]);
            if crc32fast::hash(body) != crc {
                return Err(StoreError::Corrupt(format!("chunk index entry {i} failed CRC")));
            }

            let id = ChunkId(u64::from_le_bytes([
                body[0], body[1], body[2], body[3], body[4], body[5], body[6], body[7],
            ]));
            let coord = ChunkCoord::new(read_i32(&body[8..12]), read_i32(&body[12..16]));
            if let Some(existing) = index.by_coord.get(&coord) {
                return Err(StoreError::Corrupt(format!(
                    "chunk index holds two records for {coord}: {} and {id}",
                    existing.id
                )));
            }
            index.insert(ChunkRecord::new(id, coord));
        }

        Ok((index, INDEX_HEADER_LEN + complete * INDEX_ENTRY_LEN))
    }

    fn voxel_path(&self, chunk_id: ChunkId) -> PathBuf {
        self.root.join(VOXEL_DIR).join(format!("{}.bin", chunk_id.0))
    }

    fn temp_path(&self, chunk_id: ChunkId) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(VOXEL_DIR)
            .join(format!("{}.{}.{TEMP_SUFFIX}", chunk_id.0, n))
    }

    fn remove_stale_temp_files(&self) -> StoreResult<()> {
        let dir = self.root.join(VOXEL_DIR);
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io("listing voxel files", &e))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == TEMP_SUFFIX) {
                tracing::warn!("Removing unfinished voxel file {}", path.display());
                fs::remove_file(&path).map_err(|e| StoreError::io("removing temp file", &e))?;
            }
        }
        Ok(())
    }

    fn known(&self, chunk_id: ChunkId) -> bool {
        self.index.read().ids.contains_key(&chunk_id)
    }
}

impl ChunkStore for DiskStore {
    fn find_chunk(&self, coord: ChunkCoord) -> StoreResult<Option<ChunkRecord>> {
        Ok(self.index.read().by_coord.get(&coord).copied())
    }

    fn insert_chunk(&self, coord: ChunkCoord) -> StoreResult<ChunkRecord> {
        // Appenders queue on the log; lookups only ever take the index lock.
        let mut log = self.log.lock();
        if let Some(existing) = self.index.read().by_coord.get(&coord) {
            return Err(StoreError::DuplicateChunk { existing: *existing });
        }

        let record = ChunkRecord::new(log.allocate_id(), coord);
        log.append(&encode_index_entry(&record))
            .map_err(|e| StoreError::io("appending chunk index entry", &e))?;

        self.index.write().insert(record);
        Ok(record)
    }

    fn insert_voxels(&self, chunk_id: ChunkId, voxels: &[VoxelRecord]) -> StoreResult<()> {
        validate_voxels(chunk_id, voxels)?;
        if !self.known(chunk_id) {
            return Err(StoreError::UnknownChunk(chunk_id));
        }

        let packed: Vec<PackedVoxel> = voxels.iter().map(PackedVoxel::pack).collect();
        let payload = compress_prepend_size(bytemuck::cast_slice(&packed));
        let count = u32::try_from(voxels.len())
            .map_err(|_| StoreError::Corrupt(format!("too many voxels: {}", voxels.len())))?;

        let mut file_bytes = Vec::with_capacity(VOXEL_HEADER_LEN + payload.len());
        file_bytes.extend_from_slice(VOXEL_MAGIC);
        file_bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        file_bytes.extend_from_slice(&count.to_le_bytes());
        file_bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        file_bytes.extend_from_slice(&payload);

        let path = self.voxel_path(chunk_id);
        if path.exists() {
            return Err(StoreError::VoxelsExist(chunk_id));
        }

        let temp = self.temp_path(chunk_id);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .map_err(|e| StoreError::io("creating voxel file", &e))?;
        let written = file
            .write_all(&file_bytes)
            .and_then(|()| file.sync_all())
            .and_then(|()| fs::hard_link(&temp, &path));
        fs::remove_file(&temp).ok();

        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::VoxelsExist(chunk_id)),
            Err(e) => Err(StoreError::io("writing voxel file", &e)),
        }
    }

    fn voxels_for_chunk(&self, chunk_id: ChunkId) -> StoreResult<Vec<VoxelRecord>> {
        if !self.known(chunk_id) {
            return Err(StoreError::UnknownChunk(chunk_id));
        }

        let bytes = match fs::read(self.voxel_path(chunk_id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("reading voxel file", &e)),
        };

        if bytes.len() < VOXEL_HEADER_LEN || &bytes[0..4] != VOXEL_MAGIC {
            return Err(StoreError::Corrupt(format!("voxel file {chunk_id}: bad header")));
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "voxel file {chunk_id}: unsupported version {version}"
            )));
        }
        let count = read_u32(&bytes[8..12]) as usize;
        let crc = read_u32(&bytes[12..16]);
        let payload = &bytes[VOXEL_HEADER_LEN..];
        if crc32fast::hash(payload) != crc {
            return Err(StoreError::Corrupt(format!("voxel file {chunk_id}: CRC mismatch")));
        }

        let raw = decompress_size_prepended(payload)
            .map_err(|e| StoreError::Corrupt(format!("voxel file {chunk_id}: {e}")))?;
        let packed: &[PackedVoxel] = bytemuck::try_cast_slice(&raw)
            .map_err(|e| StoreError::Corrupt(format!("voxel file {chunk_id}: {e:?}")))?;
        if packed.len() != count {
            return Err(StoreError::Corrupt(format!(
                "voxel file {chunk_id}: expected {count} voxels, found {}",
                packed.len()
            )));
        }

        packed.iter().map(|p| p.unpack(chunk_id)).collect()
    }

    fn chunk_count(&self) -> StoreResult<usize> {
        Ok(self.index.read().by_coord.len())
    }
}

fn encode_index_entry(record: &ChunkRecord) -> Vec<u8> {
    let mut entry = Vec::with_capacity(INDEX_ENTRY_LEN);
    entry.extend_from_slice(&record.id.0.to_le_bytes());
    entry.extend_from_slice(&record.x_pos.to_le_bytes());
    entry.extend_from_slice(&record.z_pos.to_le_bytes());
    let crc = crc32fast::hash(&entry);
    entry.extend_from_slice(&crc.to_le_bytes());
    entry
}

#[inline]
fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
fn read_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
