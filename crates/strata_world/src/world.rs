//! # Loaded World
//!
//! The in-memory working set: every chunk that finished loading, with its
//! visible instance list.
//!
//! Chunks are published whole. A reader holding the lock sees either no
//! entry for a coordinate or a complete [`LoadedChunk`]; voxel arrays are
//! never mutated after publication. When a chunk arrives or leaves, the
//! instance lists of its loaded neighbours are rebuilt so boundary faces
//! converge to the exact set.
//!
//! Queries take world block coordinates and touch only the chunk that owns
//! each queried block. Unloaded regions read as empty.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use strata_procedural::{
    compute_instances, Chunk, ChunkCoord, ChunkId, Neighbors, VisibleInstance, VoxelType,
    CHUNK_HEIGHT,
};

/// Initial map capacity: a radius-8 window plus its retention ring.
const INITIAL_CAPACITY: usize = 19 * 19;

/// A published chunk and its render data.
#[derive(Clone, Debug)]
pub struct LoadedChunk {
    /// Chunk coordinate.
    pub coord: ChunkCoord,
    /// Store identity.
    pub chunk_id: ChunkId,
    /// Voxels. Read-only once published.
    pub chunk: Arc<Chunk>,
    /// Exposed voxels given the neighbours loaded at the last rebuild.
    pub instances: Arc<[VisibleInstance]>,
}

/// What the frame loop needs to draw one chunk.
#[derive(Clone, Debug)]
pub struct RenderChunk {
    /// Chunk coordinate.
    pub coord: ChunkCoord,
    /// Offset to add to every chunk-local instance position.
    pub origin: [f32; 3],
    /// Instance buffer contents.
    pub instances: Arc<[VisibleInstance]>,
}

/// The loaded chunk collection.
///
/// Mutations are serialized among themselves. Instance rebuilds run against
/// a snapshot of the affected neighbourhood, so the map's write lock is only
/// held to swap finished entries in.
pub struct World {
    chunks: RwLock<HashMap<ChunkCoord, Arc<LoadedChunk>>>,
    mutation: Mutex<()>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::with_capacity(INITIAL_CAPACITY)),
            mutation: Mutex::new(()),
        }
    }

    /// Publishes a fully populated chunk.
    ///
    /// Returns false, leaving the world unchanged, if the coordinate is
    /// already loaded.
    pub fn publish(&self, chunk_id: ChunkId, chunk: Chunk) -> bool {
        let _mutation = self.mutation.lock();
        let coord = chunk.coord();
        let chunk = Arc::new(chunk);
        let neighbors = coord.cardinal_neighbors();

        let mut view = {
            let chunks = self.chunks.read();
            if chunks.contains_key(&coord) {
                return false;
            }
            view_of(&chunks, &neighbors)
        };
        view.insert(coord, Arc::clone(&chunk));

        let instances = instances_in(&view, &chunk);
        let seams = rebuild(&view, &neighbors);

        let mut chunks = self.chunks.write();
        chunks.insert(
            coord,
            Arc::new(LoadedChunk {
                coord,
                chunk_id,
                chunk,
                instances,
            }),
        );
        apply(&mut chunks, seams);
        true
    }

    /// Removes one chunk from memory. Persisted data is untouched.
    pub fn evict(&self, coord: ChunkCoord) -> Option<Arc<LoadedChunk>> {
        let _mutation = self.mutation.lock();
        let neighbors = coord.cardinal_neighbors();

        let mut view = {
            let chunks = self.chunks.read();
            if !chunks.contains_key(&coord) {
                return None;
            }
            view_of(&chunks, &neighbors)
        };
        view.remove(&coord);
        let seams = rebuild(&view, &neighbors);

        let mut chunks = self.chunks.write();
        let removed = chunks.remove(&coord);
        apply(&mut chunks, seams);
        removed
    }

    /// Evicts every chunk further than `bound` from `center` on either axis.
    ///
    /// Returns the evicted coordinates in sorted order.
    pub fn retain_within(&self, center: ChunkCoord, bound: u32) -> Vec<ChunkCoord> {
        let _mutation = self.mutation.lock();

        let (evicted, border, mut view) = {
            let chunks = self.chunks.read();
            let mut evicted: Vec<ChunkCoord> = chunks
                .keys()
                .filter(|coord| coord.chebyshev_distance(center) > bound)
                .copied()
                .collect();
            if evicted.is_empty() {
                return evicted;
            }
            evicted.sort_unstable();

            let mut border: Vec<ChunkCoord> = evicted
                .iter()
                .flat_map(|coord| coord.cardinal_neighbors())
                .filter(|coord| coord.chebyshev_distance(center) <= bound)
                .filter(|coord| chunks.contains_key(coord))
                .collect();
            border.sort_unstable();
            border.dedup();

            let view = view_of(&chunks, &border);
            (evicted, border, view)
        };
        view.retain(|coord, _| evicted.binary_search(coord).is_err());
        let seams = rebuild(&view, &border);

        let mut chunks = self.chunks.write();
        for coord in &evicted {
            chunks.remove(coord);
        }
        apply(&mut chunks, seams);
        evicted
    }

    /// The loaded chunk at `coord`.
    #[must_use]
    pub fn get(&self, coord: ChunkCoord) -> Option<Arc<LoadedChunk>> {
        self.chunks.read().get(&coord).cloned()
    }

    /// Returns true if `coord` is loaded.
    #[must_use]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunks.read().contains_key(&coord)
    }

    /// Number of loaded chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    /// Returns true if nothing is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    /// Loaded coordinates in sorted order.
    #[must_use]
    pub fn loaded_coords(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self.chunks.read().keys().copied().collect();
        coords.sort_unstable();
        coords
    }

    /// Total visible instances across all loaded chunks.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.chunks.read().values().map(|c| c.instances.len()).sum()
    }

    /// Draw list for one frame. Chunks still loading are simply absent.
    #[must_use]
    pub fn render_snapshot(&self) -> Vec<RenderChunk> {
        self.chunks
            .read()
            .values()
            .map(|loaded| RenderChunk {
                coord: loaded.coord,
                origin: loaded.coord.origin(),
                instances: Arc::clone(&loaded.instances),
            })
            .collect()
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Voxel at a world block position, or `None` if its chunk is not loaded.
    ///
    /// Positions above or below the chunk column read as `Empty`.
    #[must_use]
    pub fn voxel_at(&self, x: i32, y: i32, z: i32) -> Option<VoxelType> {
        voxel_in(&self.chunks.read(), x, y, z)
    }

    /// Height of the solid column at a world block position.
    #[must_use]
    pub fn surface_height(&self, x: i32, z: i32) -> Option<usize> {
        let coord = ChunkCoord::from_block_pos(x, z);
        let chunks = self.chunks.read();
        let loaded = chunks.get(&coord)?;
        let (lx, lz) = local(coord, x, z);
        Some(loaded.chunk.column_height(lx, lz))
    }

    /// Returns true if any horizontal corner of a `tolerance`-sized box
    /// around `(x, z)` lies in a solid voxel at height `floor(y)`.
    ///
    /// Unloaded regions are treated as empty.
    #[must_use]
    pub fn is_occupied(&self, x: f64, y: f64, z: f64, tolerance: f64) -> bool {
        if !tolerance.is_finite() {
            return false;
        }
        let Some(cell_y) = to_block(y) else {
            return false;
        };

        let chunks = self.chunks.read();
        let t = tolerance.abs();
        [(-t, -t), (-t, t), (t, -t), (t, t)].iter().any(|&(dx, dz)| {
            let (Some(bx), Some(bz)) = (to_block(x + dx), to_block(z + dz)) else {
                return false;
            };
            voxel_in(&chunks, bx, cell_y, bz).is_some_and(VoxelType::is_solid)
        })
    }

    /// World positions of solid voxels within one cell of the cell containing
    /// `(x, y, z)`, including that cell.
    #[must_use]
    pub fn find_nearest_voxels(&self, x: f64, y: f64, z: f64) -> Vec<[i32; 3]> {
        let (Some(bx), Some(by), Some(bz)) = (to_block(x), to_block(y), to_block(z)) else {
            return Vec::new();
        };

        let chunks = self.chunks.read();
        let mut found = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let (Some(px), Some(py), Some(pz)) =
                        (bx.checked_add(dx), by.checked_add(dy), bz.checked_add(dz))
                    else {
                        continue;
                    };
                    if voxel_in(&chunks, px, py, pz).is_some_and(VoxelType::is_solid) {
                        found.push([px, py, pz]);
                    }
                }
            }
        }
        found
    }
}

/// Voxel data of every loaded chunk at or beside one of `targets`.
fn view_of(
    chunks: &HashMap<ChunkCoord, Arc<LoadedChunk>>,
    targets: &[ChunkCoord],
) -> HashMap<ChunkCoord, Arc<Chunk>> {
    let mut view = HashMap::with_capacity(targets.len() * 5);
    for target in targets {
        for coord in std::iter::once(*target).chain(target.cardinal_neighbors()) {
            if let Some(loaded) = chunks.get(&coord) {
                view.entry(coord).or_insert_with(|| Arc::clone(&loaded.chunk));
            }
        }
    }
    view
}

fn instances_in(view: &HashMap<ChunkCoord, Arc<Chunk>>, chunk: &Chunk) -> Arc<[VisibleInstance]> {
    let neighbors = Neighbors::from_lookup(chunk, |coord| view.get(&coord).map(|c| c.as_ref()));
    compute_instances(chunk, &neighbors).into()
}

/// Instance lists for whichever of `coords` are present in `view`.
fn rebuild(
    view: &HashMap<ChunkCoord, Arc<Chunk>>,
    coords: &[ChunkCoord],
) -> Vec<(ChunkCoord, Arc<[VisibleInstance]>)> {
    coords
        .iter()
        .filter_map(|coord| {
            let chunk = view.get(coord)?;
            Some((*coord, instances_in(view, chunk)))
        })
        .collect()
}

/// Swaps rebuilt instance lists into the map.
fn apply(
    chunks: &mut HashMap<ChunkCoord, Arc<LoadedChunk>>,
    rebuilt: Vec<(ChunkCoord, Arc<[VisibleInstance]>)>,
) {
    for (coord, instances) in rebuilt {
        if let Some(existing) = chunks.get_mut(&coord) {
            *existing = Arc::new(LoadedChunk {
                instances,
                ..LoadedChunk::clone(existing)
            });
        }
    }
}

fn voxel_in(
    chunks: &HashMap<ChunkCoord, Arc<LoadedChunk>>,
    x: i32,
    y: i32,
    z: i32,
) -> Option<VoxelType> {
    let coord = ChunkCoord::from_block_pos(x, z);
    let loaded = chunks.get(&coord)?;
    let Ok(y) = usize::try_from(y) else {
        return Some(VoxelType::Empty);
    };
    if y >= CHUNK_HEIGHT {
        return Some(VoxelType::Empty);
    }
    let (lx, lz) = local(coord, x, z);
    Some(loaded.chunk.get(lx, y, lz))
}

/// Position of a world block inside its owning chunk.
fn local(coord: ChunkCoord, x: i32, z: i32) -> (usize, usize) {
    // from_block_pos guarantees both offsets are in 0..CHUNK_SIZE.
    (
        (x - coord.world_x()).unsigned_abs() as usize,
        (z - coord.world_z()).unsigned_abs() as usize,
    )
}

/// Block containing `v`, or `None` if it lies outside the `i32` grid.
#[allow(clippy::cast_possible_truncation)]
fn to_block(v: f64) -> Option<i32> {
    let cell = v.floor();
    (cell >= f64::from(i32::MIN) && cell <= f64::from(i32::MAX)).then(|| cell as i32)
}
