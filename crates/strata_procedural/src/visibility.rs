//! # Visibility Filter
//!
//! Face culling for a dense chunk: only voxels with at least one exposed
//! face produce a render instance.
//!
//! A face is exposed when the voxel on the other side is empty, when it lies
//! past the top or bottom of the chunk, or when it lies in a neighbouring
//! chunk that is not loaded. The last rule over-draws seams until the
//! neighbour arrives; callers recompute both chunks once it does.
//!
//! Instance positions are chunk-local. Add [`ChunkCoord::origin`] to place
//! them in the world.

use bytemuck::{Pod, Zeroable};

use crate::chunk::{Chunk, ChunkCoord, VoxelType, CHUNK_HEIGHT, CHUNK_SIZE};

/// Per-instance data consumed by an instanced cube draw.
///
/// Layout is the float quadruple `(x, y, z, voxel ordinal)`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct VisibleInstance {
    /// Chunk-local position of the voxel's minimum corner.
    pub position: [f32; 3],
    /// Voxel type ordinal, as a float for the vertex attribute.
    pub voxel: f32,
}

impl VisibleInstance {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates an instance for the voxel at local `(x, y, z)`.
    #[inline]
    #[must_use]
    pub fn new(x: usize, y: usize, z: usize, voxel: VoxelType) -> Self {
        Self {
            position: [x as f32, y as f32, z as f32],
            voxel: f32::from(voxel.as_u8()),
        }
    }

    /// Views an instance list as a flat float array for upload.
    #[inline]
    #[must_use]
    pub fn as_floats(instances: &[Self]) -> &[f32] {
        bytemuck::cast_slice(instances)
    }

    /// Views an instance list as raw bytes for upload.
    #[inline]
    #[must_use]
    pub fn as_bytes(instances: &[Self]) -> &[u8] {
        bytemuck::cast_slice(instances)
    }
}

/// The four horizontally adjacent chunks, where loaded.
#[derive(Clone, Copy, Debug, Default)]
pub struct Neighbors<'a> {
    /// Chunk at `z - 1`.
    pub north: Option<&'a Chunk>,
    /// Chunk at `z + 1`.
    pub south: Option<&'a Chunk>,
    /// Chunk at `x + 1`.
    pub east: Option<&'a Chunk>,
    /// Chunk at `x - 1`.
    pub west: Option<&'a Chunk>,
}

impl<'a> Neighbors<'a> {
    /// No neighbours loaded; every boundary face counts as exposed.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            north: None,
            south: None,
            east: None,
            west: None,
        }
    }

    /// Looks each neighbour up through `lookup`, keyed by the chunk's coordinate.
    pub fn from_lookup<F>(chunk: &Chunk, mut lookup: F) -> Self
    where
        F: FnMut(ChunkCoord) -> Option<&'a Chunk>,
    {
        let [north, south, east, west] = chunk.coord().cardinal_neighbors();
        Self {
            north: lookup(north),
            south: lookup(south),
            east: lookup(east),
            west: lookup(west),
        }
    }
}

/// Returns true when the solid voxel at `(x, y, z)` has at least one exposed face.
///
/// Empty voxels are never exposed.
#[must_use]
pub fn is_exposed(chunk: &Chunk, neighbors: &Neighbors<'_>, x: usize, y: usize, z: usize) -> bool {
    if chunk.get(x, y, z).is_empty() {
        return false;
    }

    // Vertical faces: the chunk spans the full height, so the bounds are open.
    if y == 0 || y + 1 >= CHUNK_HEIGHT {
        return true;
    }
    if chunk.get(x, y - 1, z).is_empty() || chunk.get(x, y + 1, z).is_empty() {
        return true;
    }

    let last = CHUNK_SIZE - 1;

    let west = if x == 0 {
        neighbors.west.map(|c| c.get(last, y, z))
    } else {
        Some(chunk.get(x - 1, y, z))
    };
    let east = if x == last {
        neighbors.east.map(|c| c.get(0, y, z))
    } else {
        Some(chunk.get(x + 1, y, z))
    };
    let north = if z == 0 {
        neighbors.north.map(|c| c.get(x, y, last))
    } else {
        Some(chunk.get(x, y, z - 1))
    };
    let south = if z == last {
        neighbors.south.map(|c| c.get(x, y, 0))
    } else {
        Some(chunk.get(x, y, z + 1))
    };

    [west, east, north, south]
        .iter()
        .any(|side| side.map_or(true, VoxelType::is_empty))
}

/// Computes the instance list for every exposed voxel of `chunk`.
///
/// Each exposed voxel appears exactly once; order is unspecified.
#[must_use]
pub fn compute_instances(chunk: &Chunk, neighbors: &Neighbors<'_>) -> Vec<VisibleInstance> {
    chunk
        .iter_solid()
        .filter(|&(x, y, z, _)| is_exposed(chunk, neighbors, x, y, z))
        .map(|(x, y, z, voxel)| VisibleInstance::new(x, y, z, voxel))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_cube(coord: ChunkCoord, min: [usize; 3], size: usize) -> Chunk {
        let mut chunk = Chunk::new(coord);
        for x in min[0]..min[0] + size {
            for y in min[1]..min[1] + size {
                for z in min[2]..min[2] + size {
                    chunk.set(x, y, z, VoxelType::Stone);
                }
            }
        }
        chunk
    }

    fn solid_slab(coord: ChunkCoord, height: usize) -> Chunk {
        let mut chunk = Chunk::new(coord);
        for x in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                for y in 0..height {
                    chunk.set(x, y, z, VoxelType::Stone);
                }
            }
        }
        chunk
    }

    #[test]
    fn test_instance_layout() {
        assert_eq!(VisibleInstance::SIZE, 16);
        let instances = [
            VisibleInstance::new(1, 2, 3, VoxelType::Grass),
            VisibleInstance::new(4, 5, 6, VoxelType::Stone),
        ];
        assert_eq!(
            VisibleInstance::as_floats(&instances),
            &[1.0, 2.0, 3.0, 3.0, 4.0, 5.0, 6.0, 4.0]
        );
        assert_eq!(VisibleInstance::as_bytes(&instances).len(), 32);
    }

    #[test]
    fn test_solid_cube_hides_interior() {
        let chunk = filled_cube(ChunkCoord::new(0, 0), [5, 20, 5], 3);
        let instances = compute_instances(&chunk, &Neighbors::none());

        assert_eq!(instances.len(), 26, "Only the centre of a 3x3x3 cube is hidden");
        assert!(!instances
            .iter()
            .any(|i| i.position == [6.0, 21.0, 6.0]));
    }

    #[test]
    fn test_single_voxel_visible() {
        let chunk = filled_cube(ChunkCoord::new(0, 0), [8, 50, 8], 1);
        let instances = compute_instances(&chunk, &Neighbors::none());
        assert_eq!(instances, vec![VisibleInstance::new(8, 50, 8, VoxelType::Stone)]);
    }

    #[test]
    fn test_height_bounds_are_exposed() {
        let chunk = solid_slab(ChunkCoord::new(0, 0), CHUNK_HEIGHT);
        let all = solid_slab(ChunkCoord::new(1, 0), CHUNK_HEIGHT);
        let neighbors = Neighbors {
            north: Some(&all),
            south: Some(&all),
            east: Some(&all),
            west: Some(&all),
        };

        let instances = compute_instances(&chunk, &neighbors);
        // Bottom and top layers only.
        assert_eq!(instances.len(), 2 * CHUNK_SIZE * CHUNK_SIZE);
        assert!(instances
            .iter()
            .all(|i| i.position[1] == 0.0 || i.position[1] == (CHUNK_HEIGHT - 1) as f32));
    }

    #[test]
    fn test_unloaded_neighbors_overdraw_seams() {
        let height = 10;
        let chunk = solid_slab(ChunkCoord::new(0, 0), height);

        let isolated = compute_instances(&chunk, &Neighbors::none());
        let neighbour = solid_slab(ChunkCoord::new(1, 0), height);
        let surrounded = compute_instances(
            &chunk,
            &Neighbors {
                north: Some(&neighbour),
                south: Some(&neighbour),
                east: Some(&neighbour),
                west: Some(&neighbour),
            },
        );

        // Fully surrounded: top layer (y = height - 1) plus bottom layer (y = 0).
        assert_eq!(surrounded.len(), 2 * CHUNK_SIZE * CHUNK_SIZE);

        // Isolated: additionally every boundary column between the two layers.
        let perimeter = 4 * CHUNK_SIZE - 4;
        assert_eq!(isolated.len(), surrounded.len() + perimeter * (height - 2));
    }

    #[test]
    fn test_neighbor_side_mapping() {
        let chunk = solid_slab(ChunkCoord::new(0, 0), 10);
        let solid = solid_slab(ChunkCoord::new(0, 0), 10);

        // Only the east neighbour is loaded: the x = 15 face is closed.
        let east_only = Neighbors {
            east: Some(&solid),
            ..Neighbors::none()
        };
        assert!(!is_exposed(&chunk, &east_only, 15, 5, 7));
        assert!(is_exposed(&chunk, &east_only, 0, 5, 7));
        assert!(is_exposed(&chunk, &east_only, 7, 5, 0));
        assert!(is_exposed(&chunk, &east_only, 7, 5, 15));

        // A neighbour with a hole right across the seam re-opens the face.
        let mut holed = solid_slab(ChunkCoord::new(0, 1), 10);
        holed.set(7, 5, 0, VoxelType::Empty);
        let south_holed = Neighbors {
            south: Some(&holed),
            ..Neighbors::none()
        };
        assert!(is_exposed(&chunk, &south_holed, 7, 5, 15));
        assert!(!is_exposed(&chunk, &south_holed, 6, 5, 15));
    }

    #[test]
    fn test_from_lookup() {
        let centre = Chunk::new(ChunkCoord::new(0, 0));
        let west = Chunk::new(ChunkCoord::new(-1, 0));
        let south = Chunk::new(ChunkCoord::new(0, 1));
        let loaded = [&west, &south];

        let neighbors =
            Neighbors::from_lookup(&centre, |coord| loaded.iter().copied().find(|c| c.coord() == coord));
        assert_eq!(neighbors.west.map(Chunk::coord), Some(ChunkCoord::new(-1, 0)));
        assert_eq!(neighbors.south.map(Chunk::coord), Some(ChunkCoord::new(0, 1)));
        assert!(neighbors.north.is_none());
        assert!(neighbors.east.is_none());
    }

    #[test]
    fn test_empty_voxel_never_exposed() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0));
        assert!(!is_exposed(&chunk, &Neighbors::none(), 3, 3, 3));
        assert!(compute_instances(&chunk, &Neighbors::none()).is_empty());
    }
}
