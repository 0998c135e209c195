//! Scripted observer movement.
//!
//! Walks a fixed list of waypoints at constant speed, standing on whatever
//! terrain is loaded underneath. Over unloaded ground the observer keeps
//! its height until the chunk arrives.

use strata_world::World;

/// Walking speed used by the server, in blocks per second.
pub const DEFAULT_SPEED: f64 = 20.0;

/// Eye height above the surface block.
const EYE_HEIGHT: f64 = 1.6;

/// An observer following waypoints across the world.
#[derive(Clone, Debug)]
pub struct ScriptedWalk {
    waypoints: Vec<[f64; 2]>,
    speed: f64,
    next: usize,
    position: [f64; 3],
}

impl ScriptedWalk {
    /// Starts at `start` and heads for each `(x, z)` waypoint in turn.
    #[must_use]
    pub fn new(start: [f64; 3], waypoints: Vec<[f64; 2]>, speed: f64) -> Self {
        Self {
            waypoints,
            speed: speed.max(0.0),
            next: 0,
            position: start,
        }
    }

    /// A square loop of `side` blocks starting and ending at the origin.
    #[must_use]
    pub fn square(side: f64, speed: f64) -> Self {
        Self::new(
            [0.0, 80.0, 0.0],
            vec![[side, 0.0], [side, side], [0.0, side], [0.0, 0.0]],
            speed,
        )
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> [f64; 3] {
        self.position
    }

    /// Returns true once the last waypoint is reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.next >= self.waypoints.len()
    }

    /// Advances the walk by `dt` seconds and returns the new position.
    pub fn step(&mut self, world: &World, dt: f64) -> [f64; 3] {
        let mut budget = self.speed * dt.max(0.0);

        while budget > 0.0 {
            let Some(&[tx, tz]) = self.waypoints.get(self.next) else {
                break;
            };
            let [x, _, z] = self.position;
            let (dx, dz) = (tx - x, tz - z);
            let distance = dx.hypot(dz);

            if distance <= budget {
                self.position[0] = tx;
                self.position[2] = tz;
                budget -= distance;
                self.next += 1;
            } else {
                self.position[0] += dx / distance * budget;
                self.position[2] += dz / distance * budget;
                budget = 0.0;
            }
        }

        self.stand_on_ground(world);
        self.position
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn stand_on_ground(&mut self, world: &World) {
        let [x, _, z] = self.position;
        if let Some(height) = world.surface_height(x.floor() as i32, z.floor() as i32) {
            self.position[1] = height as f64 + EYE_HEIGHT;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_procedural::{Chunk, ChunkCoord, ChunkId, VoxelType};

    #[test]
    fn test_walk_reaches_waypoints() {
        let world = World::new();
        let mut walk = ScriptedWalk::new([0.0, 10.0, 0.0], vec![[10.0, 0.0], [10.0, 10.0]], 5.0);

        walk.step(&world, 1.0);
        assert_eq!(walk.position(), [5.0, 10.0, 0.0]);

        // Turns the corner within one step.
        walk.step(&world, 2.0);
        assert_eq!(walk.position(), [10.0, 10.0, 5.0]);
        assert!(!walk.is_finished());

        walk.step(&world, 10.0);
        assert_eq!(walk.position(), [10.0, 10.0, 10.0]);
        assert!(walk.is_finished());
    }

    #[test]
    fn test_walk_stands_on_loaded_ground() {
        let world = World::new();
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        for y in 0..40 {
            chunk.set(2, y, 0, VoxelType::Stone);
        }
        world.publish(ChunkId(1), chunk);

        let mut walk = ScriptedWalk::new([0.0, 99.0, 0.5], vec![[2.5, 0.5]], 100.0);
        let [_, y, _] = walk.step(&world, 1.0);
        assert!((y - 41.6).abs() < 1e-9, "Expected to stand on the column, got {y}");
    }

    #[test]
    fn test_square_returns_home() {
        let world = World::new();
        let mut walk = ScriptedWalk::square(32.0, 16.0);
        let mut steps = 0;
        while !walk.is_finished() {
            walk.step(&world, 0.5);
            steps += 1;
        }
        assert_eq!(steps, 16);
        assert_eq!(walk.position(), [0.0, 80.0, 0.0]);
    }
}
