//! # Simplex Noise Implementation
//!
//! Deterministic 2D fractal noise used to derive terrain height.
//!
//! ## Construction
//!
//! A [`NoiseField`] owns one [`SimplexNoise`] octave per power of two needed
//! to reach the target terrain height. Every octave gets its own permutation
//! table, built from the canonical Perlin permutation by a fixed number of
//! seeded pairwise swaps.
//!
//! ## Determinism Guarantee
//!
//! All randomness comes from ChaCha8 streams, which are specified
//! bit-for-bit. Given the same non-zero [`WorldSeed`], a field produces
//! **exactly** the same values on any platform, in any process, forever.
//! Seed `0` is the one exception: it asks for a fresh time-derived seed.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Number of pseudo-random pairwise swaps applied to each permutation table.
pub const PERMUTATION_SWAPS: usize = 400;

/// Canonical permutation of 0..=255 (Ken Perlin's reference table).
const CANONICAL_PERMUTATION: [u8; 256] = [
    151, 160, 137, 91, 90, 15, 131, 13, 201, 95, 96, 53, 194, 233, 7, 225, 140, 36, 103, 30, 69,
    142, 8, 99, 37, 240, 21, 10, 23, 190, 6, 148, 247, 120, 234, 75, 0, 26, 197, 62, 94, 252, 219,
    203, 117, 35, 11, 32, 57, 177, 33, 88, 237, 149, 56, 87, 174, 20, 125, 136, 171, 168, 68, 175,
    74, 165, 71, 134, 139, 48, 27, 166, 77, 146, 158, 231, 83, 111, 229, 122, 60, 211, 133, 230,
    220, 105, 92, 41, 55, 46, 245, 40, 244, 102, 143, 54, 65, 25, 63, 161, 1, 216, 80, 73, 209, 76,
    132, 187, 208, 89, 18, 169, 200, 196, 135, 130, 116, 188, 159, 86, 164, 100, 109, 198, 173,
    186, 3, 64, 52, 217, 226, 250, 124, 123, 5, 202, 38, 147, 118, 126, 255, 82, 85, 212, 207, 206,
    59, 227, 47, 16, 58, 17, 182, 189, 28, 42, 223, 183, 170, 213, 119, 248, 152, 2, 44, 154, 163,
    70, 221, 153, 101, 155, 167, 43, 172, 9, 129, 22, 39, 253, 19, 98, 108, 110, 79, 113, 224, 232,
    178, 185, 112, 104, 218, 246, 97, 228, 251, 34, 242, 193, 238, 210, 144, 12, 191, 179, 162,
    241, 81, 51, 145, 235, 249, 14, 239, 107, 49, 192, 214, 31, 181, 199, 106, 157, 184, 84, 204,
    176, 115, 121, 50, 45, 127, 4, 150, 254, 138, 236, 205, 93, 222, 114, 67, 29, 24, 72, 243, 141,
    128, 195, 78, 66, 215, 61, 156, 180,
];

/// The x/z components of the 12 cube-edge gradients.
const GRADIENTS: [[i8; 2]; 12] = [
    [1, 1], [-1, 1], [1, -1], [-1, -1],
    [1, 0], [-1, 0], [1, 0], [-1, 0],
    [0, 1], [0, -1], [0, 1], [0, -1],
];

/// World seed for deterministic generation.
///
/// All procedural generation derives from this seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorldSeed(u64);

impl WorldSeed {
    /// Creates a new world seed.
    #[inline]
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Returns the raw seed value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns true if this seed requests a time-derived random seed.
    #[inline]
    #[must_use]
    pub const fn is_random(self) -> bool {
        self.0 == 0
    }

    /// Replaces a zero seed with one derived from the wall clock.
    ///
    /// Non-zero seeds are returned unchanged.
    #[must_use]
    pub fn resolve(self) -> Self {
        if !self.is_random() {
            return self;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0x9E37_79B9_7F4A_7C15, |d| d.as_nanos() as u64);
        // splitmix64 finaliser, never yields zero for a non-zero input
        let mut z = nanos.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Self(z.max(1))
    }
}

impl Default for WorldSeed {
    fn default() -> Self {
        Self(200)
    }
}

/// Pre-computed permutation table for one octave.
struct PermutationTable {
    /// 512-entry permutation table (256 entries, doubled for overflow handling).
    perm: [u8; 512],
}

impl PermutationTable {
    /// Builds the table by shuffling the canonical permutation.
    fn new(octave_seed: u64) -> Self {
        let mut source = CANONICAL_PERMUTATION;
        let mut rng = ChaCha8Rng::seed_from_u64(octave_seed);

        for _ in 0..PERMUTATION_SWAPS {
            let from = rng.gen_range(0..256usize);
            let to = rng.gen_range(0..256usize);
            source.swap(from, to);
        }

        // Double the table to avoid index wrapping
        let mut perm = [0u8; 512];
        for (i, slot) in perm.iter_mut().enumerate() {
            *slot = source[i & 255];
        }

        Self { perm }
    }

    #[inline]
    fn get(&self, index: usize) -> usize {
        usize::from(self.perm[index & 511])
    }

    #[inline]
    fn gradient(&self, index: usize) -> [i8; 2] {
        GRADIENTS[self.get(index) % 12]
    }
}

/// Single-octave 2D simplex noise generator.
///
/// Produces smooth, continuous noise values in the range [-1, 1].
pub struct SimplexNoise {
    perm_table: PermutationTable,
}

impl SimplexNoise {
    /// Skewing factor for 2D simplex grid.
    const F2: f64 = 0.366_025_403_784_438_6; // (sqrt(3) - 1) / 2
    /// Unskewing factor for 2D simplex grid.
    const G2: f64 = 0.211_324_865_405_187_1; // (3 - sqrt(3)) / 6

    /// Creates one octave from its own seed.
    #[must_use]
    pub fn new(octave_seed: u64) -> Self {
        Self {
            perm_table: PermutationTable::new(octave_seed),
        }
    }

    /// Samples 2D simplex noise at the given coordinates.
    ///
    /// # Returns
    ///
    /// A value in the range [-1, 1].
    #[must_use]
    pub fn sample(&self, x: f64, z: f64) -> f64 {
        // Skew input coordinates to simplex grid
        let skew = (x + z) * Self::F2;
        let i = fast_floor(x + skew);
        let j = fast_floor(z + skew);

        // Unskew to get first corner in simplex
        let unskew = f64::from(i.wrapping_add(j)) * Self::G2;
        let x0 = x - (f64::from(i) - unskew);
        let z0 = z - (f64::from(j) - unskew);

        // Upper or lower triangle
        let (i1, j1) = if x0 > z0 { (1, 0) } else { (0, 1) };

        let x1 = x0 - f64::from(i1) + Self::G2;
        let z1 = z0 - f64::from(j1) + Self::G2;
        let x2 = x0 - 1.0 + 2.0 * Self::G2;
        let z2 = z0 - 1.0 + 2.0 * Self::G2;

        let ii = (i & 255) as usize;
        let jj = (j & 255) as usize;
        let table = &self.perm_table;

        let g0 = table.gradient(ii + table.get(jj));
        let g1 = table.gradient(ii + i1 as usize + table.get(jj + j1 as usize));
        let g2 = table.gradient(ii + 1 + table.get(jj + 1));

        70.0 * (contribution(x0, z0, g0) + contribution(x1, z1, g1) + contribution(x2, z2, g2))
    }
}

/// Falloff-weighted gradient contribution of one simplex corner.
#[inline]
fn contribution(x: f64, z: f64, grad: [i8; 2]) -> f64 {
    let t = 0.5 - x * x - z * z;
    if t < 0.0 {
        0.0
    } else {
        let t2 = t * t;
        t2 * t2 * (x * f64::from(grad[0]) + z * f64::from(grad[1]))
    }
}

/// Seeded multi-octave noise field producing one height sample per column.
///
/// Octave `i` is sampled at `(x / 2^i, z / 2^i)` and weighted by
/// `persistence^(octaves - i)`, so the low-frequency octaves dominate.
///
/// # Example
///
/// ```rust
/// use strata_procedural::{NoiseField, WorldSeed};
///
/// let field = NoiseField::new(WorldSeed::new(200), 255.0, 0.5);
/// assert_eq!(field.octave_count(), 8);
///
/// let value = field.get_noise(12.0, -40.0);
/// assert!((-1.0..=1.0).contains(&value));
/// ```
pub struct NoiseField {
    seed: WorldSeed,
    octaves: Vec<SimplexNoise>,
    frequencies: Vec<f64>,
    amplitudes: Vec<f64>,
}

impl NoiseField {
    /// Builds a field able to describe terrain up to `target_height` blocks tall.
    ///
    /// A zero seed is replaced by a time-derived one; see [`Self::effective_seed`].
    #[must_use]
    pub fn new(seed: WorldSeed, target_height: f64, persistence: f64) -> Self {
        let seed = seed.resolve();
        let count = Self::octaves_for(target_height);

        let mut master = ChaCha8Rng::seed_from_u64(seed.value());
        let mut octaves = Vec::with_capacity(count);
        let mut frequencies = Vec::with_capacity(count);
        let mut amplitudes = Vec::with_capacity(count);

        for i in 0..count {
            octaves.push(SimplexNoise::new(master.next_u64()));
            frequencies.push(2f64.powi(i as i32));
            amplitudes.push(persistence.powi((count - i) as i32));
        }

        Self {
            seed,
            octaves,
            frequencies,
            amplitudes,
        }
    }

    /// Number of octaves needed for a target height: `ceil(log2(height))`, at least one.
    #[must_use]
    pub fn octaves_for(target_height: f64) -> usize {
        if !target_height.is_finite() || target_height <= 2.0 {
            return 1;
        }
        target_height.log2().ceil() as usize
    }

    /// The seed actually used, after zero-seed substitution.
    #[inline]
    #[must_use]
    pub const fn effective_seed(&self) -> WorldSeed {
        self.seed
    }

    /// Number of octaves in this field.
    #[inline]
    #[must_use]
    pub fn octave_count(&self) -> usize {
        self.octaves.len()
    }

    /// Amplitude-weighted sum of all octaves at a world column.
    ///
    /// Pure: the same field and coordinates always give the same value.
    #[must_use]
    pub fn get_noise(&self, x: f64, z: f64) -> f64 {
        let total: f64 = self
            .octaves
            .iter()
            .zip(&self.frequencies)
            .zip(&self.amplitudes)
            .map(|((octave, freq), amp)| octave.sample(x / freq, z / freq) * amp)
            .sum();
        total.clamp(-1.0, 1.0)
    }
}

/// Floor to `i32` without going through `f64::floor`.
#[inline]
fn fast_floor(x: f64) -> i32 {
    let xi = x as i32;
    if x < f64::from(xi) { xi.saturating_sub(1) } else { xi }
}
