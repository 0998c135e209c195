//! # World Configuration
//!
//! Every tunable of the streaming world, loaded once at startup from TOML.
//! Every field is optional in the file; missing fields take the defaults
//! below.
//!
//! ```toml
//! tick_interval_ms = 1000
//! render_radius = 8
//! seed = 200
//! store_path = "world"
//! listen_addr = "127.0.0.1:8080"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_procedural::{NoiseField, TerrainGenerator, WorldSeed, CHUNK_HEIGHT, CHUNK_SIZE};

use crate::error::{ConfigError, ConfigResult};

/// Largest accepted render radius, in chunks.
pub const MAX_RENDER_RADIUS: u32 = 64;

/// Largest accepted worker pool size.
pub const MAX_WORKER_THREADS: usize = 256;

/// Configuration for a streaming world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// Period of the streaming tick, in milliseconds.
    pub tick_interval_ms: u64,
    /// Chunks requested around the observer on each axis.
    pub render_radius: u32,
    /// Chunk width and depth. Must equal the compiled chunk size.
    pub chunk_size: usize,
    /// Chunk height. Must equal the compiled chunk height.
    pub max_height: usize,
    /// Lowest possible terrain surface.
    pub sea_level: f64,
    /// Height variation above `sea_level`.
    pub amplitude_span: f64,
    /// Noise seed. Zero picks a time-derived seed at startup.
    pub seed: u64,
    /// Terrain height the noise octaves are sized for.
    pub target_height: f64,
    /// Amplitude falloff between octaves.
    pub persistence: f64,
    /// Chunk worker threads. Zero uses the available parallelism.
    pub worker_threads: usize,
    /// How long a chunk job may run before it is cancelled and retried.
    pub store_timeout_ms: u64,
    /// Directory of the on-disk store. `None` keeps chunks in memory only.
    pub store_path: Option<PathBuf>,
    /// Address of the chunk request endpoint. `None` serves no requests.
    pub listen_addr: Option<SocketAddr>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            render_radius: 8,
            chunk_size: CHUNK_SIZE,
            max_height: CHUNK_HEIGHT,
            sea_level: TerrainGenerator::DEFAULT_SEA_LEVEL_BASE,
            amplitude_span: TerrainGenerator::DEFAULT_AMPLITUDE_SPAN,
            seed: 200,
            target_height: 255.0,
            persistence: 0.5,
            worker_threads: 0,
            store_timeout_ms: 10_000,
            store_path: None,
            listen_addr: None,
        }
    }
}

impl WorldConfig {
    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed TOML or unknown fields and `Invalid`
    /// for out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as [`Self::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Serializes the configuration back to TOML.
    ///
    /// # Errors
    ///
    /// Returns `Parse` if serialization fails.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms", "must be greater than zero"));
        }
        if self.render_radius == 0 || self.render_radius > MAX_RENDER_RADIUS {
            return Err(invalid(
                "render_radius",
                format!("must be in 1..={MAX_RENDER_RADIUS}, got {}", self.render_radius),
            ));
        }
        if self.chunk_size != CHUNK_SIZE {
            return Err(invalid(
                "chunk_size",
                format!("this build uses {CHUNK_SIZE}, got {}", self.chunk_size),
            ));
        }
        if self.max_height != CHUNK_HEIGHT {
            return Err(invalid(
                "max_height",
                format!("this build uses {CHUNK_HEIGHT}, got {}", self.max_height),
            ));
        }
        if !self.sea_level.is_finite() || self.sea_level < 0.0 || self.sea_level >= CHUNK_HEIGHT as f64 {
            return Err(invalid(
                "sea_level",
                format!("must be in [0, {CHUNK_HEIGHT}), got {}", self.sea_level),
            ));
        }
        if !self.amplitude_span.is_finite() || self.amplitude_span < 0.0 {
            return Err(invalid("amplitude_span", "must be a non-negative number"));
        }
        if !self.target_height.is_finite() || self.target_height < 1.0 {
            return Err(invalid("target_height", "must be at least 1"));
        }
        if !self.persistence.is_finite() || self.persistence <= 0.0 || self.persistence > 1.0 {
            return Err(invalid("persistence", "must be in (0, 1]"));
        }
        if self.worker_threads > MAX_WORKER_THREADS {
            return Err(invalid(
                "worker_threads",
                format!("must be at most {MAX_WORKER_THREADS}, got {}", self.worker_threads),
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(invalid("store_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    /// Streaming tick period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Job timeout.
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Chebyshev distance beyond which loaded chunks are evicted.
    #[must_use]
    pub const fn retention_radius(&self) -> u32 {
        self.render_radius + 1
    }

    /// Worker count with zero replaced by the available parallelism.
    #[must_use]
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
    }

    /// Builds the noise field for this configuration.
    #[must_use]
    pub fn noise_field(&self) -> NoiseField {
        NoiseField::new(WorldSeed::new(self.seed), self.target_height, self.persistence)
    }

    /// Builds the terrain generator for this configuration.
    #[must_use]
    pub fn terrain_generator(&self) -> TerrainGenerator {
        TerrainGenerator::new(self.noise_field())
            .with_amplitude_span(self.amplitude_span)
            .with_sea_level_base(self.sea_level)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorldConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention_radius(), 9);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.store_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = WorldConfig::from_toml_str("").unwrap();
        assert_eq!(config, WorldConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let config = WorldConfig::from_toml_str(
            r#"
            render_radius = 3
            seed = 0
            sea_level = 40
            store_path = "/tmp/strata"
            listen_addr = "127.0.0.1:8080"
            "#,
        )
        .unwrap();

        assert_eq!(config.render_radius, 3);
        assert_eq!(config.seed, 0);
        assert!((config.sea_level - 40.0).abs() < f64::EPSILON);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/strata")));
        assert_eq!(config.listen_addr, Some(SocketAddr::from(([127, 0, 0, 1], 8080))));
        assert_eq!(config.tick_interval_ms, 1000);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = WorldConfig::from_toml_str("render_distance = 8");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            ("tick_interval_ms = 0", "tick_interval_ms"),
            ("render_radius = 0", "render_radius"),
            ("render_radius = 65", "render_radius"),
            ("chunk_size = 32", "chunk_size"),
            ("max_height = 256", "max_height"),
            ("sea_level = 128", "sea_level"),
            ("amplitude_span = -1", "amplitude_span"),
            ("target_height = 0.5", "target_height"),
            ("persistence = 0", "persistence"),
            ("persistence = 1.5", "persistence"),
            ("worker_threads = 1000", "worker_threads"),
            ("store_timeout_ms = 0", "store_timeout_ms"),
        ];

        for (text, expected) in cases {
            match WorldConfig::from_toml_str(text) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected, "{text}"),
                other => panic!("{text}: expected Invalid({expected}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_toml_round_trip() {
        let config = WorldConfig {
            render_radius: 5,
            worker_threads: 3,
            store_path: Some(PathBuf::from("world")),
            listen_addr: Some(SocketAddr::from(([0, 0, 0, 0], 9000))),
            ..WorldConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(WorldConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let result = WorldConfig::from_file("/nonexistent/strata.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_worker_threads_resolved() {
        let config = WorldConfig {
            worker_threads: 0,
            ..WorldConfig::default()
        };
        assert!(config.resolved_worker_threads() >= 1);

        let fixed = WorldConfig {
            worker_threads: 6,
            ..WorldConfig::default()
        };
        assert_eq!(fixed.resolved_worker_threads(), 6);
    }

    #[test]
    fn test_terrain_follows_config() {
        let config = WorldConfig {
            amplitude_span: 0.0,
            sea_level: 20.0,
            ..WorldConfig::default()
        };
        assert_eq!(config.terrain_generator().height_at(100, -100), 20);
    }
}
