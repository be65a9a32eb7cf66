//! Engine configuration.
//!
//! Provides the save location, world geometry, spawn and autosave settings.
//! Configuration can be loaded from and saved to a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use quarry_common::{Size3, Spatial, WorldPos, WorldResult};
use quarry_world::{SurfaceSettings, DEFAULT_SOLID_BLOCK};

use crate::autosave::MIN_AUTOSAVE_INTERVAL;

/// Configuration file name.
pub const CONFIG_FILE: &str = "quarry.toml";

/// Engine configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === Storage ===
    /// Directory holding `Surfaces/`
    pub save_dir: PathBuf,
    /// Block catalog JSON
    pub catalog_path: PathBuf,
    /// Structure library JSON (optional)
    pub structures_path: Option<PathBuf>,

    // === World Settings ===
    /// Surface name
    pub world_name: String,
    /// World seed
    pub world_seed: u64,
    /// World-space size of one voxel
    pub block_size: [u32; 3],
    /// Voxels per chunk
    pub chunk_size: [u32; 3],
    /// Chunks per section
    pub section_size: [u32; 3],
    /// World-space position of voxel (0, 0, 0)
    pub offset: [f64; 3],
    /// Block assumed when a ray hits an unknown name
    pub default_solid_block: String,

    // === Spawn ===
    /// Spawn voxel
    pub spawn_position: [i64; 3],
    /// Chunks generated around spawn on startup
    pub spawn_radius_chunks: u32,
    /// Structure stamped at spawn (looked up in the structure library)
    pub spawn_structure: Option<String>,

    // === Runtime ===
    /// Auto-save interval in seconds (0 = disabled)
    pub auto_save_interval: u32,
    /// Seconds to keep the world loaded before shutting down (0 = exit after startup)
    pub run_duration: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("saves"),
            catalog_path: PathBuf::from("data/blocks.json"),
            structures_path: None,

            world_name: "Earth".to_string(),
            world_seed: 1,
            block_size: [32, 32, 32],
            chunk_size: [16, 16, 16],
            section_size: [8, 8, 8],
            offset: [0.0, 0.0, 0.0],
            default_solid_block: DEFAULT_SOLID_BLOCK.to_string(),

            spawn_position: [0, 0, 0],
            spawn_radius_chunks: 2,
            spawn_structure: None,

            auto_save_interval: 300, // 5 minutes
            run_duration: 0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }

                match toml::from_str(&contents) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        config
                    },
                    Err(e) => {
                        warn!("Failed to parse config file: {e}");
                        Self::default()
                    },
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        // Geometry
        self.block_size = self.block_size.map(|v| v.clamp(1, 4096));
        self.chunk_size = self.chunk_size.map(|v| v.clamp(1, 256));
        self.section_size = self.section_size.map(|v| v.clamp(1, 64));
        self.offset = self.offset.map(|v| if v.is_finite() { v } else { 0.0 });

        // Spawn
        self.spawn_radius_chunks = self.spawn_radius_chunks.min(16);

        // Runtime
        if self.auto_save_interval != 0 {
            self.auto_save_interval = self.auto_save_interval.max(MIN_AUTOSAVE_INTERVAL);
        }

        if self.world_name.is_empty() {
            warn!("Empty world name, using default");
            self.world_name = Self::default().world_name;
        }
    }

    /// Surface settings described by this configuration.
    pub fn surface_settings(&self) -> WorldResult<SurfaceSettings> {
        let [bx, by, bz] = self.block_size;
        let [cx, cy, cz] = self.chunk_size;
        let [sx, sy, sz] = self.section_size;
        let mut settings = SurfaceSettings::new(self.world_name.clone(), self.world_seed)
            .with_chunk_size(Size3::new(cx, cy, cz)?)
            .with_section_size(Size3::new(sx, sy, sz)?);
        settings.spatial = Spatial::new(Size3::new(bx, by, bz)?, WorldPos::from(self.offset));
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.world_name, "Earth");
        assert_eq!(config.chunk_size, [16, 16, 16]);
        assert_eq!(config.auto_save_interval, 300);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.chunk_size = [0, 16, 1000];
        config.offset = [f64::NAN, 1.0, f64::INFINITY];
        config.auto_save_interval = 5;
        config.spawn_radius_chunks = 100;
        config.world_name = String::new();

        config.validate();

        assert_eq!(config.chunk_size, [1, 16, 256]);
        assert_eq!(config.offset, [0.0, 1.0, 0.0]);
        assert_eq!(config.auto_save_interval, MIN_AUTOSAVE_INTERVAL);
        assert_eq!(config.spawn_radius_chunks, 16);
        assert_eq!(config.world_name, "Earth");
    }

    #[test]
    fn test_disabled_autosave_stays_disabled() {
        let mut config = EngineConfig {
            auto_save_interval: 0,
            ..EngineConfig::default()
        };
        config.validate();
        assert_eq!(config.auto_save_interval, 0);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config = EngineConfig {
            world_name: "Moon".to_string(),
            world_seed: 12345,
            offset: [0.0, 0.0, 1_024_000.0],
            spawn_structure: Some("basic_spawn".to_string()),
            ..EngineConfig::default()
        };

        config.save_to(&config_path).expect("Failed to save config");

        let loaded = EngineConfig::load_from(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = EngineConfig::load_from("/nonexistent/path/config.toml");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_config_load_invalid_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join(CONFIG_FILE);
        fs::write(&config_path, "world_seed = \"not a number\"").expect("write");
        assert_eq!(EngineConfig::load_from(&config_path), EngineConfig::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("world_name = \"Mars\"").expect("parse");
        assert_eq!(config.world_name, "Mars");
        assert_eq!(config.section_size, [8, 8, 8]);
    }

    #[test]
    fn test_surface_settings() {
        let config = EngineConfig {
            block_size: [10, 20, 40],
            chunk_size: [4, 4, 8],
            offset: [1.0, 2.0, 3.0],
            ..EngineConfig::default()
        };
        let settings = config.surface_settings().expect("valid sizes");
        assert_eq!(settings.name, "Earth");
        assert_eq!(settings.grid.chunk_size.to_array(), [4, 4, 8]);
        assert_eq!(settings.spatial.block_size.to_array(), [10, 20, 40]);
        assert_eq!(settings.spatial.offset, WorldPos::new(1.0, 2.0, 3.0));
    }
}
