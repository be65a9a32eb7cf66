//! # Quarry World
//!
//! World management for Quarry.
//!
//! This crate handles:
//! - The block catalog and its terrain rules
//! - Lazily allocated sections and palette-compressed chunks
//! - Seeded terrain generation
//! - Section snapshot encoding and on-disk persistence
//! - Grid raycasting and target picking
//! - Mining effects and structure stamping
//! - Handing exposed voxels to a renderer

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod catalog;
pub mod chunk;
pub mod codec;
pub mod effects;
pub mod generator;
pub mod persistence;
pub mod raycast;
pub mod render;
pub mod section;
pub mod surface;
pub mod world;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::catalog::*;
    pub use crate::chunk::*;
    pub use crate::codec::*;
    pub use crate::effects::*;
    pub use crate::generator::*;
    pub use crate::persistence::*;
    pub use crate::raycast::*;
    pub use crate::render::*;
    pub use crate::section::*;
    pub use crate::surface::{PendingChanges, Surface, SurfaceSettings, VoxelAddress};
    pub use crate::world::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quarry_common::{ChunkPos, Size3, SpatialPos};

    use super::*;

    const CATALOG: &str = r#"{
        "Block": {
            "Air": { "flags": ["gas", "no_generate"], "visibility": false }
        },
        "NaturalBlock": {
            "Dirt": { "generator_data": [{ "depth": -1000000, "flags": ["layer"] }] },
            "Stone": { "generator_data": [{ "depth": 16, "flags": ["layer"] }] }
        },
        "MineableBlock": {
            "Ore_Gold": {
                "health": 5,
                "minimum_level": 1,
                "generator_data": [{ "depth": 40, "extent": 30, "abundance": 0.05 }]
            }
        }
    }"#;

    fn settings() -> SurfaceSettings {
        SurfaceSettings::new("Earth", 1234).with_chunk_size(Size3::cube(8))
    }

    #[test]
    fn test_generate_save_reload() {
        let dir = tempfile::tempdir().expect("temp dir");
        let catalog = Arc::new(Catalog::from_json_str(CATALOG).expect("valid catalog"));
        let manager = SaveManager::new(dir.path());

        let mut world = World::new(Surface::new(settings(), Arc::clone(&catalog)));
        world.generate_region(ChunkPos::new(0, 0, -8), ChunkPos::new(1, 0, -6)).expect("generate");
        world.set_block(SpatialPos::new(0, 0, 0), "Ore_Gold").expect("write");
        let outcome = world.save(&manager).expect("save");
        assert!(matches!(outcome, SaveOutcome::Saved(report) if report.written > 0));

        let reloaded = manager
            .store()
            .load_surface(settings(), Arc::clone(&catalog))
            .expect("load");
        for section in world.surface().sections().map(|(pos, _)| *pos) {
            assert_eq!(reloaded.section(section), world.surface().section(section));
        }
        assert_eq!(reloaded.block_name(SpatialPos::new(0, 0, 0)), Some("Ore_Gold"));
    }

    #[test]
    fn test_layers_follow_depth() {
        let catalog = Arc::new(Catalog::from_json_str(CATALOG).expect("valid catalog"));
        let mut world = World::new(Surface::new(settings(), catalog));
        // z_depth 0..=7 sits above the Stone layer; z_depth 200 is far below it
        world.generate_chunk(ChunkPos::new(0, 0, 0), GenerationMode::Safe).expect("generate");
        world.generate_chunk(ChunkPos::new(0, 0, -25), GenerationMode::Safe).expect("generate");
        assert_eq!(world.surface().block_name(SpatialPos::new(3, 3, 0)), Some("Dirt"));
        let deep = world.surface().chunk(ChunkPos::new(0, 0, -25)).expect("allocated");
        assert!(deep.palette().iter().any(|name| name == "Stone"));
        assert!(!deep.palette().iter().any(|name| name == "Dirt"));
    }
}
