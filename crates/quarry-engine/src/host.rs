//! Headless world host: opens the configured world, prepares the spawn
//! area and keeps the world saved until shutdown.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use quarry_common::{SpatialPos, WorldResult};
use quarry_world::{
    Catalog, PlacedVoxel, RegionBounds, RenderBridge, SaveManager, SaveOutcome, StructureTemplate,
    World,
};
use tracing::{debug, info, warn};

use crate::autosave::AutoSaveTimer;
use crate::config::EngineConfig;

/// Longest sleep between auto-save checks.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Render bridge for headless runs: counts what would be drawn.
#[derive(Debug, Default)]
pub struct LogBridge {
    /// Voxels handed over
    pub voxels: usize,
    /// Regions cleared
    pub regions: usize,
}

impl RenderBridge for LogBridge {
    fn load_voxels(&mut self, voxels: &[PlacedVoxel]) -> WorldResult<()> {
        self.voxels += voxels.len();
        debug!("Render bridge received {} voxels", voxels.len());
        Ok(())
    }

    fn clear_region(&mut self, bounds: RegionBounds) -> WorldResult<()> {
        self.regions += 1;
        debug!("Render bridge cleared {:?} +/- {:?}", bounds.center, bounds.extent);
        Ok(())
    }
}

/// Loads the catalog and the saved surface named by the configuration.
pub fn open_world(config: &EngineConfig) -> Result<(World, SaveManager)> {
    let catalog = Catalog::load(&config.catalog_path)
        .with_context(|| format!("loading catalog {}", config.catalog_path.display()))?;
    if !catalog.contains(&config.default_solid_block) {
        warn!(
            "Default solid block '{}' is not in the catalog",
            config.default_solid_block
        );
    }

    let manager = SaveManager::new(&config.save_dir);
    let surface = manager
        .store()
        .load_surface(config.surface_settings()?, Arc::new(catalog))
        .with_context(|| format!("loading surface '{}'", config.world_name))?;
    let world = World::new(surface).with_default_solid(config.default_solid_block.clone());
    Ok((world, manager))
}

/// Generates the spawn area, stamps the spawn structure on a fresh world
/// and pushes the area through the render bridge. Returns the number of
/// voxels handed to the bridge.
pub fn prepare_spawn(world: &mut World, config: &EngineConfig, bridge: &mut dyn RenderBridge) -> Result<usize> {
    let spawn = SpatialPos::from(config.spawn_position);
    let radius = config.spawn_radius_chunks;
    let report = world.generate_around(spawn, radius)?;
    info!(
        "Spawn area ready: {} chunks generated, {} loaded",
        report.generated, report.skipped
    );

    if report.generated > 0 {
        place_spawn_structure(world, config, spawn)?;
    }

    let grid = *world.surface().grid();
    let r = i64::from(radius);
    let center = grid.spatial_to_chunk(spawn);
    let min = grid.chunk_origin(center.offset(-r, -r, -r));
    let [cx, cy, cz] = grid.chunk_size.to_array().map(i64::from);
    let max = grid.chunk_origin(center.offset(r, r, r)).offset(cx - 1, cy - 1, cz - 1);
    Ok(world.refresh_region(bridge, min, max)?)
}

fn place_spawn_structure(world: &mut World, config: &EngineConfig, spawn: SpatialPos) -> Result<()> {
    let (Some(path), Some(name)) = (&config.structures_path, &config.spawn_structure) else {
        return Ok(());
    };
    let document = fs::read_to_string(path)
        .with_context(|| format!("reading structures {}", path.display()))?;
    let library = StructureTemplate::parse_library(&document)?;
    match library.get(name) {
        Some(template) => {
            world.place_structure(template, spawn)?;
        },
        None => warn!("Spawn structure '{}' is not in {}", name, path.display()),
    }
    Ok(())
}

fn save(world: &mut World, manager: &SaveManager) -> Result<()> {
    match world.save(manager)? {
        SaveOutcome::Saved(report) => debug!("Saved: {:?}", report),
        SaveOutcome::Skipped => debug!("Save skipped, another save is running"),
    }
    Ok(())
}

/// Runs the host until the configured duration elapses, saving on the
/// auto-save interval and once more on exit.
pub fn run(config: &EngineConfig) -> Result<()> {
    let (mut world, manager) = open_world(config)?;
    let mut bridge = LogBridge::default();
    prepare_spawn(&mut world, config, &mut bridge)?;
    info!(
        "World '{}' ready with {} sections ({} voxels visible near spawn)",
        config.world_name,
        world.surface().section_count(),
        bridge.voxels
    );

    let start = Instant::now();
    let deadline = start + Duration::from_secs(u64::from(config.run_duration));
    let mut timer = AutoSaveTimer::new(config.auto_save_interval, start);
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if timer.is_due(now) {
            save(&mut world, &manager)?;
            timer.mark_saved(now);
        }
        let wait = timer
            .time_until_next_save(now)
            .unwrap_or(POLL_INTERVAL)
            .min(deadline - now)
            .min(POLL_INTERVAL);
        thread::sleep(wait);
    }

    save(&mut world, &manager)?;
    info!("World '{}' saved, shutting down", config.world_name);
    Ok(())
}
