//! High-level world API.
//!
//! A [`World`] owns one surface together with its terrain generator and
//! mining effects, generating chunks on demand for the operations that
//! need them.

use std::collections::BTreeMap;

use quarry_common::{ChunkPos, SpatialPos, WorldError, WorldPos, WorldResult};
use serde::Deserialize;
use tracing::{debug, info};

use crate::catalog::{Block, AIR};
use crate::codec::is_codec_safe_name;
use crate::effects::{EffectRegistry, HitOutcome, Loot, MiningContext};
use crate::generator::{ChunkGeneration, GenerationMode, GenerationReport, TerrainGenerator};
use crate::persistence::{SaveManager, SaveOutcome};
use crate::raycast::spatial_dda_raycast;
use crate::render::{self, PlacedVoxel, RenderBridge};
use crate::section::Structure;
use crate::surface::{Surface, VoxelAddress};

/// Block assumed when a ray hits a voxel whose name the catalog lacks.
pub const DEFAULT_SOLID_BLOCK: &str = "Dirt";

/// A block pattern that can be stamped into the world.
///
/// `data` is indexed `[z][y][x]` into `palette`; `bounds` is `[x, y, z]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StructureTemplate {
    /// Template name, recorded in the owning section
    #[serde(default)]
    pub name: String,
    /// Size on each axis
    pub bounds: [u32; 3],
    /// Block names
    pub palette: Vec<String>,
    /// Palette indices
    pub data: Vec<Vec<Vec<u8>>>,
}

impl StructureTemplate {
    /// Parses a JSON object of templates keyed by name.
    pub fn parse_library(document: &str) -> WorldResult<BTreeMap<String, Self>> {
        let mut library: BTreeMap<String, Self> = serde_json::from_str(document)
            .map_err(|e| WorldError::Catalog(format!("structure library: {e}")))?;
        for (name, template) in &mut library {
            if template.name.is_empty() {
                template.name.clone_from(name);
            }
            template.validate()?;
        }
        Ok(library)
    }

    /// Checks the data against the bounds and the palette.
    pub fn validate(&self) -> WorldResult<()> {
        let [bx, by, bz] = self.bounds;
        let bad = |what: String| WorldError::Catalog(format!("structure '{}': {what}", self.name));
        if !is_codec_safe_name(&self.name) {
            return Err(bad("name cannot be stored in a snapshot".to_string()));
        }
        if let Some(name) = self.palette.iter().find(|name| !is_codec_safe_name(name)) {
            return Err(bad(format!("palette name '{name}' cannot be stored in a snapshot")));
        }
        if bx == 0 || by == 0 || bz == 0 {
            return Err(bad(format!("empty bounds {:?}", self.bounds)));
        }
        if self.data.len() != bz as usize {
            return Err(bad(format!("{} layers, expected {bz}", self.data.len())));
        }
        for (z, layer) in self.data.iter().enumerate() {
            if layer.len() != by as usize {
                return Err(bad(format!("layer {z} has {} rows, expected {by}", layer.len())));
            }
            for (y, row) in layer.iter().enumerate() {
                if row.len() != bx as usize {
                    return Err(bad(format!("row {z}/{y} has {} cells, expected {bx}", row.len())));
                }
                if let Some(index) = row.iter().find(|&&i| usize::from(i) >= self.palette.len()) {
                    return Err(bad(format!("palette index {index} out of range")));
                }
            }
        }
        Ok(())
    }

    /// Every `(offset, block)` pair of the template. Cells whose index
    /// falls outside the palette are skipped.
    pub fn cells(&self) -> impl Iterator<Item = ([i64; 3], &str)> + '_ {
        self.data.iter().enumerate().flat_map(move |(z, layer)| {
            layer.iter().enumerate().flat_map(move |(y, row)| {
                row.iter().enumerate().filter_map(move |(x, &index)| {
                    let name = self.palette.get(usize::from(index))?;
                    Some(([x as i64, y as i64, z as i64], name.as_str()))
                })
            })
        })
    }
}

/// Result of digging a box.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigReport {
    /// Mineable voxels hit
    pub hit: usize,
    /// Voxels mined
    pub mined: Vec<SpatialPos>,
    /// Items gained
    pub loot: Loot,
    /// Outcome at the centre voxel
    pub center: Option<HitOutcome>,
}

/// One surface with its generator and mining effects.
#[derive(Debug)]
pub struct World {
    surface: Surface,
    generator: TerrainGenerator,
    effects: EffectRegistry,
    default_solid: String,
}

impl World {
    /// Wraps a surface, building its generator from the surface catalog.
    pub fn new(surface: Surface) -> Self {
        let generator = TerrainGenerator::for_surface(&surface);
        Self {
            surface,
            generator,
            effects: EffectRegistry::new(),
            default_solid: DEFAULT_SOLID_BLOCK.to_string(),
        }
    }

    /// Replaces the mining effects.
    #[must_use]
    pub fn with_effects(mut self, effects: EffectRegistry) -> Self {
        self.effects = effects;
        self
    }

    /// Replaces the block assumed for unresolvable ray hits.
    #[must_use]
    pub fn with_default_solid(mut self, name: impl Into<String>) -> Self {
        self.default_solid = name.into();
        self
    }

    /// The surface.
    #[must_use]
    pub const fn surface(&self) -> &Surface {
        &self.surface
    }

    /// The surface, mutably.
    pub fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }

    /// Unwraps the surface.
    #[must_use]
    pub fn into_surface(self) -> Surface {
        self.surface
    }

    /// The terrain generator.
    #[must_use]
    pub const fn generator(&self) -> &TerrainGenerator {
        &self.generator
    }

    /// The mining effects, for registering custom ones.
    pub fn effects_mut(&mut self) -> &mut EffectRegistry {
        &mut self.effects
    }

    /// Block at a voxel. Never generates.
    #[must_use]
    pub fn get_block(&self, spatial: SpatialPos) -> Option<&Block> {
        self.surface.get_block(spatial)
    }

    /// Writes a block, generating its chunk first if needed.
    pub fn set_block(&mut self, spatial: SpatialPos, name: &str) -> WorldResult<()> {
        let chunk = self.surface.grid().spatial_to_chunk(spatial);
        self.ensure_chunk(chunk)?;
        self.surface.set_block(spatial, name)
    }

    /// Generates a chunk unless it is allocated. Returns true if it was
    /// generated.
    pub fn ensure_chunk(&mut self, chunk: ChunkPos) -> WorldResult<bool> {
        if self.surface.has_chunk(chunk) {
            return Ok(false);
        }
        let outcome = self.generate_chunk(chunk, GenerationMode::Lenient)?;
        Ok(outcome == ChunkGeneration::Generated)
    }

    /// Generates one chunk.
    pub fn generate_chunk(&mut self, chunk: ChunkPos, mode: GenerationMode) -> WorldResult<ChunkGeneration> {
        self.generator.generate_chunk(&mut self.surface, chunk, mode)
    }

    /// Generates every missing chunk in an inclusive chunk box.
    pub fn generate_region(&mut self, min: ChunkPos, max: ChunkPos) -> WorldResult<GenerationReport> {
        self.generator.generate_region(&mut self.surface, min, max)
    }

    /// Generates the chunks within `radius` chunks of a voxel.
    pub fn generate_around(&mut self, center: SpatialPos, radius: u32) -> WorldResult<GenerationReport> {
        let chunk = self.surface.grid().spatial_to_chunk(center);
        let r = i64::from(radius);
        self.generate_region(chunk.offset(-r, -r, -r), chunk.offset(r, r, r))
    }

    /// Generates every chunk overlapping the inclusive voxel box.
    fn generate_covering(&mut self, min: SpatialPos, max: SpatialPos) -> WorldResult<GenerationReport> {
        let grid = *self.surface.grid();
        self.generate_region(grid.spatial_to_chunk(min), grid.spatial_to_chunk(max))
    }

    /// World-space centres of the cells along a ray.
    #[must_use]
    pub fn raycast(&self, start: WorldPos, rotation_deg: [f64; 3], max_distance: f64) -> Vec<WorldPos> {
        spatial_dda_raycast(start, rotation_deg, max_distance, self.surface.spatial())
    }

    /// First solid voxel along a ray, skipping unallocated chunks.
    #[must_use]
    pub fn pick_target(&self, start: WorldPos, rotation_deg: [f64; 3], max_distance: f64) -> Option<VoxelAddress> {
        let cells = self.raycast(start, rotation_deg, max_distance);
        self.surface.find_solid(&cells, &self.default_solid)
    }

    /// Hits one voxel with the block's mining effects.
    pub fn hit_block(&mut self, spatial: SpatialPos, mining: MiningContext) -> WorldResult<HitOutcome> {
        self.surface.hit_block(spatial, mining, &mut self.effects)
    }

    /// Hits every voxel within `extent` of `center` on each axis, generating
    /// the surrounding chunks first.
    pub fn dig_cubic(&mut self, center: SpatialPos, extent: [u32; 3], mining: MiningContext) -> WorldResult<DigReport> {
        let [ex, ey, ez] = extent.map(i64::from);
        self.generate_covering(
            center.offset(-(ex + 1), -(ey + 1), -(ez + 1)),
            center.offset(ex + 1, ey + 1, ez + 1),
        )?;

        let mut report = DigReport::default();
        for z in -ez..=ez {
            for y in -ey..=ey {
                for x in -ex..=ex {
                    let pos = center.offset(x, y, z);
                    let outcome = self.hit_block(pos, mining)?;
                    match &outcome {
                        HitOutcome::Ignored => {}
                        HitOutcome::Mined { loot, .. } => {
                            report.hit += 1;
                            report.mined.push(pos);
                            for (item, amount) in loot {
                                *report.loot.entry(item.clone()).or_default() += amount;
                            }
                        }
                        HitOutcome::Underleveled { .. } | HitOutcome::Damaged { .. } => report.hit += 1,
                    }
                    if pos == center {
                        report.center = Some(outcome);
                    }
                }
            }
        }
        debug!("Dug around {}: {} hit, {} mined", center, report.hit, report.mined.len());
        Ok(report)
    }

    /// Stamps a template with its minimum corner at `origin`, generating the
    /// surrounding chunks first, and records it in the origin's section.
    /// Returns the number of voxels written. Nothing is written if the
    /// template is invalid or names a block the catalog lacks.
    pub fn place_structure(&mut self, template: &StructureTemplate, origin: SpatialPos) -> WorldResult<usize> {
        template.validate()?;
        if let Some(unknown) = template
            .palette
            .iter()
            .find(|name| !self.surface.catalog().contains(name))
        {
            return Err(WorldError::UnknownBlock(unknown.clone()));
        }

        let chunk_size = self.surface.grid().chunk_size.to_array().map(i64::from);
        let bounds = template.bounds.map(i64::from);
        self.generate_covering(
            origin.offset(-chunk_size[0], -chunk_size[1], -chunk_size[2]),
            origin.offset(
                bounds[0] + chunk_size[0],
                bounds[1] + chunk_size[1],
                bounds[2] + chunk_size[2],
            ),
        )?;

        let mut written = 0;
        for ([x, y, z], name) in template.cells() {
            let pos = origin.offset(x, y, z);
            let chunk = self.surface.grid().spatial_to_chunk(pos);
            self.ensure_chunk(chunk)?;
            self.surface.set_block(pos, name)?;
            written += 1;
        }

        let section = self.surface.grid().spatial_to_section(origin);
        if let Some(section) = self.surface.section_mut(section) {
            section.insert_structure(
                origin,
                Structure {
                    template: template.name.clone(),
                },
            );
        }
        info!("Placed structure '{}' at {}", template.name, origin);
        Ok(written)
    }

    /// Surface-exposed voxels in an inclusive box.
    #[must_use]
    pub fn exposed_voxels(&self, min: SpatialPos, max: SpatialPos) -> Vec<PlacedVoxel> {
        render::exposed_voxels(&self.surface, min, max)
    }

    /// Re-sends a changed box, and its neighbours, to a renderer.
    pub fn refresh_region(&self, bridge: &mut dyn RenderBridge, min: SpatialPos, max: SpatialPos) -> WorldResult<usize> {
        render::refresh_region(&self.surface, bridge, min, max)
    }

    /// Saves pending changes unless another save is running.
    pub fn save(&mut self, manager: &SaveManager) -> WorldResult<SaveOutcome> {
        manager.save(&mut self.surface)
    }

    /// Returns true if the voxel holds Air or is unallocated.
    #[must_use]
    pub fn is_open(&self, spatial: SpatialPos) -> bool {
        self.surface.block_name(spatial).map_or(true, |name| name == AIR)
    }
}
