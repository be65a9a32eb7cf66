//! Procedural terrain generation.
//!
//! Layer rules give one base material per depth band; ore rules scatter
//! weighted inclusions inside their `[depth - extent, depth + extent]` band.
//!
//! Voxels are filled in flat index order (x fastest, then y, then z), one
//! draw from the surface PRNG per voxel plus one more whenever an ore is
//! picked. The active rule set is rebuilt each time the scan enters a new z
//! layer. Output depends on the seed and on the order chunks are generated.

use parking_lot::Mutex;
use quarry_common::{ChunkPos, WorldError, WorldResult};
use tracing::{debug, info};

use crate::catalog::{BlockFlag, Catalog, TerrainRule, AIR};
use crate::surface::Surface;

/// What to do when asked to generate a chunk that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GenerationMode {
    /// Fail with [`WorldError::AlreadyGenerated`]
    #[default]
    Safe,
    /// Leave the chunk alone and report it skipped
    Lenient,
}

/// Result of one chunk generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkGeneration {
    /// The chunk was allocated and filled
    Generated,
    /// The chunk already existed
    Skipped,
    /// Another generation run was in progress; nothing was done
    Busy,
}

/// Totals of a region generation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Chunks allocated and filled
    pub generated: usize,
    /// Chunks that already existed
    pub skipped: usize,
    /// True if the run was dropped because another was in progress
    pub busy: bool,
}

/// Rules in effect for one z layer.
#[derive(Debug, Clone, Default)]
pub struct ActiveRules<'a> {
    ores: Vec<&'a TerrainRule>,
    cumulative: Vec<f64>,
    general_abundance: f64,
    layer: Option<&'a TerrainRule>,
}

impl<'a> ActiveRules<'a> {
    /// Selects the rules active at `z_depth` from depth-sorted rule lists.
    pub fn at_depth(layers: &'a [TerrainRule], ores: &'a [TerrainRule], z_depth: i64) -> Self {
        let mut active = Self::default();
        for rule in ores.iter().filter(|rule| rule.covers(z_depth)) {
            active.general_abundance += rule.abundance;
            active.ores.push(rule);
            active.cumulative.push(active.general_abundance);
        }
        active.layer = match layers.iter().position(|rule| rule.depth > z_depth) {
            Some(0) => layers.first(),
            Some(i) => layers.get(i - 1),
            None => layers.last(),
        };
        active
    }

    /// Sum of the abundances of the active ores.
    #[must_use]
    pub const fn general_abundance(&self) -> f64 {
        self.general_abundance
    }

    /// Base block of this layer, if any layer rule exists.
    #[must_use]
    pub fn layer_block(&self) -> Option<&'a str> {
        self.layer.map(|rule| rule.block_name.as_str())
    }

    /// Active ore whose cumulative weight band contains `roll`, where `roll`
    /// is in `[0, general_abundance)`.
    #[must_use]
    pub fn ore_for_roll(&self, roll: f64) -> Option<&'a TerrainRule> {
        let index = self.cumulative.partition_point(|&weight| weight <= roll);
        self.ores
            .get(index.min(self.ores.len().saturating_sub(1)))
            .copied()
    }

    /// Picks the block for one voxel, drawing from `rng`.
    pub fn pick(&self, rng: &mut fastrand::Rng) -> &'a str {
        if rng.f64() < self.general_abundance && !self.ores.is_empty() {
            let roll = rng.f64() * self.general_abundance;
            if let Some(rule) = self.ore_for_roll(roll) {
                return &rule.block_name;
            }
        }
        self.layer_block().unwrap_or(AIR)
    }
}

/// Fills chunks of one surface from its terrain rules.
#[derive(Debug)]
pub struct TerrainGenerator {
    layers: Vec<TerrainRule>,
    ores: Vec<TerrainRule>,
    busy: Mutex<()>,
}

impl TerrainGenerator {
    /// Collects the non-gas rules of every catalog block that apply to the
    /// named surface, split into layer and ore rules, each stably sorted by
    /// ascending depth.
    pub fn new(catalog: &Catalog, surface_name: &str) -> Self {
        Self::from_rules(
            catalog
                .terrain_rules()
                .filter(|rule| !rule.has_flag(BlockFlag::Gas))
                .filter(|rule| rule.applies_to(surface_name))
                .cloned(),
        )
    }

    /// Generator for a surface's own catalog and name.
    pub fn for_surface(surface: &Surface) -> Self {
        Self::new(surface.catalog(), surface.name())
    }

    /// Builds a generator from already filtered rules.
    pub fn from_rules(rules: impl IntoIterator<Item = TerrainRule>) -> Self {
        let (mut layers, mut ores): (Vec<_>, Vec<_>) =
            rules.into_iter().partition(TerrainRule::is_layer);
        layers.sort_by_key(|rule| rule.depth);
        ores.sort_by_key(|rule| rule.depth);
        debug!("Terrain generator: {} layer rules, {} ore rules", layers.len(), ores.len());
        Self {
            layers,
            ores,
            busy: Mutex::new(()),
        }
    }

    /// Layer rules, shallowest first.
    #[must_use]
    pub fn layer_rules(&self) -> &[TerrainRule] {
        &self.layers
    }

    /// Ore rules, shallowest first.
    #[must_use]
    pub fn ore_rules(&self) -> &[TerrainRule] {
        &self.ores
    }

    /// Rules active at a depth.
    #[must_use]
    pub fn active_rules(&self, z_depth: i64) -> ActiveRules<'_> {
        ActiveRules::at_depth(&self.layers, &self.ores, z_depth)
    }

    /// Allocates and fills one chunk.
    pub fn generate_chunk(
        &self,
        surface: &mut Surface,
        chunk: ChunkPos,
        mode: GenerationMode,
    ) -> WorldResult<ChunkGeneration> {
        let Some(_guard) = self.busy.try_lock() else {
            debug!("Generation already in progress, dropping request for [{chunk}]");
            return Ok(ChunkGeneration::Busy);
        };
        self.generate_unguarded(surface, chunk, mode)
    }

    /// Generates every missing chunk in the inclusive box `[min, max]`.
    /// Existing chunks are skipped.
    pub fn generate_region(
        &self,
        surface: &mut Surface,
        min: ChunkPos,
        max: ChunkPos,
    ) -> WorldResult<GenerationReport> {
        let Some(_guard) = self.busy.try_lock() else {
            debug!("Generation already in progress, dropping region [{min}]..[{max}]");
            return Ok(GenerationReport {
                busy: true,
                ..GenerationReport::default()
            });
        };
        let mut report = GenerationReport::default();
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    let pos = ChunkPos::new(x, y, z);
                    match self.generate_unguarded(surface, pos, GenerationMode::Lenient)? {
                        ChunkGeneration::Generated => report.generated += 1,
                        ChunkGeneration::Skipped | ChunkGeneration::Busy => report.skipped += 1,
                    }
                }
            }
        }
        if report.generated > 0 {
            info!(
                "Generated {} chunks in [{min}]..[{max}] ({} already present)",
                report.generated, report.skipped
            );
        }
        Ok(report)
    }

    fn generate_unguarded(
        &self,
        surface: &mut Surface,
        chunk: ChunkPos,
        mode: GenerationMode,
    ) -> WorldResult<ChunkGeneration> {
        let section = surface.grid().chunk_to_section(chunk);
        let new_section = surface.section(section).is_none();
        if !surface.add_chunk(chunk) {
            return match mode {
                GenerationMode::Safe => Err(WorldError::AlreadyGenerated { chunk }),
                GenerationMode::Lenient => Ok(ChunkGeneration::Skipped),
            };
        }
        if let Err(err) = self.fill_chunk(surface, chunk) {
            // a half-filled chunk must not be mistaken for generated terrain
            surface.remove_chunk(chunk);
            if new_section {
                surface.remove_section(section);
            }
            return Err(err);
        }
        Ok(ChunkGeneration::Generated)
    }

    fn fill_chunk(&self, surface: &mut Surface, chunk: ChunkPos) -> WorldResult<()> {
        let size = surface.grid().chunk_size;
        let layer_len = size.x() as usize * size.y() as usize;
        let base_z = chunk.z * i64::from(size.z());

        let section = surface.grid().chunk_to_section(chunk);
        let relative = surface.grid().chunk_to_relative(chunk);

        let (target, rng) = surface
            .chunk_and_rng_mut(chunk)
            .ok_or(WorldError::MissingChunk {
                section,
                chunk: relative,
            })?;
        target.reset();

        let mut active = ActiveRules::default();
        for index in 0..target.volume() {
            if index % layer_len == 0 {
                let local_z = (index / layer_len) as i64;
                active = self.active_rules(-(base_z + local_z));
            }
            let name = active.pick(rng);
            let palette_index = target
                .ensure_palette_entry(name)
                .ok_or_else(|| WorldError::PaletteFull {
                    chunk,
                    len: target.palette().len(),
                })?;
            target.set_index(index, palette_index)?;
        }
        debug!("Generated chunk [{chunk}] with palette {:?}", target.palette());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quarry_common::{Size3, SpatialPos};

    use super::*;
    use crate::catalog::{Block, BlockFlag, BlockKind};
    use crate::surface::SurfaceSettings;

    fn catalog(rules: Vec<(&str, Vec<TerrainRule>)>) -> Arc<Catalog> {
        let mut blocks = vec![Block::new(AIR, BlockKind::Static).with_flags([BlockFlag::Gas])];
        for (name, rules) in rules {
            blocks.push(Block::new(name, BlockKind::Static).with_rules(rules));
        }
        Arc::new(Catalog::new(blocks).expect("valid catalog"))
    }

    fn surface(catalog: Arc<Catalog>, seed: u64) -> Surface {
        let settings = SurfaceSettings::new("Earth", seed).with_chunk_size(Size3::cube(16));
        Surface::new(settings, catalog)
    }

    fn layered_with_ores() -> Arc<Catalog> {
        catalog(vec![
            ("Dirt", vec![TerrainRule::layer("", 0)]),
            ("Stone", vec![TerrainRule::layer("", 10)]),
            ("Ore_Gold", vec![TerrainRule::ore("", 0.05, 12, 8)]),
            ("Ore_Coal", vec![TerrainRule::ore("", 0.2, 4, 6)]),
        ])
    }

    #[test]
    fn test_single_layer_fills_chunk() {
        let catalog = catalog(vec![("Stone", vec![TerrainRule::layer("", 0)])]);
        let mut surface = surface(catalog, 0);
        let generator = TerrainGenerator::for_surface(&surface);

        let pos = ChunkPos::new(0, 0, -1);
        let result = generator.generate_chunk(&mut surface, pos, GenerationMode::Safe);
        assert_eq!(result.ok(), Some(ChunkGeneration::Generated));

        let chunk = surface.chunk(pos).expect("allocated");
        assert_eq!(chunk.palette(), ["Air", "Stone"]);
        assert!(chunk.data().iter().all(|&i| i == 1));
        for z in -16..0 {
            for y in 0..16 {
                for x in 0..16 {
                    let block = surface.get_block(SpatialPos::new(x, y, z)).expect("generated");
                    assert_eq!(block.name, "Stone");
                }
            }
        }
    }

    #[test]
    fn test_generation_deterministic() {
        let mut a = surface(layered_with_ores(), 42);
        let mut b = surface(layered_with_ores(), 42);
        let gen_a = TerrainGenerator::for_surface(&a);
        let gen_b = TerrainGenerator::for_surface(&b);
        for pos in [ChunkPos::new(0, 0, -1), ChunkPos::new(3, -2, 0)] {
            gen_a.generate_chunk(&mut a, pos, GenerationMode::Safe).expect("generates");
            gen_b.generate_chunk(&mut b, pos, GenerationMode::Safe).expect("generates");
            assert_eq!(a.chunk(pos), b.chunk(pos));
        }
    }

    #[test]
    fn test_different_seeds_different_terrain() {
        let mut a = surface(layered_with_ores(), 42);
        let mut b = surface(layered_with_ores(), 999);
        let generator = TerrainGenerator::for_surface(&a);
        let pos = ChunkPos::new(0, 0, -1);
        generator.generate_chunk(&mut a, pos, GenerationMode::Safe).expect("generates");
        generator.generate_chunk(&mut b, pos, GenerationMode::Safe).expect("generates");
        assert_ne!(a.chunk(pos).map(|c| c.data()), b.chunk(pos).map(|c| c.data()));
    }

    #[test]
    fn test_existing_chunk_modes() {
        let mut surface = surface(layered_with_ores(), 1);
        let generator = TerrainGenerator::for_surface(&surface);
        let pos = ChunkPos::new(1, 1, 1);
        surface.add_chunk(pos);

        let safe = generator.generate_chunk(&mut surface, pos, GenerationMode::Safe);
        assert!(safe.as_ref().is_err_and(WorldError::is_already_generated));
        let lenient = generator.generate_chunk(&mut surface, pos, GenerationMode::Lenient);
        assert_eq!(lenient.ok(), Some(ChunkGeneration::Skipped));
        // the pre-allocated chunk is untouched
        assert_eq!(surface.chunk(pos).map(|c| c.palette().len()), Some(1));
    }

    #[test]
    fn test_palette_overflow_leaves_no_chunk() {
        let names: Vec<String> = (0..400).map(|i| format!("Ore{i}")).collect();
        let catalog = catalog(
            names
                .iter()
                .map(|name| (name.as_str(), vec![TerrainRule::ore("", 1.0, 0, 100)]))
                .collect(),
        );
        let mut surface = surface(catalog, 3);
        let generator = TerrainGenerator::for_surface(&surface);
        let pos = ChunkPos::new(0, 0, 0);

        let err = generator
            .generate_chunk(&mut surface, pos, GenerationMode::Safe)
            .expect_err("too many distinct blocks");
        assert!(matches!(err, WorldError::PaletteFull { .. }));
        assert!(!surface.has_chunk(pos));
        assert_eq!(surface.section_count(), 0);
    }

    #[test]
    fn test_layer_selection() {
        let catalog = catalog(vec![
            ("Dirt", vec![TerrainRule::layer("", 0)]),
            ("Stone", vec![TerrainRule::layer("", 10)]),
            ("Deepslate", vec![TerrainRule::layer("", 100)]),
        ]);
        let generator = TerrainGenerator::new(&catalog, "Earth");
        let layer = |depth| generator.active_rules(depth).layer_block();
        assert_eq!(layer(-3), Some("Dirt"));
        assert_eq!(layer(5), Some("Dirt"));
        assert_eq!(layer(10), Some("Stone"));
        assert_eq!(layer(99), Some("Stone"));
        assert_eq!(layer(500), Some("Deepslate"));
    }

    #[test]
    fn test_ore_weighting() {
        let generator = TerrainGenerator::from_rules([
            TerrainRule::ore("A", 0.1, 0, 5),
            TerrainRule::ore("Never", 0.0, 0, 5),
            TerrainRule::ore("B", 0.3, 2, 5),
            TerrainRule::ore("Deep", 1.0, 50, 1),
        ]);
        let active = generator.active_rules(1);
        assert!((active.general_abundance() - 0.4).abs() < 1e-12);
        let pick = |roll| active.ore_for_roll(roll).map(|r| r.block_name.as_str());
        assert_eq!(pick(0.0), Some("A"));
        assert_eq!(pick(0.099), Some("A"));
        assert_eq!(pick(0.1), Some("B"));
        assert_eq!(pick(0.399), Some("B"));
        assert!(generator.active_rules(20).ore_for_roll(0.0).is_none());
    }

    #[test]
    fn test_rule_filtering() {
        let mut gas = TerrainRule::ore("", 0.5, 0, 100);
        gas.flags.push(BlockFlag::Gas);
        let catalog = catalog(vec![
            ("Methane", vec![gas]),
            ("Regolith", vec![TerrainRule::layer("", 0).on_surfaces(["Moon"])]),
            ("Dirt", vec![TerrainRule::layer("", 0).on_surfaces(["*", "ignored"])]),
        ]);
        let earth = TerrainGenerator::new(&catalog, "Earth");
        assert!(earth.ore_rules().is_empty());
        assert_eq!(earth.layer_rules().len(), 1);
        let moon = TerrainGenerator::new(&catalog, "Moon");
        assert_eq!(moon.layer_rules().len(), 2);
    }

    #[test]
    fn test_no_layers_generates_air() {
        let mut surface = surface(catalog(vec![]), 7);
        let generator = TerrainGenerator::for_surface(&surface);
        let pos = ChunkPos::new(0, 0, 0);
        generator.generate_chunk(&mut surface, pos, GenerationMode::Safe).expect("generates");
        assert_eq!(surface.chunk(pos).map(|c| c.palette().to_vec()), Some(vec![AIR.to_string()]));
    }

    #[test]
    fn test_region_and_busy_guard() {
        let mut surface = surface(layered_with_ores(), 3);
        let generator = TerrainGenerator::for_surface(&surface);
        surface.add_chunk(ChunkPos::new(0, 0, 0));

        let report = generator
            .generate_region(&mut surface, ChunkPos::new(-1, 0, 0), ChunkPos::new(0, 1, 0))
            .expect("generates");
        assert_eq!(report, GenerationReport { generated: 3, skipped: 1, busy: false });

        let _held = generator.busy.try_lock();
        let report = generator
            .generate_region(&mut surface, ChunkPos::new(5, 5, 5), ChunkPos::new(5, 5, 5))
            .expect("dropped");
        assert!(report.busy);
        assert!(!surface.has_chunk(ChunkPos::new(5, 5, 5)));
        let single = generator.generate_chunk(&mut surface, ChunkPos::new(5, 5, 5), GenerationMode::Safe);
        assert_eq!(single.ok(), Some(ChunkGeneration::Busy));
    }
}
