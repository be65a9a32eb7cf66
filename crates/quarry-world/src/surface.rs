//! The sparse voxel store of one surface (a named world).
//!
//! A surface owns its geometry, its seed and PRNG, and the sparse map of
//! sections. Sections and chunks are allocated lazily and removed only on
//! request. Every structural change marks the owning section modified;
//! persistence writes exactly those sections.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use quarry_common::{
    ChunkPos, Grid, LocalPos, SectionPos, Size3, Spatial, SpatialPos, WorldError, WorldPos,
    WorldResult,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Block, BlockFlag, Catalog};
use crate::chunk::{BlockState, Chunk};
use crate::section::Section;

/// Geometry and identity of a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSettings {
    /// Surface name; also its snapshot directory
    pub name: String,
    /// World seed
    pub seed: u64,
    /// Voxel size and world offset
    pub spatial: Spatial,
    /// Chunk and section sizes
    pub grid: Grid,
}

impl SurfaceSettings {
    /// Settings with default geometry.
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            seed,
            spatial: Spatial::default(),
            grid: Grid::default(),
        }
    }

    /// Replaces the chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: Size3) -> Self {
        self.grid.chunk_size = chunk_size;
        self
    }

    /// Replaces the section size.
    #[must_use]
    pub const fn with_section_size(mut self, section_size: Size3) -> Self {
        self.grid.section_size = section_size;
        self
    }
}

/// Every address of a voxel, from absolute to chunk-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelAddress {
    /// Absolute voxel
    pub spatial: SpatialPos,
    /// Absolute chunk
    pub chunk: ChunkPos,
    /// Owning section
    pub section: SectionPos,
    /// Chunk relative to its section
    pub relative_chunk: ChunkPos,
    /// Voxel relative to its chunk
    pub local: LocalPos,
}

/// Sections written and removed since the last successful save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    /// Sections to (re)write
    pub written: Vec<SectionPos>,
    /// Sections whose snapshot must be deleted
    pub removed: Vec<SectionPos>,
}

impl PendingChanges {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }
}

/// A named, infinite, lazily allocated voxel world.
#[derive(Debug)]
pub struct Surface {
    settings: SurfaceSettings,
    catalog: Arc<Catalog>,
    sections: BTreeMap<SectionPos, Section>,
    modified_sections: BTreeSet<SectionPos>,
    removed_sections: BTreeSet<SectionPos>,
    modified: bool,
    rng: fastrand::Rng,
}

impl Surface {
    /// Creates an empty surface. The PRNG is seeded from the settings.
    pub fn new(settings: SurfaceSettings, catalog: Arc<Catalog>) -> Self {
        let rng = fastrand::Rng::with_seed(settings.seed);
        Self {
            settings,
            catalog,
            sections: BTreeMap::new(),
            modified_sections: BTreeSet::new(),
            removed_sections: BTreeSet::new(),
            modified: true,
            rng,
        }
    }

    /// Surface name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.settings.seed
    }

    /// Geometry and identity.
    #[must_use]
    pub const fn settings(&self) -> &SurfaceSettings {
        &self.settings
    }

    /// Voxel size and world offset.
    #[must_use]
    pub const fn spatial(&self) -> &Spatial {
        &self.settings.spatial
    }

    /// Chunk and section geometry.
    #[must_use]
    pub const fn grid(&self) -> &Grid {
        &self.settings.grid
    }

    /// Block catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Resolves every address of a voxel.
    #[must_use]
    pub const fn address(&self, spatial: SpatialPos) -> VoxelAddress {
        let grid = &self.settings.grid;
        let chunk = grid.spatial_to_chunk(spatial);
        VoxelAddress {
            spatial,
            chunk,
            section: grid.chunk_to_section(chunk),
            relative_chunk: grid.chunk_to_relative(chunk),
            local: grid.spatial_to_relative(spatial),
        }
    }

    /// Section at a section position.
    #[must_use]
    pub fn section(&self, pos: SectionPos) -> Option<&Section> {
        self.sections.get(&pos)
    }

    /// Sections in position order.
    pub fn sections(&self) -> impl Iterator<Item = (&SectionPos, &Section)> {
        self.sections.iter()
    }

    /// Number of allocated sections.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Chunk at an absolute chunk position.
    #[must_use]
    pub fn chunk(&self, chunk: ChunkPos) -> Option<&Chunk> {
        let grid = &self.settings.grid;
        self.sections
            .get(&grid.chunk_to_section(chunk))?
            .chunk(grid.chunk_to_relative(chunk))
    }

    /// Mutable chunk at an absolute chunk position. Marks its section modified.
    pub fn chunk_mut(&mut self, chunk: ChunkPos) -> Option<&mut Chunk> {
        let section = self.settings.grid.chunk_to_section(chunk);
        let rel = self.settings.grid.chunk_to_relative(chunk);
        if !self.sections.get(&section)?.contains_chunk(rel) {
            return None;
        }
        self.mark_modified(section);
        self.sections.get_mut(&section)?.chunk_mut(rel)
    }

    /// Returns true if the chunk is allocated.
    #[must_use]
    pub fn has_chunk(&self, chunk: ChunkPos) -> bool {
        self.chunk(chunk).is_some()
    }

    /// Allocates an empty section. Returns false if it already existed.
    pub fn add_section(&mut self, pos: SectionPos) -> bool {
        if self.sections.contains_key(&pos) {
            return false;
        }
        self.sections.insert(pos, Section::new());
        self.mark_modified(pos);
        debug!("Added section [{pos}] to {}", self.settings.name);
        true
    }

    /// Removes a section and all its chunks.
    pub fn remove_section(&mut self, pos: SectionPos) -> Option<Section> {
        let section = self.sections.remove(&pos)?;
        self.modified_sections.remove(&pos);
        self.removed_sections.insert(pos);
        self.modified = true;
        debug!("Removed section [{pos}] from {}", self.settings.name);
        Some(section)
    }

    /// Allocates an all-Air chunk, creating its section when absent.
    /// Returns false (and changes nothing) if the chunk already existed.
    pub fn add_chunk(&mut self, chunk: ChunkPos) -> bool {
        let section_pos = self.settings.grid.chunk_to_section(chunk);
        let rel = self.settings.grid.chunk_to_relative(chunk);
        let volume = self.settings.grid.chunk_volume();
        let section = self.sections.entry(section_pos).or_default();
        if section.contains_chunk(rel) {
            return false;
        }
        section.insert_chunk(rel, Chunk::new(volume));
        self.mark_modified(section_pos);
        true
    }

    /// Removes a chunk. The (possibly empty) section stays allocated.
    pub fn remove_chunk(&mut self, chunk: ChunkPos) -> Option<Chunk> {
        let section_pos = self.settings.grid.chunk_to_section(chunk);
        let rel = self.settings.grid.chunk_to_relative(chunk);
        let removed = self.sections.get_mut(&section_pos)?.remove_chunk(rel)?;
        self.mark_modified(section_pos);
        Some(removed)
    }

    /// Name stored at a voxel. Never allocates.
    #[must_use]
    pub fn block_name(&self, spatial: SpatialPos) -> Option<&str> {
        let address = self.address(spatial);
        let chunk = self.chunk(address.chunk)?;
        let index = self.settings.grid.flatten(address.local).ok()?;
        chunk.name_at(index)
    }

    /// Block stored at a voxel. `None` if the chunk is unallocated or the
    /// stored name is not in the catalog. Never allocates.
    #[must_use]
    pub fn get_block(&self, spatial: SpatialPos) -> Option<&Block> {
        self.catalog.get(self.block_name(spatial)?)
    }

    /// Writes a block into an allocated chunk. The overlay entry of the
    /// written voxel is cleared. Fails without side effects on an unknown
    /// name, an unallocated chunk or a full palette.
    pub fn set_block(&mut self, spatial: SpatialPos, name: &str) -> WorldResult<()> {
        if !self.catalog.contains(name) {
            return Err(WorldError::UnknownBlock(name.to_string()));
        }
        let address = self.address(spatial);
        let index = self.settings.grid.flatten(address.local)?;
        let section = self
            .sections
            .get_mut(&address.section)
            .ok_or(WorldError::MissingSection {
                section: address.section,
            })?;
        let chunk = section
            .chunk_mut(address.relative_chunk)
            .ok_or(WorldError::MissingChunk {
                section: address.section,
                chunk: address.relative_chunk,
            })?;
        let palette_index = chunk
            .ensure_palette_entry(name)
            .ok_or_else(|| WorldError::PaletteFull {
                chunk: address.chunk,
                len: chunk.palette().len(),
            })?;
        chunk.set_index(index, palette_index)?;
        chunk.clear_state(address.local);
        self.mark_modified(address.section);
        Ok(())
    }

    /// Overlay state of a voxel.
    #[must_use]
    pub fn block_state(&self, spatial: SpatialPos) -> Option<&BlockState> {
        let address = self.address(spatial);
        self.chunk(address.chunk)?.state(address.local)
    }

    /// Overlay state of a voxel, created empty when missing. Marks the
    /// section modified.
    pub fn block_state_mut(&mut self, spatial: SpatialPos) -> WorldResult<&mut BlockState> {
        let address = self.address(spatial);
        if !self.sections.contains_key(&address.section) {
            return Err(WorldError::MissingSection {
                section: address.section,
            });
        }
        let chunk = self
            .chunk_mut(address.chunk)
            .ok_or(WorldError::MissingChunk {
                section: address.section,
                chunk: address.relative_chunk,
            })?;
        Ok(chunk.state_mut(address.local))
    }

    /// Draws the next value of the surface PRNG, in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        self.rng.f64()
    }

    /// Splits the borrow of a chunk and the surface PRNG for generation.
    pub(crate) fn chunk_and_rng_mut(
        &mut self,
        chunk: ChunkPos,
    ) -> Option<(&mut Chunk, &mut fastrand::Rng)> {
        let section_pos = self.settings.grid.chunk_to_section(chunk);
        let rel = self.settings.grid.chunk_to_relative(chunk);
        let chunk = self.sections.get_mut(&section_pos)?.chunk_mut(rel)?;
        self.modified_sections.insert(section_pos);
        self.removed_sections.remove(&section_pos);
        self.modified = true;
        Some((chunk, &mut self.rng))
    }

    /// Walks world-space candidates and returns the first voxel whose chunk
    /// is allocated and whose block is solid (lacks `no_generate`). Names the
    /// catalog does not know resolve to `fallback`.
    #[must_use]
    pub fn find_solid(&self, candidates: &[WorldPos], fallback: &str) -> Option<VoxelAddress> {
        candidates.iter().find_map(|&world| {
            let spatial = self.settings.spatial.world_to_spatial(world);
            let address = self.address(spatial);
            if !self.has_chunk(address.chunk) {
                return None;
            }
            let block = self.get_block(spatial).or_else(|| self.catalog.get(fallback));
            if block.is_some_and(|b| b.has_flag(BlockFlag::NoGenerate)) {
                None
            } else {
                Some(address)
            }
        })
    }

    /// Marks a section, and the surface, modified since the last save.
    pub fn mark_modified(&mut self, pos: SectionPos) {
        self.modified_sections.insert(pos);
        self.removed_sections.remove(&pos);
        self.modified = true;
    }

    /// Returns true if anything changed since the last save.
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    /// Sections changed since the last save.
    #[must_use]
    pub fn pending_changes(&self) -> PendingChanges {
        PendingChanges {
            written: self.modified_sections.iter().copied().collect(),
            removed: self.removed_sections.iter().copied().collect(),
        }
    }

    /// Clears modification tracking after a successful save.
    pub fn mark_saved(&mut self) {
        self.modified_sections.clear();
        self.removed_sections.clear();
        self.modified = false;
    }

    /// Installs a section read from a snapshot without marking it modified.
    pub(crate) fn restore_section(&mut self, pos: SectionPos, section: Section) {
        self.sections.insert(pos, section);
    }

    /// Mutable section access for structure bookkeeping.
    pub(crate) fn section_mut(&mut self, pos: SectionPos) -> Option<&mut Section> {
        if self.sections.contains_key(&pos) {
            self.mark_modified(pos);
        }
        self.sections.get_mut(&pos)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{BlockKind, AIR};

    pub(crate) fn test_catalog() -> Arc<Catalog> {
        let blocks = vec![
            Block::new(AIR, BlockKind::Static).with_flags([BlockFlag::Gas, BlockFlag::NoGenerate]),
            Block::new("Dirt", BlockKind::Static),
            Block::new("Stone", BlockKind::Static),
            Block::new("Ore_Gold", BlockKind::Static),
        ];
        Arc::new(Catalog::new(blocks).expect("valid catalog"))
    }

    pub(crate) fn test_surface() -> Surface {
        let settings = SurfaceSettings::new("Earth", 0).with_chunk_size(Size3::cube(16));
        Surface::new(settings, test_catalog())
    }

    #[test]
    fn test_get_block_never_allocates() {
        let surface = test_surface();
        assert!(surface.get_block(SpatialPos::new(5, 5, 5)).is_none());
        assert_eq!(surface.section_count(), 0);
    }

    #[test]
    fn test_set_block_on_fresh_chunk() {
        let mut surface = test_surface();
        assert!(surface.add_chunk(ChunkPos::new(0, 0, 0)));
        assert!(!surface.add_chunk(ChunkPos::new(0, 0, 0)));

        let pos = SpatialPos::new(5, 5, 5);
        assert_eq!(surface.get_block(pos).map(|b| b.name.as_str()), Some("Air"));
        surface.set_block(pos, "Dirt").expect("write succeeds");
        assert_eq!(surface.get_block(pos).map(|b| b.name.as_str()), Some("Dirt"));

        let chunk = surface.chunk(ChunkPos::new(0, 0, 0)).expect("allocated");
        assert_eq!(chunk.palette(), ["Air", "Dirt"]);
    }

    #[test]
    fn test_unknown_block_leaves_chunk_unchanged() {
        let mut surface = test_surface();
        surface.add_chunk(ChunkPos::new(0, 0, 0));
        surface.set_block(SpatialPos::new(1, 1, 1), "Stone").expect("write succeeds");
        let before = surface.chunk(ChunkPos::new(0, 0, 0)).cloned();

        let err = surface.set_block(SpatialPos::new(2, 2, 2), "Unobtainium");
        assert!(matches!(err, Err(WorldError::UnknownBlock(name)) if name == "Unobtainium"));
        assert_eq!(surface.chunk(ChunkPos::new(0, 0, 0)).cloned(), before);
    }

    #[test]
    fn test_set_block_missing_containers() {
        let mut surface = test_surface();
        let pos = SpatialPos::new(-1, 0, 0);
        assert!(matches!(
            surface.set_block(pos, "Dirt"),
            Err(WorldError::MissingSection { .. })
        ));
        surface.add_section(SectionPos::new(-1, 0, 0));
        assert!(matches!(
            surface.set_block(pos, "Dirt"),
            Err(WorldError::MissingChunk { chunk, .. }) if chunk == ChunkPos::new(7, 0, 0)
        ));
    }

    #[test]
    fn test_modification_tracking() {
        let mut surface = test_surface();
        surface.mark_saved();
        assert!(!surface.is_modified());

        surface.add_chunk(ChunkPos::new(-1, 0, 9));
        let pending = surface.pending_changes();
        assert_eq!(pending.written, vec![SectionPos::new(-1, 0, 1)]);
        assert!(surface.is_modified());

        surface.mark_saved();
        surface.remove_section(SectionPos::new(-1, 0, 1));
        let pending = surface.pending_changes();
        assert!(pending.written.is_empty());
        assert_eq!(pending.removed, vec![SectionPos::new(-1, 0, 1)]);

        // re-adding cancels the pending deletion
        surface.add_section(SectionPos::new(-1, 0, 1));
        assert!(surface.pending_changes().removed.is_empty());
    }

    #[test]
    fn test_set_block_clears_overlay_entry() {
        let mut surface = test_surface();
        surface.add_chunk(ChunkPos::new(0, 0, 0));
        let pos = SpatialPos::new(3, 0, 0);
        surface.block_state_mut(pos).expect("allocated").health = Some(2.0);
        assert!(surface.block_state(pos).is_some());
        surface.set_block(pos, "Stone").expect("write succeeds");
        assert!(surface.block_state(pos).is_none());
    }

    #[test]
    fn test_find_solid_skips_air_and_unallocated() {
        let mut surface = test_surface();
        surface.add_chunk(ChunkPos::new(0, 0, 0));
        surface.set_block(SpatialPos::new(2, 0, 0), "Stone").expect("write succeeds");
        let spatial = *surface.spatial();
        let candidates: Vec<WorldPos> = (-2..5)
            .map(|x| spatial.spatial_to_world(SpatialPos::new(x, 0, 0)))
            .collect();
        let hit = surface.find_solid(&candidates, "Dirt").expect("stone is hit");
        assert_eq!(hit.spatial, SpatialPos::new(2, 0, 0));
        assert_eq!(hit.local, LocalPos::new(2, 0, 0));
    }
}
