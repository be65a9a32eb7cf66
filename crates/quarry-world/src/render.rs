//! Hand-off from the voxel store to a renderer.
//!
//! The store never draws anything. It selects the voxels a viewer could see
//! (non-Air with at least one face open to Air or to unallocated space) and
//! pushes them through a [`RenderBridge`] together with the world-space
//! bounds of the region being replaced.

use quarry_common::{Spatial, SpatialPos, WorldPos, WorldResult};
use serde_json::{Map, Value};
use tracing::debug;

use crate::catalog::AIR;
use crate::surface::Surface;

const FACE_NEIGHBOURS: [[i64; 3]; 6] = [
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
];

/// A voxel ready to be drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedVoxel {
    /// World-space centre
    pub position: WorldPos,
    /// Voxel coordinate
    pub spatial: SpatialPos,
    /// Block name
    pub block: String,
    /// Whether the block asks to be drawn
    pub visibility: bool,
    /// Opaque visual attributes from the catalog
    pub visual: Map<String, Value>,
}

/// Axis-aligned world-space box, as a centre and half-extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionBounds {
    /// Box centre
    pub center: WorldPos,
    /// Half size on each axis
    pub extent: [f64; 3],
}

/// Receives voxels from the store.
///
/// Implemented by whatever owns the scene; the store only calls it.
pub trait RenderBridge {
    /// Adds voxels to the scene.
    fn load_voxels(&mut self, voxels: &[PlacedVoxel]) -> WorldResult<()>;

    /// Removes everything inside `bounds` from the scene.
    fn clear_region(&mut self, bounds: RegionBounds) -> WorldResult<()>;
}

/// Bridge that keeps every call, for tools and tests.
#[derive(Debug, Default)]
pub struct RecordingBridge {
    /// Voxels loaded, in call order
    pub loaded: Vec<PlacedVoxel>,
    /// Regions cleared, in call order
    pub cleared: Vec<RegionBounds>,
}

impl RecordingBridge {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderBridge for RecordingBridge {
    fn load_voxels(&mut self, voxels: &[PlacedVoxel]) -> WorldResult<()> {
        self.loaded.extend_from_slice(voxels);
        Ok(())
    }

    fn clear_region(&mut self, bounds: RegionBounds) -> WorldResult<()> {
        self.cleared.push(bounds);
        Ok(())
    }
}

/// Orders two corners into (min, max).
fn normalize(a: SpatialPos, b: SpatialPos) -> (SpatialPos, SpatialPos) {
    (
        SpatialPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
        SpatialPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
    )
}

fn is_open(surface: &Surface, spatial: SpatialPos) -> bool {
    surface.block_name(spatial).map_or(true, |name| name == AIR)
}

/// Returns every non-Air voxel in the inclusive box with at least one face
/// neighbour that is Air or unallocated. Names unknown to the catalog are
/// skipped.
#[must_use]
pub fn exposed_voxels(surface: &Surface, min: SpatialPos, max: SpatialPos) -> Vec<PlacedVoxel> {
    let (min, max) = normalize(min, max);
    let spatial_layout = surface.spatial();
    let mut voxels = Vec::new();
    for z in min.z..=max.z {
        for y in min.y..=max.y {
            for x in min.x..=max.x {
                let spatial = SpatialPos::new(x, y, z);
                let Some(name) = surface.block_name(spatial) else {
                    continue;
                };
                if name == AIR {
                    continue;
                }
                let exposed = FACE_NEIGHBOURS
                    .iter()
                    .any(|&[dx, dy, dz]| is_open(surface, spatial.offset(dx, dy, dz)));
                if !exposed {
                    continue;
                }
                let Some(block) = surface.catalog().get(name) else {
                    debug!("Skipping unknown block '{}' at {}", name, spatial);
                    continue;
                };
                voxels.push(PlacedVoxel {
                    position: spatial_layout.spatial_to_world(spatial),
                    spatial,
                    block: block.name.clone(),
                    visibility: block.visibility,
                    visual: block.visual.clone(),
                });
            }
        }
    }
    voxels
}

/// World-space bounds covering the inclusive voxel box.
#[must_use]
pub fn region_bounds(spatial: &Spatial, min: SpatialPos, max: SpatialPos) -> RegionBounds {
    let (min, max) = normalize(min, max);
    let block = spatial.block_size.to_f64_array();
    let offset = spatial.offset.to_array();
    let (lo, hi) = (min.to_array(), max.to_array());
    let mut center = [0.0; 3];
    let mut extent = [0.0; 3];
    for axis in 0..3 {
        let start = lo[axis] as f64 * block[axis];
        let end = (hi[axis] + 1) as f64 * block[axis];
        center[axis] = offset[axis] + (start + end) / 2.0;
        extent[axis] = (end - start) / 2.0;
    }
    RegionBounds {
        center: WorldPos::from(center),
        extent,
    }
}

/// Replaces a region in the scene after the box changed.
///
/// The box is grown by one voxel on every side, since a change can expose
/// or hide its neighbours. Returns the number of voxels loaded.
pub fn refresh_region(
    surface: &Surface,
    bridge: &mut dyn RenderBridge,
    min: SpatialPos,
    max: SpatialPos,
) -> WorldResult<usize> {
    let (min, max) = normalize(min, max);
    let (min, max) = (min.offset(-1, -1, -1), max.offset(1, 1, 1));
    bridge.clear_region(region_bounds(surface.spatial(), min, max))?;
    let voxels = exposed_voxels(surface, min, max);
    bridge.load_voxels(&voxels)?;
    debug!("Refreshed {} voxels between {} and {}", voxels.len(), min, max);
    Ok(voxels.len())
}

#[cfg(test)]
mod tests {
    use quarry_common::ChunkPos;

    use super::*;
    use crate::surface::tests::test_surface;

    fn fill_chunk(surface: &mut Surface, name: &str) {
        surface.add_chunk(ChunkPos::new(0, 0, 0));
        for z in 0..16 {
            for y in 0..16 {
                for x in 0..16 {
                    surface
                        .set_block(SpatialPos::new(x, y, z), name)
                        .expect("allocated chunk");
                }
            }
        }
    }

    #[test]
    fn test_solid_chunk_exposes_only_its_shell() {
        let mut surface = test_surface();
        fill_chunk(&mut surface, "Stone");
        let voxels = exposed_voxels(&surface, SpatialPos::new(0, 0, 0), SpatialPos::new(15, 15, 15));
        // 16^3 minus the hidden 14^3 core
        assert_eq!(voxels.len(), 4096 - 2744);
        assert!(voxels.iter().all(|v| v.block == "Stone"));
    }

    #[test]
    fn test_air_pocket_exposes_neighbours() {
        let mut surface = test_surface();
        fill_chunk(&mut surface, "Stone");
        let hole = SpatialPos::new(8, 8, 8);
        surface.set_block(hole, AIR).expect("allocated chunk");

        let voxels = exposed_voxels(&surface, SpatialPos::new(7, 7, 7), SpatialPos::new(9, 9, 9));
        let mut found: Vec<_> = voxels.iter().map(|v| v.spatial).collect();
        found.sort();
        let mut expected: Vec<_> = FACE_NEIGHBOURS
            .iter()
            .map(|&[dx, dy, dz]| hole.offset(dx, dy, dz))
            .collect();
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_region_bounds() {
        let spatial = Spatial::default();
        let bounds = region_bounds(&spatial, SpatialPos::new(1, 0, -1), SpatialPos::new(0, 0, 0));
        assert_eq!(bounds.center, WorldPos::new(32.0, 16.0, 0.0));
        assert_eq!(bounds.extent, [32.0, 16.0, 32.0]);
    }

    #[test]
    fn test_refresh_clears_then_loads() {
        let mut surface = test_surface();
        surface.add_chunk(ChunkPos::new(0, 0, 0));
        let pos = SpatialPos::new(3, 3, 3);
        surface.set_block(pos, "Dirt").expect("allocated chunk");

        let mut bridge = RecordingBridge::new();
        let loaded = refresh_region(&surface, &mut bridge, pos, pos).expect("bridge accepts");
        assert_eq!(loaded, 1);
        assert_eq!(bridge.cleared.len(), 1);
        assert_eq!(bridge.cleared[0].extent, [48.0, 48.0, 48.0]);
        assert_eq!(bridge.loaded[0].position, WorldPos::new(112.0, 112.0, 112.0));
    }
}
