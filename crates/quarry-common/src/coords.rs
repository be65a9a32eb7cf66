//! Coordinate spaces for world, spatial, chunk, section and local positions.
//!
//! Four nested spaces, outermost to innermost:
//! - **World**: client-render float coordinates.
//! - **Spatial**: one integer per voxel.
//! - **Chunk**: one integer per `chunk_size` block of spatial positions.
//! - **Section**: one integer per `section_size` block of chunks.
//!
//! Relative positions (a chunk inside its section, a voxel inside its chunk)
//! are always in `[0, size)` on every axis, including for negative inputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{WorldError, WorldResult};

/// Returns `x` reduced into `[0, size)`.
///
/// `x - relative(x, size)` is always an exact multiple of `size`.
#[must_use]
pub const fn relative(x: i64, size: u32) -> i64 {
    x.rem_euclid(size as i64)
}

/// Floor division of `x` by a positive `size`.
#[must_use]
pub const fn floor_div(x: i64, size: u32) -> i64 {
    x.div_euclid(size as i64)
}

/// A positive integer 3-vector used for block, chunk and section sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 3]", into = "[u32; 3]")]
pub struct Size3 {
    x: u32,
    y: u32,
    z: u32,
}

impl Size3 {
    /// Creates a size, rejecting zero-length axes.
    pub fn new(x: u32, y: u32, z: u32) -> WorldResult<Self> {
        if x == 0 || y == 0 || z == 0 {
            return Err(WorldError::OutOfRange(format!(
                "size [{x},{y},{z}] must be positive on every axis"
            )));
        }
        Ok(Self { x, y, z })
    }

    /// Creates a cube of edge `n`. `n` is raised to 1 if zero.
    #[must_use]
    pub const fn cube(n: u32) -> Self {
        let n = if n == 0 { 1 } else { n };
        Self { x: n, y: n, z: n }
    }

    /// X extent.
    #[must_use]
    pub const fn x(&self) -> u32 {
        self.x
    }

    /// Y extent.
    #[must_use]
    pub const fn y(&self) -> u32 {
        self.y
    }

    /// Z extent.
    #[must_use]
    pub const fn z(&self) -> u32 {
        self.z
    }

    /// Number of cells enclosed.
    #[must_use]
    pub const fn volume(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }

    /// Extents as an array, in x, y, z order.
    #[must_use]
    pub const fn to_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    /// Extents as floats, in x, y, z order.
    #[must_use]
    pub fn to_f64_array(self) -> [f64; 3] {
        [f64::from(self.x), f64::from(self.y), f64::from(self.z)]
    }
}

impl TryFrom<[u32; 3]> for Size3 {
    type Error = WorldError;

    fn try_from(value: [u32; 3]) -> WorldResult<Self> {
        Self::new(value[0], value[1], value[2])
    }
}

impl From<Size3> for [u32; 3] {
    fn from(value: Size3) -> Self {
        value.to_array()
    }
}

impl fmt::Display for Size3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

macro_rules! integer_position {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name {
            /// X coordinate
            pub x: i64,
            /// Y coordinate
            pub y: i64,
            /// Z coordinate
            pub z: i64,
        }

        impl $name {
            /// Creates a new position.
            #[must_use]
            pub const fn new(x: i64, y: i64, z: i64) -> Self {
                Self { x, y, z }
            }

            /// Components as an array, in x, y, z order.
            #[must_use]
            pub const fn to_array(self) -> [i64; 3] {
                [self.x, self.y, self.z]
            }

            /// Offsets every axis by the given deltas, saturating at the
            /// `i64` limits.
            #[must_use]
            pub const fn offset(self, dx: i64, dy: i64, dz: i64) -> Self {
                Self::new(
                    self.x.saturating_add(dx),
                    self.y.saturating_add(dy),
                    self.z.saturating_add(dz),
                )
            }
        }

        impl From<[i64; 3]> for $name {
            fn from(v: [i64; 3]) -> Self {
                Self::new(v[0], v[1], v[2])
            }
        }

        /// Formats as `x,y,z`, the key form used by snapshots and file names.
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{},{},{}", self.x, self.y, self.z)
            }
        }

        impl FromStr for $name {
            type Err = WorldError;

            fn from_str(s: &str) -> WorldResult<Self> {
                let mut parts = s.split(',').map(|part| part.trim().parse::<i64>());
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) => Ok(Self::new(x, y, z)),
                    _ => Err(WorldError::OutOfRange(format!(
                        "'{s}' is not a {} (expected x,y,z)",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

integer_position!(
    /// Integer voxel coordinate in world-aligned units.
    SpatialPos
);
integer_position!(
    /// Absolute chunk coordinate, or a chunk coordinate relative to its section.
    ChunkPos
);
integer_position!(
    /// Section coordinate (the unit of persistence).
    SectionPos
);
integer_position!(
    /// Voxel coordinate relative to its chunk, in `[0, chunk_size)` per axis.
    LocalPos
);

/// World-space (render) coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldPos {
    /// X coordinate in world space
    pub x: f64,
    /// Y coordinate in world space
    pub y: f64,
    /// Z coordinate in world space
    pub z: f64,
}

impl WorldPos {
    /// Creates a new world position.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Components as an array, in x, y, z order.
    #[must_use]
    pub const fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for WorldPos {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Physical layout of voxels in world space: voxel size and world offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spatial {
    /// World-space size of one voxel
    pub block_size: Size3,
    /// World-space position of spatial origin
    pub offset: WorldPos,
}

impl Default for Spatial {
    fn default() -> Self {
        Self {
            block_size: Size3::cube(32),
            offset: WorldPos::default(),
        }
    }
}

impl Spatial {
    /// Creates a spatial layout.
    #[must_use]
    pub const fn new(block_size: Size3, offset: WorldPos) -> Self {
        Self { block_size, offset }
    }

    /// Returns the voxel containing a world position. Loses sub-voxel precision.
    #[must_use]
    pub fn world_to_spatial(&self, world: WorldPos) -> SpatialPos {
        let [bx, by, bz] = self.block_size.to_f64_array();
        SpatialPos::new(
            ((world.x - self.offset.x) / bx).floor() as i64,
            ((world.y - self.offset.y) / by).floor() as i64,
            ((world.z - self.offset.z) / bz).floor() as i64,
        )
    }

    /// Returns the world position of the center of a voxel's footprint.
    #[must_use]
    pub fn spatial_to_world(&self, spatial: SpatialPos) -> WorldPos {
        let [bx, by, bz] = self.block_size.to_f64_array();
        WorldPos::new(
            (spatial.x as f64 * bx + bx / 2.0 + self.offset.x).floor(),
            (spatial.y as f64 * by + by / 2.0 + self.offset.y).floor(),
            (spatial.z as f64 * bz + bz / 2.0 + self.offset.z).floor(),
        )
    }
}

/// Chunk and section geometry: converts between spatial, chunk and section
/// spaces and flattens local voxel positions into grid indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    /// Voxels per chunk on each axis
    pub chunk_size: Size3,
    /// Chunks per section on each axis
    pub section_size: Size3,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            chunk_size: Size3::cube(16),
            section_size: Size3::cube(8),
        }
    }
}

impl Grid {
    /// Creates a grid geometry.
    #[must_use]
    pub const fn new(chunk_size: Size3, section_size: Size3) -> Self {
        Self {
            chunk_size,
            section_size,
        }
    }

    /// Chunk containing a voxel.
    #[must_use]
    pub const fn spatial_to_chunk(&self, p: SpatialPos) -> ChunkPos {
        let c = self.chunk_size;
        ChunkPos::new(
            floor_div(p.x, c.x),
            floor_div(p.y, c.y),
            floor_div(p.z, c.z),
        )
    }

    /// Section containing a chunk.
    #[must_use]
    pub const fn chunk_to_section(&self, c: ChunkPos) -> SectionPos {
        let s = self.section_size;
        SectionPos::new(
            floor_div(c.x, s.x),
            floor_div(c.y, s.y),
            floor_div(c.z, s.z),
        )
    }

    /// Section containing a voxel.
    #[must_use]
    pub const fn spatial_to_section(&self, p: SpatialPos) -> SectionPos {
        self.chunk_to_section(self.spatial_to_chunk(p))
    }

    /// Chunk position relative to its owning section.
    #[must_use]
    pub const fn chunk_to_relative(&self, c: ChunkPos) -> ChunkPos {
        let s = self.section_size;
        ChunkPos::new(relative(c.x, s.x), relative(c.y, s.y), relative(c.z, s.z))
    }

    /// Voxel position relative to its owning chunk.
    #[must_use]
    pub const fn spatial_to_relative(&self, p: SpatialPos) -> LocalPos {
        let c = self.chunk_size;
        LocalPos::new(relative(p.x, c.x), relative(p.y, c.y), relative(p.z, c.z))
    }

    /// Absolute chunk position from a section and a section-relative chunk.
    /// Saturates at the `i64` limits.
    #[must_use]
    pub const fn relative_to_chunk(&self, section: SectionPos, rel: ChunkPos) -> ChunkPos {
        let s = self.section_size;
        ChunkPos::new(
            section.x.saturating_mul(s.x as i64).saturating_add(rel.x),
            section.y.saturating_mul(s.y as i64).saturating_add(rel.y),
            section.z.saturating_mul(s.z as i64).saturating_add(rel.z),
        )
    }

    /// Absolute voxel position from a chunk and a chunk-relative voxel.
    /// Saturates at the `i64` limits.
    #[must_use]
    pub const fn local_to_spatial(&self, chunk: ChunkPos, local: LocalPos) -> SpatialPos {
        let c = self.chunk_size;
        SpatialPos::new(
            chunk.x.saturating_mul(c.x as i64).saturating_add(local.x),
            chunk.y.saturating_mul(c.y as i64).saturating_add(local.y),
            chunk.z.saturating_mul(c.z as i64).saturating_add(local.z),
        )
    }

    /// Lowest voxel of a chunk.
    #[must_use]
    pub const fn chunk_origin(&self, chunk: ChunkPos) -> SpatialPos {
        self.local_to_spatial(chunk, LocalPos::new(0, 0, 0))
    }

    /// Number of voxels in one chunk.
    #[must_use]
    pub const fn chunk_volume(&self) -> usize {
        self.chunk_size.volume()
    }

    /// Flattens a chunk-local position into a grid index.
    pub fn flatten(&self, local: LocalPos) -> WorldResult<usize> {
        flatten(local, self.chunk_size)
    }

    /// Recovers the chunk-local position of a grid index.
    pub fn unflatten(&self, index: usize) -> WorldResult<LocalPos> {
        unflatten(index, self.chunk_size)
    }
}

/// Maps a chunk-local position to its index in a chunk grid.
///
/// Index layout is `x + cx * (y + cy * z)`: x varies fastest, z slowest.
pub fn flatten(local: LocalPos, chunk_size: Size3) -> WorldResult<usize> {
    let axes = [
        ('x', local.x, chunk_size.x()),
        ('y', local.y, chunk_size.y()),
        ('z', local.z, chunk_size.z()),
    ];
    for (axis, value, size) in axes {
        if value < 0 || value >= i64::from(size) {
            return Err(WorldError::OutOfRange(format!(
                "{axis} = {value} is outside [0, {size})"
            )));
        }
    }
    let cx = chunk_size.x() as usize;
    let cy = chunk_size.y() as usize;
    Ok(local.x as usize + cx * (local.y as usize + cy * local.z as usize))
}

/// Inverse of [`flatten`].
pub fn unflatten(index: usize, chunk_size: Size3) -> WorldResult<LocalPos> {
    let volume = chunk_size.volume();
    if index >= volume {
        return Err(WorldError::OutOfRange(format!(
            "index {index} is outside [0, {volume})"
        )));
    }
    let cx = chunk_size.x() as usize;
    let cy = chunk_size.y() as usize;
    Ok(LocalPos::new(
        (index % cx) as i64,
        ((index / cx) % cy) as i64,
        (index / (cx * cy)) as i64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grid() -> Grid {
        Grid::default()
    }

    #[test]
    fn test_size_rejects_zero() {
        assert!(Size3::new(16, 0, 16).is_err());
        assert_eq!(Size3::new(2, 3, 4).map(|s| s.volume()).ok(), Some(24));
    }

    #[test]
    fn test_negative_relative() {
        assert_eq!(relative(-1, 16), 15);
        assert_eq!(relative(-16, 16), 0);
        assert_eq!(relative(-17, 16), 15);
        assert_eq!(relative(17, 16), 1);
    }

    #[test]
    fn test_spatial_to_chunk_negative() {
        let g = grid();
        assert_eq!(g.spatial_to_chunk(SpatialPos::new(-1, 0, 15)), ChunkPos::new(-1, 0, 0));
        assert_eq!(g.spatial_to_chunk(SpatialPos::new(-16, -17, 16)), ChunkPos::new(-1, -2, 1));
        assert_eq!(g.chunk_to_section(ChunkPos::new(-1, 7, 8)), SectionPos::new(-1, 0, 1));
    }

    #[test]
    fn test_world_spatial_center() {
        let spatial = Spatial::new(Size3::cube(32), WorldPos::new(0.0, 0.0, 1_024_000.0));
        let center = spatial.spatial_to_world(SpatialPos::new(0, -1, -16));
        assert_eq!(center, WorldPos::new(16.0, -16.0, 1_024_000.0 - 512.0 + 16.0));
        assert_eq!(spatial.world_to_spatial(center), SpatialPos::new(0, -1, -16));
        // world -> spatial -> world snaps to the voxel center
        let snapped = spatial.spatial_to_world(spatial.world_to_spatial(WorldPos::new(3.0, 5.0, 1_024_001.0)));
        assert_eq!(snapped, WorldPos::new(16.0, 16.0, 1_024_016.0));
    }

    #[test]
    fn test_flatten_bounds() {
        let size = Size3::cube(16);
        assert!(flatten(LocalPos::new(16, 0, 0), size).is_err());
        assert!(flatten(LocalPos::new(0, -1, 0), size).is_err());
        assert!(unflatten(size.volume(), size).is_err());
        assert_eq!(flatten(LocalPos::new(15, 15, 15), size).ok(), Some(4095));
    }

    #[test]
    fn test_extreme_coordinates_saturate() {
        let far = SpatialPos::new(i64::MAX, i64::MIN, 0);
        assert_eq!(far.offset(1, -1, 5), SpatialPos::new(i64::MAX, i64::MIN, 5));

        let grid = grid();
        let chunk = grid.spatial_to_chunk(far);
        let origin = grid.chunk_origin(chunk);
        assert!(origin.x <= far.x && origin.y == i64::MIN);
        assert_eq!(grid.spatial_to_chunk(origin), chunk);

        let huge = ChunkPos::new(i64::MAX, i64::MIN, 1);
        let spatial = grid.local_to_spatial(huge, LocalPos::new(3, 3, 3));
        assert_eq!((spatial.x, spatial.y), (i64::MAX, i64::MIN));
        let section = grid.relative_to_chunk(SectionPos::new(i64::MAX, 0, 0), ChunkPos::new(1, 0, 0));
        assert_eq!(section.x, i64::MAX);
    }

    #[test]
    fn test_position_parse() {
        assert_eq!("1,-2,3".parse::<ChunkPos>().ok(), Some(ChunkPos::new(1, -2, 3)));
        assert!("1,2".parse::<ChunkPos>().is_err());
        assert!("1,2,3,4".parse::<SectionPos>().is_err());
        assert_eq!(SectionPos::new(-4, 0, 9).to_string(), "-4,0,9");
    }

    proptest! {
        #[test]
        fn prop_relative_in_range(x in any::<i32>(), size in 1u32..4096) {
            let x = i64::from(x);
            let r = relative(x, size);
            prop_assert!(r >= 0 && r < i64::from(size));
            prop_assert_eq!((x - r) % i64::from(size), 0);
        }

        #[test]
        fn prop_chunk_section_composition(
            x in -100_000i64..100_000,
            y in -100_000i64..100_000,
            z in -100_000i64..100_000,
            cs in 1u32..33,
            ss in 1u32..17,
        ) {
            let g = Grid::new(Size3::cube(cs), Size3::cube(ss));
            let p = SpatialPos::new(x, y, z);
            let chunk = g.spatial_to_chunk(p);
            let section = g.chunk_to_section(chunk);
            prop_assert_eq!(g.spatial_to_section(p), section);
            // recombining section + relative chunk recovers the chunk
            prop_assert_eq!(g.relative_to_chunk(section, g.chunk_to_relative(chunk)), chunk);
            // recombining chunk + relative voxel recovers the voxel
            prop_assert_eq!(g.local_to_spatial(chunk, g.spatial_to_relative(p)), p);
        }

        #[test]
        fn prop_flatten_inverse(cx in 1u32..20, cy in 1u32..20, cz in 1u32..20, seed in any::<usize>()) {
            let size = Size3::new(cx, cy, cz).expect("positive size");
            let index = seed % size.volume();
            let local = unflatten(index, size).expect("index in range");
            prop_assert_eq!(flatten(local, size).expect("local in range"), index);
        }

        #[test]
        fn prop_spatial_world_idempotent(x in -10_000i64..10_000, y in -10_000i64..10_000, z in -10_000i64..10_000, b in 1u32..64) {
            let spatial = Spatial::new(Size3::cube(b), WorldPos::new(7.0, -3.0, 1000.0));
            let p = SpatialPos::new(x, y, z);
            prop_assert_eq!(spatial.world_to_spatial(spatial.spatial_to_world(p)), p);
        }
    }
}
