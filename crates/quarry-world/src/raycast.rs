//! Grid (DDA) raycasting in voxel space.
//!
//! Rotations are `(pitch, yaw, roll)` in degrees; roll does not change the
//! aim. The walk happens in block space (world offset removed, each axis
//! scaled by its block size) and emits the world-space centre of every cell
//! the ray enters, nearest first.

use glam::DVec3;
use quarry_common::{Spatial, SpatialPos, WorldPos};

/// Unit aim vector for a `(pitch, yaw, roll)` rotation in degrees.
#[must_use]
pub fn aim_direction(rotation_deg: [f64; 3]) -> DVec3 {
    let pitch = rotation_deg[0].to_radians();
    let yaw = rotation_deg[1].to_radians();
    DVec3::new(yaw.cos() * pitch.cos(), yaw.sin() * pitch.cos(), pitch.sin())
}

/// World distance travelled along `direction` to cross one cell on each
/// axis. Infinite on axes the ray never crosses.
#[must_use]
pub fn unit_steps(direction: DVec3, spatial: &Spatial) -> [f64; 3] {
    let block = spatial.block_size.to_f64_array();
    let dir = direction.to_array();
    let mut steps = [f64::INFINITY; 3];
    for axis in 0..3 {
        let step = block[axis] / dir[axis].abs();
        if step.is_finite() {
            steps[axis] = step;
        }
    }
    steps
}

/// Upper bound on the number of cells [`spatial_dda_raycast`] returns.
#[must_use]
pub fn max_candidates(rotation_deg: [f64; 3], max_distance: f64, spatial: &Spatial) -> usize {
    if !max_distance.is_finite() {
        return 0;
    }
    if max_distance <= 0.0 {
        return 1;
    }
    let steps = unit_steps(aim_direction(rotation_deg), spatial);
    steps
        .iter()
        .filter(|step| step.is_finite())
        .map(|step| (max_distance / step).ceil() as usize)
        .fold(1usize, usize::saturating_add)
}

/// Walks the grid from `start` along the aim and returns the centre of each
/// cell entered, stopping once the travelled distance reaches
/// `max_distance`. The starting cell is always first.
///
/// A non-finite start or `max_distance` yields nothing; a non-positive
/// `max_distance` yields only the starting cell.
#[must_use]
pub fn spatial_dda_raycast(
    start: WorldPos,
    rotation_deg: [f64; 3],
    max_distance: f64,
    spatial: &Spatial,
) -> Vec<WorldPos> {
    let origin = DVec3::from_array(start.to_array());
    if !max_distance.is_finite() || !origin.is_finite() {
        return Vec::new();
    }
    let block = DVec3::from_array(spatial.block_size.to_f64_array());
    let offset = DVec3::from_array(spatial.offset.to_array());
    let in_blocks = ((origin - offset) / block).to_array();
    let mut cell = in_blocks.map(|v| v.floor() as i64);

    if max_distance <= 0.0 {
        return vec![spatial.spatial_to_world(SpatialPos::from(cell))];
    }

    let direction = aim_direction(rotation_deg).to_array();
    let unit = unit_steps(DVec3::from_array(direction), spatial);
    let mut step = [0i64; 3];
    let mut side = [f64::INFINITY; 3];
    for axis in 0..3 {
        if unit[axis].is_infinite() {
            continue;
        }
        let fraction = in_blocks[axis] - in_blocks[axis].floor();
        if direction[axis] < 0.0 {
            step[axis] = -1;
            side[axis] = fraction * unit[axis];
        } else {
            step[axis] = 1;
            side[axis] = (1.0 - fraction) * unit[axis];
        }
    }

    let limit = max_candidates(rotation_deg, max_distance, spatial);
    let mut cells = Vec::with_capacity(limit.min(1024));
    let mut distance = 0.0;
    while distance < max_distance && cells.len() < limit {
        cells.push(spatial.spatial_to_world(SpatialPos::from(cell)));
        let axis = if side[0] <= side[1] && side[0] <= side[2] {
            0
        } else if side[1] <= side[2] {
            1
        } else {
            2
        };
        if side[axis].is_infinite() {
            break;
        }
        cell[axis] += step[axis];
        distance = side[axis];
        side[axis] += unit[axis];
    }
    cells
}
