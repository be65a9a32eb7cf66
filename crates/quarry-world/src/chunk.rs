//! Chunk storage: a palette, a grid of palette indices, and a sparse
//! per-voxel state overlay.

use std::collections::{BTreeMap, HashSet};

use quarry_common::{LocalPos, WorldError, WorldResult};
use serde::{Deserialize, Serialize};

use crate::catalog::AIR;

/// Largest palette a chunk can hold with `u8` grid indices.
pub const MAX_PALETTE_LEN: usize = u8::MAX as usize + 1;

/// Mutable per-voxel state kept outside the palette.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockState {
    /// Remaining mining health. Missing or non-positive means undamaged.
    pub health: Option<f64>,
}

impl BlockState {
    /// Creates a state with the given remaining health.
    #[must_use]
    pub const fn with_health(health: f64) -> Self {
        Self {
            health: Some(health),
        }
    }

    /// Returns true if the voxel carries live damage.
    #[must_use]
    pub fn is_damaged(&self) -> bool {
        self.health.is_some_and(|h| h > 0.0)
    }
}

/// A fixed-size cuboid of voxels.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    palette: Vec<String>,
    data: Vec<u8>,
    states: BTreeMap<LocalPos, BlockState>,
}

impl Chunk {
    /// Creates an all-Air chunk holding `volume` voxels.
    #[must_use]
    pub fn new(volume: usize) -> Self {
        Self {
            palette: vec![AIR.to_string()],
            data: vec![0; volume],
            states: BTreeMap::new(),
        }
    }

    /// Builds a chunk from stored parts, checking every grid index against
    /// the palette.
    pub fn from_parts(
        palette: Vec<String>,
        data: Vec<u8>,
        states: BTreeMap<LocalPos, BlockState>,
    ) -> WorldResult<Self> {
        if palette.is_empty() || palette.len() > MAX_PALETTE_LEN {
            return Err(WorldError::OutOfRange(format!(
                "palette length {} is outside [1, {MAX_PALETTE_LEN}]",
                palette.len()
            )));
        }
        let mut seen = HashSet::with_capacity(palette.len());
        if let Some(dup) = palette.iter().find(|name| !seen.insert(*name)) {
            return Err(WorldError::OutOfRange(format!(
                "palette entry '{dup}' appears twice"
            )));
        }
        if let Some(&bad) = data.iter().find(|&&i| usize::from(i) >= palette.len()) {
            return Err(WorldError::OutOfRange(format!(
                "grid index {bad} outside palette of {}",
                palette.len()
            )));
        }
        Ok(Self {
            palette,
            data,
            states,
        })
    }

    /// Number of voxels.
    #[must_use]
    pub fn volume(&self) -> usize {
        self.data.len()
    }

    /// Palette, in index order.
    #[must_use]
    pub fn palette(&self) -> &[String] {
        &self.palette
    }

    /// Grid of palette indices, in flat index order.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Palette index of `name`, if present.
    #[must_use]
    pub fn palette_index(&self, name: &str) -> Option<u8> {
        self.palette
            .iter()
            .position(|entry| entry == name)
            .and_then(|i| u8::try_from(i).ok())
    }

    /// Returns the palette index for `name`, appending it when new.
    /// `None` means the palette is full.
    pub fn ensure_palette_entry(&mut self, name: &str) -> Option<u8> {
        if let Some(index) = self.palette_index(name) {
            return Some(index);
        }
        let index = u8::try_from(self.palette.len()).ok()?;
        self.palette.push(name.to_string());
        Some(index)
    }

    /// Block name stored at a flat grid index.
    #[must_use]
    pub fn name_at(&self, index: usize) -> Option<&str> {
        let palette_index = *self.data.get(index)?;
        self.palette.get(usize::from(palette_index)).map(String::as_str)
    }

    /// Writes a palette index at a flat grid index.
    pub fn set_index(&mut self, index: usize, palette_index: u8) -> WorldResult<()> {
        if usize::from(palette_index) >= self.palette.len() {
            return Err(WorldError::OutOfRange(format!(
                "palette index {palette_index} outside palette of {}",
                self.palette.len()
            )));
        }
        let volume = self.data.len();
        let slot = self.data.get_mut(index).ok_or_else(|| {
            WorldError::OutOfRange(format!("index {index} is outside [0, {volume})"))
        })?;
        *slot = palette_index;
        Ok(())
    }

    /// Resets to all-Air with palette `["Air"]` and no overlay.
    pub fn reset(&mut self) {
        self.palette.clear();
        self.palette.push(AIR.to_string());
        self.data.fill(0);
        self.states.clear();
    }

    /// Overlay entries.
    #[must_use]
    pub const fn states(&self) -> &BTreeMap<LocalPos, BlockState> {
        &self.states
    }

    /// Overlay entry at a local position.
    #[must_use]
    pub fn state(&self, local: LocalPos) -> Option<&BlockState> {
        self.states.get(&local)
    }

    /// Overlay entry at a local position, created empty when missing.
    pub fn state_mut(&mut self, local: LocalPos) -> &mut BlockState {
        self.states.entry(local).or_default()
    }

    /// Drops the overlay entry at a local position.
    pub fn clear_state(&mut self, local: LocalPos) -> Option<BlockState> {
        self.states.remove(&local)
    }
}
