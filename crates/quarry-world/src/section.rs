//! Sections: the unit of persistence.

use std::collections::BTreeMap;

use quarry_common::{ChunkPos, SpatialPos};
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;

/// A structure stamped into the world, keyed by its origin voxel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    /// Template name
    pub template: String,
}

/// Sparse map of section-relative chunk positions to chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    chunks: BTreeMap<ChunkPos, Chunk>,
    structures: BTreeMap<SpatialPos, Structure>,
}

impl Section {
    /// Creates an empty section.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk at a section-relative position.
    #[must_use]
    pub fn chunk(&self, rel: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&rel)
    }

    /// Mutable chunk at a section-relative position.
    pub fn chunk_mut(&mut self, rel: ChunkPos) -> Option<&mut Chunk> {
        self.chunks.get_mut(&rel)
    }

    /// Returns true if a chunk is allocated at `rel`.
    #[must_use]
    pub fn contains_chunk(&self, rel: ChunkPos) -> bool {
        self.chunks.contains_key(&rel)
    }

    /// Inserts a chunk, returning the one it replaced.
    pub fn insert_chunk(&mut self, rel: ChunkPos, chunk: Chunk) -> Option<Chunk> {
        self.chunks.insert(rel, chunk)
    }

    /// Removes a chunk.
    pub fn remove_chunk(&mut self, rel: ChunkPos) -> Option<Chunk> {
        self.chunks.remove(&rel)
    }

    /// Chunks in position order.
    pub fn chunks(&self) -> impl Iterator<Item = (&ChunkPos, &Chunk)> {
        self.chunks.iter()
    }

    /// Number of allocated chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if no chunk is allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Structures whose origin lies in this section.
    #[must_use]
    pub const fn structures(&self) -> &BTreeMap<SpatialPos, Structure> {
        &self.structures
    }

    /// Records a structure at its origin.
    pub fn insert_structure(&mut self, origin: SpatialPos, structure: Structure) -> Option<Structure> {
        self.structures.insert(origin, structure)
    }
}
