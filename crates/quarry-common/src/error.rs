//! Error types for Quarry.

use thiserror::Error;

use crate::coords::{ChunkPos, SectionPos};

/// World, store and snapshot errors.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Coordinate or index outside the configured bounds
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Block name not present in the catalog
    #[error("Block '{0}' doesn't exist")]
    UnknownBlock(String),

    /// Addressed section has not been allocated
    #[error("Section [{section}] doesn't exist")]
    MissingSection {
        /// Section coordinate
        section: SectionPos,
    },

    /// Addressed chunk has not been allocated
    #[error("Chunk [{chunk}] doesn't exist in section [{section}]")]
    MissingChunk {
        /// Owning section
        section: SectionPos,
        /// Chunk coordinate relative to the section
        chunk: ChunkPos,
    },

    /// Safe-mode generation attempted over an existing chunk
    #[error("Chunk [{chunk}] was already generated")]
    AlreadyGenerated {
        /// Absolute chunk coordinate
        chunk: ChunkPos,
    },

    /// Chunk palette cannot hold another distinct block
    #[error("Palette of chunk [{chunk}] is full ({len} entries)")]
    PaletteFull {
        /// Absolute chunk coordinate
        chunk: ChunkPos,
        /// Current palette length
        len: usize,
    },

    /// Snapshot text violates the brace/back-reference grammar
    #[error("Malformed snapshot: {0}")]
    CodecMalformed(String),

    /// Block catalog could not be loaded
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Snapshot compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version found
        actual: String,
    },
}

impl WorldError {
    /// Shorthand for a [`WorldError::CodecMalformed`] error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::CodecMalformed(message.into())
    }

    /// Returns true for the non-fatal safe-mode regeneration guard.
    #[must_use]
    pub const fn is_already_generated(&self) -> bool {
        matches!(self, Self::AlreadyGenerated { .. })
    }
}

/// Result type alias for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
