//! Format versions stamped into saved surfaces.

use serde::{Deserialize, Serialize};

use crate::error::{WorldError, WorldResult};

/// A `major.minor.patch` format version. Only the major number decides
/// whether stored data can be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Bumped when older readers can no longer parse the data
    pub major: u16,
    /// Additive changes
    pub minor: u16,
    /// Fixes
    pub patch: u16,
}

impl SchemaVersion {
    /// Creates a version.
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self { major, minor, patch }
    }

    /// Layout of `world.toml`.
    pub const SURFACE_MANIFEST: Self = Self::new(1, 0, 0);

    /// Brace-nested text inside each section snapshot.
    pub const SECTION_SNAPSHOT: Self = Self::new(1, 0, 0);

    /// Returns true if a reader at this version understands `found`.
    #[must_use]
    pub const fn can_read(&self, found: &Self) -> bool {
        self.major == found.major
    }

    /// Fails with [`WorldError::VersionMismatch`] unless `found` is readable.
    pub fn require_readable(&self, found: &Self) -> WorldResult<()> {
        if self.can_read(found) {
            Ok(())
        } else {
            Err(WorldError::VersionMismatch {
                expected: self.to_string(),
                actual: found.to_string(),
            })
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
