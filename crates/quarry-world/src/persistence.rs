//! Section snapshots on disk.
//!
//! Layout under the save directory:
//!
//! ```text
//! Surfaces/<surface>/world.toml      surface manifest
//! Surfaces/<surface>/<x>,<y>,<z>.snap  one lz4-compressed section each
//! ```
//!
//! Only modified sections are written and removed sections have their file
//! deleted. Writes go through a temp file and a rename.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::{Grid, SchemaVersion, SectionPos, WorldError, WorldResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::codec::{decode_section, encode_section};
use crate::section::Section;
use crate::surface::{Surface, SurfaceSettings};

/// Directory holding one subdirectory per surface.
pub const SURFACES_DIR: &str = "Surfaces";
/// Manifest file name inside a surface directory.
pub const MANIFEST_FILE: &str = "world.toml";
/// Extension of section snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "snap";

/// What a surface directory records about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceManifest {
    /// Manifest schema version
    pub version: SchemaVersion,
    /// Version of the section snapshot text next to the manifest
    pub snapshot_version: SchemaVersion,
    /// Seed and geometry
    pub settings: SurfaceSettings,
}

impl SurfaceManifest {
    /// Manifest of the current schema version.
    #[must_use]
    pub fn new(settings: SurfaceSettings) -> Self {
        Self {
            version: SchemaVersion::SURFACE_MANIFEST,
            snapshot_version: SchemaVersion::SECTION_SNAPSHOT,
            settings,
        }
    }
}

/// Counts from one save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Section files written
    pub written: usize,
    /// Section files deleted
    pub removed: usize,
}

/// Result of a guarded save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The save ran
    Saved(SaveReport),
    /// Another save was in progress; nothing was done
    Skipped,
}

/// Reads and writes section snapshots under a save directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at `<save_dir>/Surfaces`.
    #[must_use]
    pub fn new(save_dir: impl AsRef<Path>) -> Self {
        Self {
            root: save_dir.as_ref().join(SURFACES_DIR),
        }
    }

    /// Directory holding every surface.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one surface.
    #[must_use]
    pub fn surface_dir(&self, surface: &str) -> PathBuf {
        self.root.join(surface)
    }

    /// Snapshot file of one section.
    #[must_use]
    pub fn section_path(&self, surface: &str, pos: SectionPos) -> PathBuf {
        self.surface_dir(surface)
            .join(format!("{pos}.{SNAPSHOT_EXTENSION}"))
    }

    fn manifest_path(&self, surface: &str) -> PathBuf {
        self.surface_dir(surface).join(MANIFEST_FILE)
    }

    /// Encodes, compresses and writes one section.
    pub fn write_section(&self, surface: &str, pos: SectionPos, section: &Section) -> WorldResult<()> {
        let text = encode_section(section)?;
        let bytes = lz4_flex::compress_prepend_size(text.as_bytes());
        atomic_write(&self.section_path(surface, pos), &bytes)
    }

    /// Reads, decompresses and decodes one section.
    pub fn read_section(&self, surface: &str, pos: SectionPos, grid: &Grid) -> WorldResult<Section> {
        let bytes = fs::read(self.section_path(surface, pos))?;
        let raw = lz4_flex::decompress_size_prepended(&bytes)
            .map_err(|e| WorldError::Compression(format!("section [{pos}]: {e}")))?;
        let text = String::from_utf8(raw)
            .map_err(|e| WorldError::malformed(format!("section [{pos}] is not UTF-8: {e}")))?;
        decode_section(&text, grid)
    }

    /// Deletes a section snapshot. Returns false if there was none.
    pub fn delete_section(&self, surface: &str, pos: SectionPos) -> WorldResult<bool> {
        match fs::remove_file(self.section_path(surface, pos)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Persisted section coordinates, sorted. Files that are not section
    /// snapshots are ignored.
    pub fn list_sections(&self, surface: &str) -> WorldResult<Vec<SectionPos>> {
        let dir = self.surface_dir(surface);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sections = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<SectionPos>() {
                Ok(pos) => sections.push(pos),
                Err(_) => warn!("Ignoring stray snapshot file {}", path.display()),
            }
        }
        sections.sort();
        Ok(sections)
    }

    /// Writes the surface manifest.
    pub fn write_manifest(&self, manifest: &SurfaceManifest) -> WorldResult<()> {
        let text = toml::to_string_pretty(manifest)
            .map_err(|e| WorldError::malformed(format!("manifest: {e}")))?;
        atomic_write(&self.manifest_path(&manifest.settings.name), text.as_bytes())
    }

    /// Reads the surface manifest, if one was written.
    pub fn read_manifest(&self, surface: &str) -> WorldResult<Option<SurfaceManifest>> {
        let text = match fs::read_to_string(self.manifest_path(surface)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: SurfaceManifest = toml::from_str(&text)
            .map_err(|e| WorldError::malformed(format!("manifest of '{surface}': {e}")))?;
        SchemaVersion::SURFACE_MANIFEST.require_readable(&manifest.version)?;
        SchemaVersion::SECTION_SNAPSHOT.require_readable(&manifest.snapshot_version)?;
        Ok(Some(manifest))
    }

    /// Writes the surface's pending changes and its manifest, then clears
    /// its modification tracking. An unmodified surface writes nothing.
    pub fn save_surface(&self, surface: &mut Surface) -> WorldResult<SaveReport> {
        if !surface.is_modified() {
            return Ok(SaveReport::default());
        }
        let name = surface.name().to_string();
        let pending = surface.pending_changes();
        let mut report = SaveReport::default();

        for pos in pending.written {
            match surface.section(pos) {
                Some(section) => {
                    self.write_section(&name, pos, section)?;
                    report.written += 1;
                }
                None => {
                    if self.delete_section(&name, pos)? {
                        report.removed += 1;
                    }
                }
            }
        }
        for pos in pending.removed {
            if self.delete_section(&name, pos)? {
                report.removed += 1;
            }
        }
        self.write_manifest(&SurfaceManifest::new(surface.settings().clone()))?;
        surface.mark_saved();

        info!(
            "Saved surface '{}': {} sections written, {} removed",
            name, report.written, report.removed
        );
        Ok(report)
    }

    /// Loads a surface. A surface with no directory starts fresh; otherwise
    /// its manifest supplies seed and geometry and every snapshot is read.
    pub fn load_surface(&self, settings: SurfaceSettings, catalog: Arc<Catalog>) -> WorldResult<Surface> {
        let name = settings.name.clone();
        if !self.surface_dir(&name).exists() {
            info!("No saved data for surface '{}', starting fresh", name);
            return Ok(Surface::new(settings, catalog));
        }

        let settings = match self.read_manifest(&name)? {
            Some(manifest) => SurfaceSettings {
                name: name.clone(),
                ..manifest.settings
            },
            None => {
                warn!("Surface '{}' has no manifest, using configured geometry", name);
                settings
            }
        };
        let grid = settings.grid;
        let mut surface = Surface::new(settings, catalog);
        let positions = self.list_sections(&name)?;
        for &pos in &positions {
            let section = self.read_section(&name, pos, &grid)?;
            debug!("Loaded section [{pos}] with {} chunks", section.len());
            surface.restore_section(pos, section);
        }
        surface.mark_saved();
        info!("Loaded surface '{}' with {} sections", name, positions.len());
        Ok(surface)
    }
}

/// Writes through a temp file and renames it into place.
fn atomic_write(path: &Path, bytes: &[u8]) -> WorldResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.flush()?;
    }
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        WorldError::Io(e)
    })
}

/// Snapshot store with a re-entrancy guard: a save requested while another
/// is running is dropped.
#[derive(Debug)]
pub struct SaveManager {
    store: SnapshotStore,
    guard: Mutex<()>,
}

impl SaveManager {
    /// Manager over `<save_dir>/Surfaces`.
    #[must_use]
    pub fn new(save_dir: impl AsRef<Path>) -> Self {
        Self {
            store: SnapshotStore::new(save_dir),
            guard: Mutex::new(()),
        }
    }

    /// Underlying store.
    #[must_use]
    pub const fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Saves the surface unless a save is already running.
    pub fn save(&self, surface: &mut Surface) -> WorldResult<SaveOutcome> {
        let Some(_guard) = self.guard.try_lock() else {
            debug!("Save of '{}' skipped, another save is running", surface.name());
            return Ok(SaveOutcome::Skipped);
        };
        self.store.save_surface(surface).map(SaveOutcome::Saved)
    }
}
