//! Block catalog.
//!
//! Blocks are read from JSON documents grouped by kind:
//!
//! ```json
//! { "Block": { .. }, "NaturalBlock": { .. }, "MineableBlock": { .. } }
//! ```
//!
//! Each group maps a key to a block record. Natural and mineable blocks may
//! carry `generator_data`, the terrain rules the generator consumes. Mineable
//! blocks also carry `health`, `minimum_level` and their `on_hit`/`on_mine`
//! effect lists. Everything else on a record (colour, material, components)
//! is kept as opaque visual attributes for the render bridge.

use std::collections::BTreeMap;
use std::path::Path;

use ahash::AHashMap;
use quarry_common::{WorldError, WorldResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::codec::is_codec_safe_name;

/// Name of the empty block. Index 0 of every fresh chunk palette.
pub const AIR: &str = "Air";

/// Behaviour flags shared by blocks and terrain rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockFlag {
    /// Not solid; gas-flagged rules never generate
    Gas,
    /// Skipped by target picking (rays pass through it)
    NoGenerate,
    /// Terrain rule produces a depth-banded base layer
    Layer,
    /// Any flag this crate has no meaning for
    #[serde(other)]
    Unknown,
}

/// One terrain generation rule for a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainRule {
    /// Block this rule places. Filled from the owning record.
    #[serde(skip)]
    pub block_name: String,
    /// Surface names the rule applies to; a leading `*` matches every surface
    #[serde(default = "all_surfaces")]
    pub surfaces: Vec<String>,
    /// Relative weight of an ore rule; ignored for layers
    #[serde(default)]
    pub abundance: f64,
    /// Centre depth. Depth grows downward.
    pub depth: i64,
    /// Half-height of the band an ore rule occupies
    #[serde(default)]
    pub extent: i64,
    /// Rule flags (`layer`, `gas`)
    #[serde(default)]
    pub flags: Vec<BlockFlag>,
}

fn all_surfaces() -> Vec<String> {
    vec!["*".to_string()]
}

impl TerrainRule {
    /// Creates an ore rule active on every surface.
    pub fn ore(block_name: impl Into<String>, abundance: f64, depth: i64, extent: i64) -> Self {
        Self {
            block_name: block_name.into(),
            surfaces: all_surfaces(),
            abundance,
            depth,
            extent,
            flags: Vec::new(),
        }
    }

    /// Creates a layer rule active on every surface.
    pub fn layer(block_name: impl Into<String>, depth: i64) -> Self {
        Self {
            block_name: block_name.into(),
            surfaces: all_surfaces(),
            abundance: 0.0,
            depth,
            extent: 0,
            flags: vec![BlockFlag::Layer],
        }
    }

    /// Restricts the rule to the given surfaces.
    #[must_use]
    pub fn on_surfaces<I, S>(mut self, surfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.surfaces = surfaces.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the rule carries `flag`.
    #[must_use]
    pub fn has_flag(&self, flag: BlockFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Returns true for layer rules.
    #[must_use]
    pub fn is_layer(&self) -> bool {
        self.has_flag(BlockFlag::Layer)
    }

    /// Returns true if the rule applies to the named surface.
    #[must_use]
    pub fn applies_to(&self, surface: &str) -> bool {
        match self.surfaces.first() {
            Some(first) if first == "*" => true,
            _ => self.surfaces.iter().any(|s| s == surface),
        }
    }

    /// Returns true if `z_depth` lies inside `[depth - extent, depth + extent]`.
    #[must_use]
    pub const fn covers(&self, z_depth: i64) -> bool {
        self.depth - self.extent <= z_depth && z_depth <= self.depth + self.extent
    }
}

/// A named effect with its static parameters, resolved against an
/// [`EffectRegistry`](crate::effects::EffectRegistry) when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectCall {
    /// Registered effect name
    #[serde(rename = "function_name", alias = "function")]
    pub function: String,
    /// Parameters handed to the effect
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl EffectCall {
    /// Creates an effect call.
    pub fn new(function: impl Into<String>, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            function: function.into(),
            parameters,
        }
    }
}

/// Kind-specific data of a block.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BlockKind {
    /// Placeable only
    #[default]
    Static,
    /// Generated by terrain rules
    Natural {
        /// Terrain rules
        generator_data: Vec<TerrainRule>,
    },
    /// Generated and mineable
    Mineable {
        /// Terrain rules
        generator_data: Vec<TerrainRule>,
        /// Full health of a fresh voxel
        health: f64,
        /// Player level needed to deal damage
        minimum_level: u32,
        /// Effects applied on every hit
        on_hit: Vec<EffectCall>,
        /// Effects applied once health reaches zero
        on_mine: Vec<EffectCall>,
    },
}

/// A block definition. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Unique name
    pub name: String,
    /// Whether the render bridge draws it
    pub visibility: bool,
    /// Behaviour flags
    pub flags: Vec<BlockFlag>,
    /// Opaque visual attributes
    pub visual: Map<String, Value>,
    /// Kind-specific data
    pub kind: BlockKind,
}

impl Block {
    /// Creates a visible block with no flags.
    pub fn new(name: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            name: name.into(),
            visibility: true,
            flags: Vec::new(),
            visual: Map::new(),
            kind,
        }
    }

    /// Creates a mineable block with no effects and no terrain rules.
    pub fn mineable(name: impl Into<String>, health: f64, minimum_level: u32) -> Self {
        Self::new(
            name,
            BlockKind::Mineable {
                generator_data: Vec::new(),
                health,
                minimum_level,
                on_hit: Vec::new(),
                on_mine: Vec::new(),
            },
        )
    }

    /// Adds flags.
    #[must_use]
    pub fn with_flags(mut self, flags: impl IntoIterator<Item = BlockFlag>) -> Self {
        self.flags.extend(flags);
        self
    }

    /// Replaces the terrain rules. Turns a static block into a natural one.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<TerrainRule>) -> Self {
        if let BlockKind::Natural { generator_data } | BlockKind::Mineable { generator_data, .. } =
            &mut self.kind
        {
            *generator_data = rules;
        } else {
            self.kind = BlockKind::Natural {
                generator_data: rules,
            };
        }
        self.bind_rules();
        self
    }

    /// Replaces the hit and mine effects of a mineable block.
    #[must_use]
    pub fn with_effects(mut self, hit: Vec<EffectCall>, mine: Vec<EffectCall>) -> Self {
        if let BlockKind::Mineable { on_hit, on_mine, .. } = &mut self.kind {
            *on_hit = hit;
            *on_mine = mine;
        }
        self
    }

    /// Returns true if the block carries `flag`.
    #[must_use]
    pub fn has_flag(&self, flag: BlockFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Terrain rules of natural and mineable blocks.
    #[must_use]
    pub fn generator_data(&self) -> &[TerrainRule] {
        kind_rules(&self.kind)
    }

    /// Full health, for mineable blocks.
    #[must_use]
    pub const fn health(&self) -> Option<f64> {
        match &self.kind {
            BlockKind::Mineable { health, .. } => Some(*health),
            _ => None,
        }
    }

    /// Returns true for mineable blocks.
    #[must_use]
    pub const fn is_mineable(&self) -> bool {
        matches!(self.kind, BlockKind::Mineable { .. })
    }

    fn bind_rules(&mut self) {
        let name = self.name.clone();
        if let BlockKind::Natural { generator_data } | BlockKind::Mineable { generator_data, .. } =
            &mut self.kind
        {
            for rule in generator_data {
                rule.block_name.clone_from(&name);
            }
        }
    }
}

/// Raw record shared by all three catalog groups.
#[derive(Debug, Deserialize)]
struct BlockRecord {
    name: Option<String>,
    #[serde(default = "default_visibility")]
    visibility: bool,
    #[serde(default)]
    flags: Vec<BlockFlag>,
    #[serde(default)]
    generator_data: Vec<TerrainRule>,
    health: Option<f64>,
    #[serde(default)]
    minimum_level: u32,
    #[serde(default)]
    on_hit: Vec<EffectCall>,
    #[serde(default)]
    on_mine: Vec<EffectCall>,
    #[serde(flatten)]
    visual: Map<String, Value>,
}

const fn default_visibility() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(rename = "Block", default)]
    block: BTreeMap<String, BlockRecord>,
    #[serde(rename = "NaturalBlock", default)]
    natural_block: BTreeMap<String, BlockRecord>,
    #[serde(rename = "MineableBlock", default)]
    mineable_block: BTreeMap<String, BlockRecord>,
}

#[derive(Debug, Clone, Copy)]
enum Group {
    Static,
    Natural,
    Mineable,
}

impl BlockRecord {
    fn into_block(self, key: String, group: Group) -> WorldResult<Block> {
        let name = self.name.unwrap_or(key);
        let kind = match group {
            Group::Static => BlockKind::Static,
            Group::Natural => BlockKind::Natural {
                generator_data: self.generator_data,
            },
            Group::Mineable => {
                let health = self.health.ok_or_else(|| {
                    WorldError::Catalog(format!("mineable block '{name}' has no health"))
                })?;
                if !health.is_finite() || health <= 0.0 {
                    return Err(WorldError::Catalog(format!(
                        "mineable block '{name}' has invalid health {health}"
                    )));
                }
                BlockKind::Mineable {
                    generator_data: self.generator_data,
                    health,
                    minimum_level: self.minimum_level,
                    on_hit: self.on_hit,
                    on_mine: self.on_mine,
                }
            },
        };
        for rule in kind_rules(&kind) {
            if rule.abundance < 0.0 || !rule.abundance.is_finite() || rule.extent < 0 {
                return Err(WorldError::Catalog(format!(
                    "block '{name}' has a terrain rule with negative abundance or extent"
                )));
            }
        }
        let mut block = Block {
            name,
            visibility: self.visibility,
            flags: self.flags,
            visual: self.visual,
            kind,
        };
        block.bind_rules();
        Ok(block)
    }
}

fn kind_rules(kind: &BlockKind) -> &[TerrainRule] {
    match kind {
        BlockKind::Static => &[],
        BlockKind::Natural { generator_data } | BlockKind::Mineable { generator_data, .. } => {
            generator_data
        },
    }
}

/// Every known block, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    blocks: Vec<Block>,
    index: AHashMap<String, usize>,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate names.
    pub fn new(blocks: impl IntoIterator<Item = Block>) -> WorldResult<Self> {
        let mut catalog = Self::default();
        for block in blocks {
            catalog.insert(block)?;
        }
        Ok(catalog)
    }

    /// Parses one or more catalog JSON documents into a single catalog.
    pub fn from_json_documents<'a>(documents: impl IntoIterator<Item = &'a str>) -> WorldResult<Self> {
        let mut catalog = Self::default();
        for document in documents {
            let file: CatalogFile = serde_json::from_str(document)
                .map_err(|e| WorldError::Catalog(format!("invalid catalog JSON: {e}")))?;
            let groups = [
                (file.block, Group::Static),
                (file.natural_block, Group::Natural),
                (file.mineable_block, Group::Mineable),
            ];
            for (records, group) in groups {
                for (key, record) in records {
                    catalog.insert(record.into_block(key, group)?)?;
                }
            }
        }
        Ok(catalog)
    }

    /// Parses a catalog JSON document.
    pub fn from_json_str(document: &str) -> WorldResult<Self> {
        Self::from_json_documents([document])
    }

    /// Loads a catalog JSON file.
    pub fn load(path: impl AsRef<Path>) -> WorldResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&contents)?;
        info!("Loaded {} blocks from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    fn insert(&mut self, block: Block) -> WorldResult<()> {
        if !is_codec_safe_name(&block.name) {
            return Err(WorldError::Catalog(format!(
                "block name '{}' cannot be stored in a snapshot",
                block.name
            )));
        }
        if self.index.contains_key(&block.name) {
            return Err(WorldError::Catalog(format!(
                "block '{}' is defined twice",
                block.name
            )));
        }
        debug!("Registered block {}", block.name);
        self.index.insert(block.name.clone(), self.blocks.len());
        self.blocks.push(block);
        Ok(())
    }

    /// Looks up a block by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Block> {
        self.index.get(name).and_then(|&i| self.blocks.get(i))
    }

    /// Returns true if the catalog knows `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates blocks in registration order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Iterates every terrain rule of every block, in registration order.
    pub fn terrain_rules(&self) -> impl Iterator<Item = &TerrainRule> {
        self.blocks.iter().flat_map(Block::generator_data)
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if no block is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
