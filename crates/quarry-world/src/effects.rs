//! Mining effects and the hit/mine pipeline.
//!
//! Mineable blocks carry their `on_hit` and `on_mine` hooks as data
//! ([`EffectCall`]). An [`EffectRegistry`] resolves the function names to
//! native effects; names it does not know are logged and skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use quarry_common::{SpatialPos, WorldError, WorldResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::catalog::{Block, BlockKind, EffectCall, AIR};
use crate::surface::Surface;

/// Items gained, by name.
pub type Loot = BTreeMap<String, u32>;

/// Native effect signature.
pub type EffectFn = fn(&mut EffectContext<'_>, &Map<String, Value>) -> WorldResult<()>;

/// Who is mining, and how hard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningContext {
    /// Player level, compared against the block's minimum level
    pub player_level: u32,
    /// Damage multiplier
    pub damage_modifier: f64,
}

impl Default for MiningContext {
    fn default() -> Self {
        Self {
            player_level: 1,
            damage_modifier: 1.0,
        }
    }
}

impl MiningContext {
    /// Context for a player of the given level.
    #[must_use]
    pub fn for_level(player_level: u32) -> Self {
        Self {
            player_level,
            ..Self::default()
        }
    }
}

/// State an effect works on.
pub struct EffectContext<'a> {
    /// Surface holding the voxel
    pub surface: &'a mut Surface,
    /// Voxel being hit
    pub spatial: SpatialPos,
    /// Block at the voxel when the hit started
    pub block: &'a Block,
    /// Effective damage multiplier (zero when underleveled)
    pub damage_modifier: f64,
    /// Loot accumulated by the current hit
    pub loot: &'a mut Loot,
    /// Loot randomness
    pub rng: &'a mut fastrand::Rng,
}

/// Result of hitting one voxel.
#[derive(Debug, Clone, PartialEq)]
pub enum HitOutcome {
    /// Nothing mineable there, or the chunk is unallocated
    Ignored,
    /// Player level too low; no damage dealt
    Underleveled {
        /// Block name
        block: String,
        /// Level needed
        required: u32,
    },
    /// Damaged but still standing
    Damaged {
        /// Block name
        block: String,
        /// Remaining health, if the hit effects track it
        health: Option<f64>,
    },
    /// Health reached zero and the mine effects ran
    Mined {
        /// Block name
        block: String,
        /// Items gained
        loot: Loot,
    },
}

impl HitOutcome {
    /// Returns true if the voxel was mined.
    #[must_use]
    pub const fn is_mined(&self) -> bool {
        matches!(self, Self::Mined { .. })
    }
}

/// Name to native effect table, plus the loot PRNG.
///
/// Loot rolls use their own generator so that mining never shifts the
/// surface PRNG used by terrain generation.
pub struct EffectRegistry {
    effects: AHashMap<String, EffectFn>,
    rng: fastrand::Rng,
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.effects.keys().collect();
        names.sort();
        f.debug_struct("EffectRegistry").field("effects", &names).finish()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectRegistry {
    /// Registry with the built-in effects and an entropy-seeded loot PRNG.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    /// Registry with the built-in effects and a seeded loot PRNG.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        let mut registry = Self {
            effects: AHashMap::new(),
            rng,
        };
        registry.register("decrement_health", decrement_health);
        registry.register("destroy", destroy);
        registry.register("return_items", return_items);
        registry
    }

    /// Adds or replaces an effect.
    pub fn register(&mut self, name: impl Into<String>, effect: EffectFn) {
        self.effects.insert(name.into(), effect);
    }

    /// Returns true if `name` resolves.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.effects.contains_key(name)
    }

    fn run(
        &mut self,
        calls: &[EffectCall],
        surface: &mut Surface,
        spatial: SpatialPos,
        block: &Block,
        damage_modifier: f64,
        loot: &mut Loot,
    ) -> WorldResult<()> {
        let Self { effects, rng } = self;
        let mut context = EffectContext {
            surface,
            spatial,
            block,
            damage_modifier,
            loot,
            rng,
        };
        for call in calls {
            match effects.get(&call.function) {
                Some(effect) => effect(&mut context, &call.parameters)?,
                None => warn!(
                    "Mining function '{}' of block '{}' doesn't exist",
                    call.function, block.name
                ),
            }
        }
        Ok(())
    }
}

fn parameters<T: DeserializeOwned>(name: &str, raw: &Map<String, Value>) -> WorldResult<T> {
    serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|e| WorldError::Catalog(format!("Parameters of effect '{name}': {e}")))
}

const fn one() -> f64 {
    1.0
}

fn air() -> String {
    AIR.to_string()
}

#[derive(Deserialize)]
struct DecrementParams {
    #[serde(default = "one")]
    amount: f64,
}

/// Lowers the voxel's health by `amount` times the damage modifier. A voxel
/// with no or non-positive health starts from the block's full health.
fn decrement_health(ctx: &mut EffectContext<'_>, raw: &Map<String, Value>) -> WorldResult<()> {
    let params: DecrementParams = parameters("decrement_health", raw)?;
    let full = ctx.block.health().unwrap_or(0.0);
    let state = ctx.surface.block_state_mut(ctx.spatial)?;
    let current = match state.health {
        Some(health) if health > 0.0 => health,
        _ => full,
    };
    state.health = Some(current - params.amount * ctx.damage_modifier);
    Ok(())
}

#[derive(Deserialize)]
struct DestroyParams {
    #[serde(default = "air")]
    replace: String,
}

/// Replaces the voxel, dropping its overlay state.
fn destroy(ctx: &mut EffectContext<'_>, raw: &Map<String, Value>) -> WorldResult<()> {
    let params: DestroyParams = parameters("destroy", raw)?;
    ctx.surface.set_block(ctx.spatial, &params.replace)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LootAmount {
    Fixed(u32),
    Range([u32; 2]),
}

#[derive(Deserialize)]
struct LootEntry {
    amount: LootAmount,
    #[serde(default = "one")]
    chance: f64,
}

#[derive(Deserialize)]
struct ReturnItemsParams {
    loot_table: BTreeMap<String, LootEntry>,
}

/// Rolls each loot table entry against its chance and adds the amount.
fn return_items(ctx: &mut EffectContext<'_>, raw: &Map<String, Value>) -> WorldResult<()> {
    let params: ReturnItemsParams = parameters("return_items", raw)?;
    for (item, entry) in params.loot_table {
        if ctx.rng.f64() >= entry.chance {
            continue;
        }
        let amount = match entry.amount {
            LootAmount::Fixed(amount) => amount,
            LootAmount::Range([lo, hi]) if lo <= hi => ctx.rng.u32(lo..=hi),
            LootAmount::Range([lo, hi]) => {
                return Err(WorldError::Catalog(format!(
                    "Loot range of '{item}' is reversed: [{lo}, {hi}]"
                )))
            }
        };
        *ctx.loot.entry(item).or_default() += amount;
    }
    Ok(())
}

impl Surface {
    /// Hits one voxel: runs the block's hit effects and, once its health
    /// reaches zero, its mine effects.
    ///
    /// Unallocated voxels and blocks that are not mineable are ignored. A
    /// player below the block's minimum level deals no damage.
    pub fn hit_block(
        &mut self,
        spatial: SpatialPos,
        mining: MiningContext,
        effects: &mut EffectRegistry,
    ) -> WorldResult<HitOutcome> {
        let catalog = Arc::clone(self.catalog());
        let Some(block) = self.block_name(spatial).and_then(|name| catalog.get(name)) else {
            return Ok(HitOutcome::Ignored);
        };
        let BlockKind::Mineable {
            minimum_level,
            on_hit,
            on_mine,
            ..
        } = &block.kind
        else {
            return Ok(HitOutcome::Ignored);
        };

        let underleveled = mining.player_level < *minimum_level;
        let modifier = if underleveled {
            0.0
        } else {
            mining.damage_modifier
        };
        let mut loot = Loot::new();
        effects.run(on_hit, self, spatial, block, modifier, &mut loot)?;

        if underleveled {
            return Ok(HitOutcome::Underleveled {
                block: block.name.clone(),
                required: *minimum_level,
            });
        }

        let health = self.block_state(spatial).and_then(|state| state.health);
        match health {
            Some(health) if health <= 0.0 => {
                effects.run(on_mine, self, spatial, block, modifier, &mut loot)?;
                debug!("Mined '{}' at {} for {:?}", block.name, spatial, loot);
                Ok(HitOutcome::Mined {
                    block: block.name.clone(),
                    loot,
                })
            }
            health => Ok(HitOutcome::Damaged {
                block: block.name.clone(),
                health,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use quarry_common::{ChunkPos, Size3};
    use serde_json::json;

    use super::*;
    use crate::catalog::{BlockFlag, Catalog};
    use crate::surface::SurfaceSettings;

    fn mining_surface() -> Surface {
        let gold = Block::mineable("Ore_Gold", 3.0, 2).with_effects(
            vec![EffectCall::new("decrement_health", json!({ "amount": 1 }))],
            vec![
                EffectCall::new("destroy", json!({ "replace": "Air" })),
                EffectCall::new(
                    "return_items",
                    json!({ "loot_table": {
                        "Gold": { "amount": 2, "chance": 1 },
                        "Gem": { "amount": [1, 3], "chance": 0 },
                    }}),
                ),
            ],
        );
        let blocks = vec![
            Block::new(AIR, BlockKind::Static).with_flags([BlockFlag::Gas, BlockFlag::NoGenerate]),
            Block::new("Stone", BlockKind::Static),
            gold,
        ];
        let catalog = Arc::new(Catalog::new(blocks).expect("valid catalog"));
        let mut surface = Surface::new(
            SurfaceSettings::new("Earth", 1).with_chunk_size(Size3::cube(4)),
            catalog,
        );
        surface.add_chunk(ChunkPos::new(0, 0, 0));
        surface
            .set_block(SpatialPos::new(1, 1, 1), "Ore_Gold")
            .expect("allocated chunk");
        surface
    }

    #[test]
    fn test_hits_until_mined() {
        let mut surface = mining_surface();
        let mut effects = EffectRegistry::with_seed(7);
        let pos = SpatialPos::new(1, 1, 1);
        let player = MiningContext::for_level(2);

        for expected in [2.0, 1.0] {
            let outcome = surface.hit_block(pos, player, &mut effects).expect("hit");
            assert_eq!(
                outcome,
                HitOutcome::Damaged {
                    block: "Ore_Gold".into(),
                    health: Some(expected)
                }
            );
        }
        let outcome = surface.hit_block(pos, player, &mut effects).expect("hit");
        let mut loot = Loot::new();
        loot.insert("Gold".into(), 2);
        assert_eq!(
            outcome,
            HitOutcome::Mined {
                block: "Ore_Gold".into(),
                loot
            }
        );
        assert_eq!(surface.block_name(pos), Some(AIR));
        assert!(surface.block_state(pos).is_none());
    }

    #[test]
    fn test_underleveled_deals_no_damage() {
        let mut surface = mining_surface();
        let mut effects = EffectRegistry::with_seed(7);
        let pos = SpatialPos::new(1, 1, 1);

        let outcome = surface
            .hit_block(pos, MiningContext::for_level(1), &mut effects)
            .expect("hit");
        assert_eq!(
            outcome,
            HitOutcome::Underleveled {
                block: "Ore_Gold".into(),
                required: 2
            }
        );
        assert_eq!(surface.block_state(pos).and_then(|s| s.health), Some(3.0));
    }

    #[test]
    fn test_damage_modifier_scales_hits() {
        let mut surface = mining_surface();
        let mut effects = EffectRegistry::with_seed(7);
        let strong = MiningContext {
            player_level: 5,
            damage_modifier: 3.0,
        };
        let outcome = surface
            .hit_block(SpatialPos::new(1, 1, 1), strong, &mut effects)
            .expect("hit");
        assert!(outcome.is_mined());
    }

    #[test]
    fn test_static_and_unallocated_are_ignored() {
        let mut surface = mining_surface();
        let mut effects = EffectRegistry::with_seed(7);
        let player = MiningContext::default();
        surface
            .set_block(SpatialPos::new(0, 0, 0), "Stone")
            .expect("allocated chunk");
        for pos in [SpatialPos::new(0, 0, 0), SpatialPos::new(100, 0, 0)] {
            let outcome = surface.hit_block(pos, player, &mut effects).expect("hit");
            assert_eq!(outcome, HitOutcome::Ignored);
        }
    }

    #[test]
    fn test_unknown_effect_is_skipped() {
        let mut surface = mining_surface();
        let mut effects = EffectRegistry::with_seed(7);
        effects.effects.remove("decrement_health");
        assert!(!effects.contains("decrement_health"));
        let outcome = surface
            .hit_block(SpatialPos::new(1, 1, 1), MiningContext::for_level(3), &mut effects)
            .expect("hit");
        assert_eq!(
            outcome,
            HitOutcome::Damaged {
                block: "Ore_Gold".into(),
                health: None
            }
        );
    }

    #[test]
    fn test_bad_parameters_are_catalog_errors() {
        let mut surface = mining_surface();
        let mut effects = EffectRegistry::with_seed(7);
        effects.register("decrement_health", |ctx, _| {
            let bad = json!({ "amount": "lots" });
            let Value::Object(raw) = bad else { unreachable!() };
            decrement_health(ctx, &raw)
        });
        let err = surface
            .hit_block(SpatialPos::new(1, 1, 1), MiningContext::for_level(3), &mut effects)
            .expect_err("string amount");
        assert!(matches!(err, WorldError::Catalog(_)));
    }

    #[test]
    fn test_loot_ranges_stay_inside_bounds() {
        let mut surface = mining_surface();
        let mut effects = EffectRegistry::with_seed(3);
        let catalog = Arc::clone(surface.catalog());
        let block = catalog.get("Ore_Gold").expect("in catalog");
        let calls = [EffectCall::new(
            "return_items",
            json!({ "loot_table": { "Gem": { "amount": [1, 3] } } }),
        )];
        for _ in 0..50 {
            let mut loot = Loot::new();
            effects
                .run(&calls, &mut surface, SpatialPos::new(1, 1, 1), block, 1.0, &mut loot)
                .expect("valid table");
            let gems = loot.get("Gem").copied().unwrap_or_default();
            assert!((1..=3).contains(&gems));
        }
    }
}
