use std::collections::BTreeMap;

use engine::{SimInstant, TileGrid, TilePos, TilemapError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entities::{BossState, Fire, GroundLootPile, Interactable, Mob, ResourceNode};
use crate::maps::ZoneBlueprint;

pub const LOOT_TTL_MS: u64 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKey {
    Overworld,
    Dungeon,
}

impl ZoneKey {
    pub const ALL: [ZoneKey; 2] = [ZoneKey::Overworld, ZoneKey::Dungeon];

    pub fn key(self) -> &'static str {
        match self {
            Self::Overworld => "overworld",
            Self::Dungeon => "dungeon",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|zone| zone.key() == key)
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneTimerReport {
    pub revived_resources: usize,
    pub revived_mobs: Vec<String>,
    pub expired_fires: usize,
}

/// One zone's world: static layout plus every live collection.
#[derive(Debug, Clone)]
pub struct ZoneState {
    pub blueprint: ZoneBlueprint,
    pub resources: Vec<ResourceNode>,
    pub mobs: Vec<Mob>,
    pub interactables: Vec<Interactable>,
    pub fires: Vec<Fire>,
    pub ground_loot: Vec<GroundLootPile>,
    /// Set once the hostile layout has been generated.
    pub populated: bool,
    pub boss: BossState,
}

impl ZoneState {
    pub fn new(blueprint: ZoneBlueprint) -> Self {
        Self {
            blueprint,
            resources: Vec::new(),
            mobs: Vec::new(),
            interactables: Vec::new(),
            fires: Vec::new(),
            ground_loot: Vec::new(),
            populated: false,
            boss: BossState::Dormant,
        }
    }

    pub fn key(&self) -> ZoneKey {
        self.blueprint.key
    }

    pub fn grid(&self) -> &TileGrid {
        &self.blueprint.grid
    }

    pub fn clear(&mut self) {
        self.resources.clear();
        self.mobs.clear();
        self.fires.clear();
        self.ground_loot.clear();
        for interactable in &mut self.interactables {
            interactable.open = false;
            interactable.lit = false;
        }
        self.populated = false;
        self.boss = BossState::Dormant;
    }

    pub fn interactable_at(&self, pos: TilePos) -> Option<&Interactable> {
        self.interactables.iter().find(|fixture| fixture.pos == pos)
    }

    pub fn interactable(&self, id: &str) -> Option<&Interactable> {
        self.interactables.iter().find(|fixture| fixture.id == id)
    }

    pub fn interactable_mut(&mut self, id: &str) -> Option<&mut Interactable> {
        self.interactables.iter_mut().find(|fixture| fixture.id == id)
    }

    pub fn resource_at(&self, pos: TilePos) -> Option<&ResourceNode> {
        self.resources.iter().find(|node| node.pos == pos)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut ResourceNode> {
        self.resources.iter_mut().find(|node| node.id == id)
    }

    pub fn live_mob_at(&self, pos: TilePos) -> Option<&Mob> {
        self.mobs.iter().find(|mob| mob.alive && mob.pos == pos)
    }

    pub fn mob(&self, id: &str) -> Option<&Mob> {
        self.mobs.iter().find(|mob| mob.id == id)
    }

    pub fn mob_mut(&mut self, id: &str) -> Option<&mut Mob> {
        self.mobs.iter_mut().find(|mob| mob.id == id)
    }

    pub fn fire_at(&self, pos: TilePos) -> Option<&Fire> {
        self.fires.iter().find(|fire| fire.pos == pos)
    }

    /// Fixtures and standing resource nodes block movement; depleted nodes do not.
    pub fn is_blocked(&self, pos: TilePos) -> bool {
        self.interactable_at(pos).is_some()
            || self.resources.iter().any(|node| node.alive && node.pos == pos)
    }

    pub fn is_free_for_mob(&self, pos: TilePos, mob_id: &str) -> bool {
        self.grid().is_walkable(pos)
            && !self.is_blocked(pos)
            && !self
                .mobs
                .iter()
                .any(|mob| mob.alive && mob.pos == pos && mob.id != mob_id)
    }

    /// Revives resources and mobs whose timers elapsed and drops expired fires.
    pub fn tick_timers(&mut self, now: SimInstant) -> ZoneTimerReport {
        let mut report = ZoneTimerReport::default();
        for node in &mut self.resources {
            if !node.alive && node.respawn_at.has_passed(now) {
                node.alive = true;
                report.revived_resources += 1;
            }
        }
        for mob in &mut self.mobs {
            if !mob.alive && mob.respawn_at.has_passed(now) {
                mob.revive();
                report.revived_mobs.push(mob.id.clone());
            }
        }
        let before = self.fires.len();
        self.fires.retain(|fire| !fire.expires_at.has_passed(now));
        report.expired_fires = before - self.fires.len();
        report
    }

    pub fn prune_expired_loot(&mut self, now: SimInstant) -> usize {
        let before = self.ground_loot.len();
        self.ground_loot.retain(|pile| !pile.is_expired(now));
        before - self.ground_loot.len()
    }

    /// Adds to the pile on `pos`, creating it when needed. Dropping refreshes the expiry.
    pub fn drop_loot(&mut self, pos: TilePos, item: &str, qty: u32, now: SimInstant) {
        if qty == 0 {
            return;
        }
        self.prune_expired_loot(now);
        let expires_at = now.after_ms(LOOT_TTL_MS);
        if let Some(pile) = self.ground_loot.iter_mut().find(|pile| pile.pos == pos) {
            let entry = pile.items.entry(item.to_string()).or_insert(0);
            *entry = entry.saturating_add(qty);
            pile.expires_at = expires_at;
            return;
        }
        let mut items = BTreeMap::new();
        items.insert(item.to_string(), qty);
        self.ground_loot.push(GroundLootPile {
            pos,
            items,
            created_at: now,
            expires_at,
        });
    }

    pub fn loot_at(&mut self, pos: TilePos, now: SimInstant) -> Option<&GroundLootPile> {
        self.prune_expired_loot(now);
        self.ground_loot.iter().find(|pile| pile.pos == pos)
    }

    pub fn loot_at_mut(&mut self, pos: TilePos, now: SimInstant) -> Option<&mut GroundLootPile> {
        self.prune_expired_loot(now);
        self.ground_loot.iter_mut().find(|pile| pile.pos == pos)
    }

    pub fn remove_empty_loot(&mut self) {
        self.ground_loot.retain(|pile| !pile.items.is_empty());
    }
}

/// Every zone keyed by [`ZoneKey`] plus the one active key.
///
/// Navigation caches observe [`ZoneRegistry::nav_generation`] and rebuild when it moves.
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    /// Indexed by `ZoneKey as usize`; every key has a slot.
    zones: Vec<ZoneState>,
    active: ZoneKey,
    nav_generation: u64,
}

impl ZoneRegistry {
    /// Builds every zone from its blueprint with empty collections; overworld active.
    pub fn new() -> Result<Self, TilemapError> {
        let zones = ZoneKey::ALL
            .into_iter()
            .map(|key| ZoneBlueprint::for_zone(key).map(ZoneState::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            zones,
            active: ZoneKey::Overworld,
            nav_generation: 0,
        })
    }

    pub fn get_zone(&self, key: ZoneKey) -> Option<&ZoneState> {
        self.zones.get(key.index())
    }

    pub fn get_zone_mut(&mut self, key: ZoneKey) -> Option<&mut ZoneState> {
        self.zones.get_mut(key.index())
    }

    pub fn active_zone(&self) -> ZoneKey {
        self.active
    }

    /// Returns false when no zone is registered under `key`.
    pub fn set_active_zone(&mut self, key: ZoneKey) -> bool {
        if self.get_zone(key).is_none() {
            return false;
        }
        if self.active != key {
            self.active = key;
            self.nav_generation = self.nav_generation.wrapping_add(1);
            debug!(
                zone = key.key(),
                nav_generation = self.nav_generation,
                "active_zone_changed"
            );
        }
        true
    }

    pub fn nav_generation(&self) -> u64 {
        self.nav_generation
    }

    /// Forces navigation caches to rebuild without changing zones.
    pub fn invalidate_nav(&mut self) {
        self.nav_generation = self.nav_generation.wrapping_add(1);
    }

    pub fn active(&self) -> &ZoneState {
        &self.zones[self.active.index()]
    }

    pub fn active_mut(&mut self) -> &mut ZoneState {
        &mut self.zones[self.active.index()]
    }

    /// Runs `f` against a zone regardless of which one is active.
    pub fn with_zone<R>(&mut self, key: ZoneKey, f: impl FnOnce(&mut ZoneState) -> R) -> Option<R> {
        self.get_zone_mut(key).map(f)
    }

    pub fn reset_zone(&mut self, key: ZoneKey) -> bool {
        let Some(zone) = self.get_zone_mut(key) else {
            return false;
        };
        zone.clear();
        if key == self.active {
            self.invalidate_nav();
        }
        true
    }

    pub fn zones(&self) -> impl Iterator<Item = &ZoneState> {
        self.zones.iter()
    }
}
