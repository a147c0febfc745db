//! Deterministic world population. Every component draws from its own xorshift stream keyed
//! by `world_seed ^ salt`, so adding a mob table never shifts tree placement.

use std::collections::HashSet;

use engine::{DefDatabase, Terrain, TilePos, XorShift32};
use rand::Rng;
use tracing::{debug, warn};

use crate::entities::{Interactable, Mob, ResourceNode};
use crate::maps::{ResourceRegion, ResourceTarget, TileRect, PLAYER_SPAWN};
use crate::zones::{ZoneKey, ZoneRegistry, ZoneState};

/// Bumped whenever resource placement rules change; saves from another layout regenerate.
pub const RESOURCE_LAYOUT_VERSION: u32 = 3;

/// Used when neither the environment nor a save names a seed.
pub const DEFAULT_WORLD_SEED: u32 = 0x00C0_FFEE;

pub const SALT_RESOURCES: u32 = 0x5EED_0001;
pub const SALT_MOBS: u32 = 0x5EED_0002;
pub const SALT_COMBAT: u32 = 0x5EED_0003;
pub const SALT_AI: u32 = 0x5EED_0004;

const MAX_ATTEMPTS_PER_NODE: u32 = 40;
const JITTER: i32 = 2;

pub fn zone_salt(base: u32, key: ZoneKey) -> u32 {
    match key {
        ZoneKey::Overworld => base,
        ZoneKey::Dungeon => base ^ 0x0100_0000,
    }
}

/// Places every zone's fixed fixtures from its blueprint.
pub fn seed_interactables(registry: &mut ZoneRegistry) {
    for key in ZoneKey::ALL {
        registry.with_zone(key, |zone| {
            zone.interactables = zone
                .blueprint
                .fixtures
                .iter()
                .map(|spec| Interactable::new(spec.id, spec.kind.clone(), spec.pos))
                .collect();
        });
    }
}

/// Regenerates resource nodes in every zone.
pub fn seed_resources(registry: &mut ZoneRegistry, world_seed: u32) -> usize {
    let mut total = 0;
    for key in ZoneKey::ALL {
        total += registry
            .with_zone(key, |zone| seed_zone_resources(zone, world_seed))
            .unwrap_or(0);
    }
    total
}

pub fn seed_zone_resources(zone: &mut ZoneState, world_seed: u32) -> usize {
    let mut rng = XorShift32::salted(world_seed, zone_salt(SALT_RESOURCES, zone.key()));
    let reserved = reserved_tiles(zone);
    zone.resources.clear();

    for target in zone.blueprint.resource_targets {
        let regions = regions_for(zone.blueprint.resource_regions, target);
        let mut placed = 0u32;
        let mut attempts = 0u32;
        let max_attempts = target.count.saturating_mul(MAX_ATTEMPTS_PER_NODE);

        while placed < target.count && attempts < max_attempts && !regions.is_empty() {
            attempts += 1;
            let region = pick_weighted(&mut rng, &regions);
            let anchor = random_tile_in(&mut rng, region.rect);
            let pos = anchor.offset(
                rng.gen_range(-JITTER..=JITTER),
                rng.gen_range(-JITTER..=JITTER),
            );
            if !region.rect.contains(pos) {
                continue;
            }
            if accepts_resource(zone, &reserved, target, pos, target.min_spacing) {
                push_resource(zone, target, placed, pos);
                placed += 1;
            }
        }

        if placed < target.count {
            let missing = target.count - placed;
            placed += scatter_resources(zone, &reserved, target, placed, &mut rng);
            debug!(
                zone = zone.key().key(),
                kind = target.kind.key(),
                missing,
                placed,
                "resource_fallback_scatter"
            );
        }
    }

    debug!(
        zone = zone.key().key(),
        resources = zone.resources.len(),
        "resources_seeded"
    );
    zone.resources.len()
}

/// Places the zone's hostile layout and marks it populated.
pub fn seed_mobs(zone: &mut ZoneState, db: &DefDatabase, world_seed: u32) -> usize {
    let mut rng = XorShift32::salted(world_seed, zone_salt(SALT_MOBS, zone.key()));
    let reserved = reserved_tiles(zone);
    zone.mobs.clear();

    for spawn in zone.blueprint.mob_spawns {
        let Some(def) = db.mob(spawn.mob) else {
            warn!(
                zone = zone.key().key(),
                mob = spawn.mob,
                "mob_spawn_unknown_def"
            );
            continue;
        };
        for index in 0..spawn.count {
            let mut home = None;
            for _ in 0..MAX_ATTEMPTS_PER_NODE {
                let pos = random_tile_in(&mut rng, spawn.region);
                if accepts_mob(zone, &reserved, pos) {
                    home = Some(pos);
                    break;
                }
            }
            let home = home.or_else(|| {
                spawn
                    .region
                    .tiles()
                    .find(|pos| accepts_mob(zone, &reserved, *pos))
            });
            let Some(home) = home else {
                warn!(
                    zone = zone.key().key(),
                    mob = spawn.mob,
                    "mob_spawn_no_space"
                );
                continue;
            };
            let id = format!("{}:{}:{index}", zone.key().key(), def.def_name);
            zone.mobs.push(Mob::spawn(id, def, home));
        }
    }

    zone.populated = true;
    debug!(zone = zone.key().key(), mobs = zone.mobs.len(), "mobs_seeded");
    zone.mobs.len()
}

fn reserved_tiles(zone: &ZoneState) -> HashSet<TilePos> {
    let mut reserved = HashSet::new();
    let mut anchors = vec![zone.blueprint.entry_point];
    if zone.key() == ZoneKey::Overworld {
        anchors.push(PLAYER_SPAWN);
    }
    anchors.extend(zone.blueprint.fixtures.iter().map(|fixture| fixture.pos));
    for anchor in anchors {
        reserved.insert(anchor);
        reserved.extend(anchor.neighbors4());
    }
    reserved
}

fn regions_for(
    regions: &'static [ResourceRegion],
    target: &ResourceTarget,
) -> Vec<(&'static ResourceRegion, u32)> {
    regions
        .iter()
        .filter_map(|region| {
            region
                .kinds
                .iter()
                .find(|(kind, _)| *kind == target.kind)
                .map(|(_, weight)| (region, region.weight.saturating_mul(*weight)))
        })
        .filter(|(_, weight)| *weight > 0)
        .collect()
}

fn pick_weighted<'a>(
    rng: &mut XorShift32,
    regions: &[(&'a ResourceRegion, u32)],
) -> &'a ResourceRegion {
    let total: u32 = regions.iter().map(|(_, weight)| *weight).sum();
    let mut roll = rng.gen_range(0..total);
    for (region, weight) in regions {
        if roll < *weight {
            return region;
        }
        roll -= weight;
    }
    regions[regions.len() - 1].0
}

fn random_tile_in(rng: &mut XorShift32, rect: TileRect) -> TilePos {
    TilePos::new(
        rng.gen_range(rect.min.x..=rect.max.x),
        rng.gen_range(rect.min.y..=rect.max.y),
    )
}

fn accepts_resource(
    zone: &ZoneState,
    reserved: &HashSet<TilePos>,
    target: &ResourceTarget,
    pos: TilePos,
    min_spacing: u32,
) -> bool {
    let blueprint = &zone.blueprint;
    if blueprint.grid.terrain_at(pos) != Some(blueprint.ground) {
        return false;
    }
    if blueprint.in_building(pos) || blueprint.in_safe_zone(pos) || reserved.contains(&pos) {
        return false;
    }
    !zone.resources.iter().any(|node| {
        node.pos == pos || (node.kind == target.kind && node.pos.chebyshev(pos) < min_spacing)
    })
}

/// Walks every tile from a random start with spacing relaxed to "not the same tile".
fn scatter_resources(
    zone: &mut ZoneState,
    reserved: &HashSet<TilePos>,
    target: &ResourceTarget,
    already_placed: u32,
    rng: &mut XorShift32,
) -> u32 {
    let tile_count = zone.grid().width() as usize * zone.grid().height() as usize;
    if tile_count == 0 {
        return 0;
    }
    let start = rng.gen_range(0..tile_count);
    let mut placed = 0u32;
    for step in 0..tile_count {
        if already_placed + placed >= target.count {
            break;
        }
        let pos = zone.grid().pos_of_index((start + step) % tile_count);
        if accepts_resource(zone, reserved, target, pos, 1) {
            push_resource(zone, target, already_placed + placed, pos);
            placed += 1;
        }
    }
    placed
}

fn push_resource(zone: &mut ZoneState, target: &ResourceTarget, index: u32, pos: TilePos) {
    let id = format!("{}:{}:{index}", zone.key().key(), target.kind.key());
    zone.resources.push(ResourceNode::new(id, target.kind, pos));
}

fn accepts_mob(zone: &ZoneState, reserved: &HashSet<TilePos>, pos: TilePos) -> bool {
    let blueprint = &zone.blueprint;
    let Some(terrain) = blueprint.grid.terrain_at(pos) else {
        return false;
    };
    terrain.is_walkable()
        && terrain != Terrain::Path
        && !blueprint.in_safe_zone(pos)
        && !reserved.contains(&pos)
        && !zone.is_blocked(pos)
        && zone.live_mob_at(pos).is_none()
}

#[cfg(test)]
mod tests {
    use crate::content::builtin_def_database;
    use crate::entities::ResourceKind;

    use super::*;

    fn seeded_registry(seed: u32) -> ZoneRegistry {
        let mut registry = ZoneRegistry::new().expect("registry");
        seed_interactables(&mut registry);
        seed_resources(&mut registry, seed);
        registry
    }

    #[test]
    fn same_seed_same_layout() {
        let a = seeded_registry(1234);
        let b = seeded_registry(1234);
        let c = seeded_registry(4321);
        let positions = |registry: &ZoneRegistry| {
            registry
                .active()
                .resources
                .iter()
                .map(|node| (node.id.clone(), node.pos))
                .collect::<Vec<_>>()
        };
        assert_eq!(positions(&a), positions(&b));
        assert_ne!(positions(&a), positions(&c));
    }

    #[test]
    fn density_targets_are_met_and_rules_hold() {
        let registry = seeded_registry(7);
        let zone = registry.active();
        for target in zone.blueprint.resource_targets {
            let count = zone
                .resources
                .iter()
                .filter(|node| node.kind == target.kind)
                .count();
            assert_eq!(count, target.count as usize, "{}", target.kind.key());
        }
        let mut seen = HashSet::new();
        for node in &zone.resources {
            assert!(seen.insert(node.pos), "two nodes on {:?}", node.pos);
            assert_eq!(zone.grid().terrain_at(node.pos), Some(Terrain::Open));
            assert!(!zone.blueprint.in_safe_zone(node.pos));
            assert!(!zone.blueprint.in_building(node.pos));
            assert!(zone.interactable_at(node.pos).is_none());
        }
    }

    #[test]
    fn dungeon_veins_grow_on_floor() {
        let registry = seeded_registry(99);
        let dungeon = registry.get_zone(ZoneKey::Dungeon).expect("dungeon");
        assert_eq!(dungeon.resources.len(), 2);
        assert!(dungeon
            .resources
            .iter()
            .all(|node| node.kind == ResourceKind::IronVein));
    }

    #[test]
    fn mob_seeding_fills_tables_and_marks_populated() {
        let db = builtin_def_database().expect("defs");
        let mut registry = seeded_registry(5);
        let count = registry
            .with_zone(ZoneKey::Overworld, |zone| seed_mobs(zone, &db, 5))
            .expect("overworld");
        assert_eq!(count, 7);
        let zone = registry.active();
        assert!(zone.populated);
        for mob in &zone.mobs {
            assert_eq!(mob.pos, mob.home);
            assert!(!zone.blueprint.in_safe_zone(mob.pos));
            assert!(zone.grid().is_walkable(mob.pos));
        }
        assert!(zone.mob("overworld:rat:0").is_some());
        assert!(zone.mob("overworld:goblin:2").is_some());
    }
}
