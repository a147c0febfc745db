//! Per-tick hostile behavior for the active zone's mobs.

use std::ops::RangeInclusive;

use engine::{DefDatabase, MobDef, SimInstant, TilePos, XorShift32};
use rand::Rng;
use tracing::debug;

use crate::combat::{mob_accuracy, roll_attack};
use crate::zones::ZoneState;

/// Passive mobs fight back for this long after being hit.
pub const PROVOKE_MS: u64 = 10_000;
/// Engagement lapses this long after the mob last had a reason to fight.
pub const AGGRO_HOLD_MS: u64 = 6_000;
pub const ROAM_RADIUS: u32 = 3;
pub const ROAM_COOLDOWN_MS: RangeInclusive<u64> = 3_000..=8_000;

/// What the AI needs to know about the player this tick.
#[derive(Debug, Clone, Copy)]
pub struct PlayerTarget {
    pub pos: TilePos,
    pub alive: bool,
    pub invulnerable: bool,
    pub defence: i32,
    pub damage_reduction: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiReport {
    pub damage_to_player: u32,
    pub hits: u32,
    pub misses: u32,
    pub suppressed: u32,
    pub engaged: Vec<String>,
    pub disengaged: Vec<String>,
}

pub fn tick_mobs(
    zone: &mut ZoneState,
    db: &DefDatabase,
    player: &PlayerTarget,
    now: SimInstant,
    combat_rng: &mut XorShift32,
    roam_rng: &mut XorShift32,
) -> AiReport {
    let mut report = AiReport::default();
    for index in 0..zone.mobs.len() {
        if !zone.mobs[index].alive {
            continue;
        }
        let Some(def) = db.mob(&zone.mobs[index].def_name) else {
            continue;
        };
        update_engagement(zone, index, def, player, now, &mut report);
        if zone.mobs[index].ai.target_player {
            pursue(zone, index, def, player, now, combat_rng, &mut report);
        } else {
            idle(zone, index, def, player.pos, now, roam_rng);
        }
    }
    report
}

/// Drops every mob's engagement, e.g. after the player dies or leaves the zone.
pub fn disengage_all(zone: &mut ZoneState) {
    for mob in &mut zone.mobs {
        mob.ai.target_player = false;
        mob.ai.aggro_until = SimInstant::ZERO;
        mob.ai.provoked_until = SimInstant::ZERO;
    }
}

fn update_engagement(
    zone: &mut ZoneState,
    index: usize,
    def: &MobDef,
    player: &PlayerTarget,
    now: SimInstant,
    report: &mut AiReport,
) {
    let player_safe = zone.blueprint.in_safe_zone(player.pos);
    let mob = &mut zone.mobs[index];
    let within_leash =
        mob.pos.chebyshev(mob.home) <= def.leash && player.pos.chebyshev(mob.home) <= def.leash;
    let can_engage = player.alive && !player_safe && within_leash;
    let in_sight = def.aggressive && mob.pos.chebyshev(player.pos) <= def.aggro_range;
    let provoked = !mob.ai.provoked_until.has_passed(now);

    if mob.ai.target_player {
        let lapsed = mob.ai.aggro_until.has_passed(now) && !in_sight && !provoked;
        if !can_engage || lapsed {
            mob.ai.target_player = false;
            mob.ai.aggro_until = SimInstant::ZERO;
            mob.ai.provoked_until = SimInstant::ZERO;
            debug!(mob = %mob.id, player_safe, within_leash, "mob_disengaged");
            report.disengaged.push(mob.id.clone());
        } else if in_sight || provoked {
            mob.ai.aggro_until = now.after_ms(AGGRO_HOLD_MS);
        }
    } else if can_engage && (in_sight || provoked) {
        mob.ai.target_player = true;
        mob.ai.aggro_until = now.after_ms(AGGRO_HOLD_MS);
        debug!(mob = %mob.id, provoked, "mob_engaged");
        report.engaged.push(mob.id.clone());
    }
}

fn pursue(
    zone: &mut ZoneState,
    index: usize,
    def: &MobDef,
    player: &PlayerTarget,
    now: SimInstant,
    combat_rng: &mut XorShift32,
    report: &mut AiReport,
) {
    let distance = zone.mobs[index].pos.manhattan(player.pos);
    if distance == 0 {
        displace(zone, index, player.pos);
        return;
    }

    if distance <= def.attack_range {
        let mob = &mut zone.mobs[index];
        if !mob.ai.next_attack_at.has_passed(now) {
            return;
        }
        mob.ai.next_attack_at = now.after_ms(def.attack_cooldown_ms);
        if player.invulnerable {
            report.suppressed += 1;
            return;
        }
        let roll = roll_attack(
            combat_rng,
            mob_accuracy(def),
            player.defence,
            def.max_hit,
            player.damage_reduction,
        );
        if roll.hit {
            report.hits += 1;
            report.damage_to_player = report.damage_to_player.saturating_add(roll.damage);
        } else {
            report.misses += 1;
        }
        return;
    }

    if !zone.mobs[index].ai.next_move_at.has_passed(now) {
        return;
    }
    if let Some(step) = greedy_step(zone, index, player.pos, player.pos) {
        zone.mobs[index].pos = step;
    }
    zone.mobs[index].ai.next_move_at = now.after_ms(def.move_cooldown_ms);
}

fn idle(
    zone: &mut ZoneState,
    index: usize,
    def: &MobDef,
    player_pos: TilePos,
    now: SimInstant,
    roam_rng: &mut XorShift32,
) {
    if !zone.mobs[index].ai.next_move_at.has_passed(now) {
        return;
    }
    let roaming = zone.blueprint.roaming;
    let radius = if roaming { ROAM_RADIUS } else { 0 };
    let (pos, home) = (zone.mobs[index].pos, zone.mobs[index].home);

    if pos.chebyshev(home) > radius {
        if let Some(step) = greedy_step(zone, index, home, player_pos) {
            zone.mobs[index].pos = step;
        }
        zone.mobs[index].ai.next_move_at = now.after_ms(def.move_cooldown_ms);
        return;
    }

    if !roaming || !zone.mobs[index].ai.next_roam_at.has_passed(now) {
        return;
    }
    let options = pos
        .neighbors4()
        .into_iter()
        .filter(|candidate| {
            *candidate != player_pos
                && candidate.chebyshev(home) <= ROAM_RADIUS
                && zone.is_free_for_mob(*candidate, &zone.mobs[index].id)
        })
        .collect::<Vec<_>>();
    if !options.is_empty() {
        zone.mobs[index].pos = options[roam_rng.gen_range(0..options.len())];
    }
    let mob = &mut zone.mobs[index];
    mob.ai.next_roam_at = now.after_ms(roam_rng.gen_range(ROAM_COOLDOWN_MS));
    mob.ai.next_move_at = now.after_ms(def.move_cooldown_ms);
}

/// Best 4-neighbor strictly closer to `goal` by Manhattan distance, never onto `avoid`.
fn greedy_step(zone: &ZoneState, index: usize, goal: TilePos, avoid: TilePos) -> Option<TilePos> {
    let mob = &zone.mobs[index];
    let current = mob.pos.manhattan(goal);
    let mut best: Option<(u32, TilePos)> = None;
    for candidate in mob.pos.neighbors4() {
        if candidate == avoid || !zone.is_free_for_mob(candidate, &mob.id) {
            continue;
        }
        let distance = candidate.manhattan(goal);
        if distance < current && best.map_or(true, |(best_distance, _)| distance < best_distance)
        {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, tile)| tile)
}

/// Moves a mob off the player's tile: free 4-neighbor, then 8-neighbor, then home.
fn displace(zone: &mut ZoneState, index: usize, player_pos: TilePos) {
    let (id, pos, home) = {
        let mob = &zone.mobs[index];
        (mob.id.clone(), mob.pos, mob.home)
    };
    let free = |candidate: &TilePos| *candidate != player_pos && zone.is_free_for_mob(*candidate, &id);
    let destination = pos
        .neighbors4()
        .into_iter()
        .find(free)
        .or_else(|| pos.neighbors8().into_iter().find(free))
        .unwrap_or(home);
    debug!(mob = %id, from = ?pos, to = ?destination, "mob_displaced");
    zone.mobs[index].pos = destination;
}

#[cfg(test)]
mod tests {
    use crate::content::builtin_def_database;
    use crate::entities::Mob;
    use crate::maps::{PLAYER_SPAWN, TOWN};
    use crate::zones::{ZoneKey, ZoneRegistry};

    use super::*;

    fn zone_with_mob(mob: &str, home: TilePos) -> (ZoneState, DefDatabase) {
        let db = builtin_def_database().expect("defs");
        let registry = ZoneRegistry::new().expect("registry");
        let mut zone = registry
            .get_zone(ZoneKey::Overworld)
            .expect("overworld")
            .clone();
        let def = db.mob(mob).expect("mob def");
        zone.mobs.push(Mob::spawn(format!("test:{mob}"), def, home));
        (zone, db)
    }

    fn player_at(pos: TilePos) -> PlayerTarget {
        PlayerTarget {
            pos,
            alive: true,
            invulnerable: false,
            defence: 9,
            damage_reduction: 0,
        }
    }

    fn rngs() -> (XorShift32, XorShift32) {
        (XorShift32::new(1), XorShift32::new(2))
    }

    #[test]
    fn aggressive_mob_engages_and_closes_distance() {
        let (mut zone, db) = zone_with_mob("goblin", TilePos::new(30, 10));
        let player = player_at(TilePos::new(30, 13));
        let (mut combat, mut roam) = rngs();
        let report = tick_mobs(&mut zone, &db, &player, SimInstant(0), &mut combat, &mut roam);
        assert_eq!(report.engaged, vec!["test:goblin".to_string()]);
        assert_eq!(zone.mobs[0].pos, TilePos::new(30, 11));

        tick_mobs(&mut zone, &db, &player, SimInstant(700), &mut combat, &mut roam);
        assert_eq!(zone.mobs[0].pos, TilePos::new(30, 12));
        assert_eq!(zone.mobs[0].pos.manhattan(player.pos), 1);
    }

    #[test]
    fn passive_mob_ignores_player_until_provoked() {
        let (mut zone, db) = zone_with_mob("rat", TilePos::new(20, 10));
        let player = player_at(TilePos::new(20, 11));
        let (mut combat, mut roam) = rngs();
        tick_mobs(&mut zone, &db, &player, SimInstant(0), &mut combat, &mut roam);
        assert!(!zone.mobs[0].ai.target_player);

        zone.mobs[0].ai.provoked_until = SimInstant(100).after_ms(PROVOKE_MS);
        zone.mobs[0].pos = TilePos::new(20, 10);
        let report = tick_mobs(&mut zone, &db, &player, SimInstant(100), &mut combat, &mut roam);
        assert_eq!(report.engaged.len(), 1);
        assert_eq!(report.hits + report.misses, 1);
    }

    #[test]
    fn safe_zone_breaks_engagement() {
        let (mut zone, db) = zone_with_mob("goblin", TilePos::new(15, 8));
        zone.mobs[0].ai.target_player = true;
        zone.mobs[0].ai.aggro_until = SimInstant(10_000);
        let player = player_at(TilePos::new(TOWN.max.x, 8));
        let (mut combat, mut roam) = rngs();
        let report = tick_mobs(&mut zone, &db, &player, SimInstant(0), &mut combat, &mut roam);
        assert_eq!(report.disengaged, vec!["test:goblin".to_string()]);
        assert!(!zone.mobs[0].ai.target_player);
    }

    #[test]
    fn leash_breaks_engagement() {
        let (mut zone, db) = zone_with_mob("goblin", TilePos::new(30, 5));
        zone.mobs[0].ai.target_player = true;
        zone.mobs[0].ai.aggro_until = SimInstant(10_000);
        let player = player_at(TilePos::new(30, 20));
        let (mut combat, mut roam) = rngs();
        tick_mobs(&mut zone, &db, &player, SimInstant(0), &mut combat, &mut roam);
        assert!(!zone.mobs[0].ai.target_player);
    }

    #[test]
    fn invulnerable_player_takes_no_damage() {
        let (mut zone, db) = zone_with_mob("goblin", TilePos::new(30, 10));
        let mut player = player_at(TilePos::new(30, 11));
        player.invulnerable = true;
        let (mut combat, mut roam) = rngs();
        let report = tick_mobs(&mut zone, &db, &player, SimInstant(0), &mut combat, &mut roam);
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.damage_to_player, 0);
    }

    #[test]
    fn overlapping_mob_is_pushed_to_a_free_neighbor() {
        let (mut zone, db) = zone_with_mob("goblin", TilePos::new(30, 10));
        let player = player_at(TilePos::new(30, 10));
        let (mut combat, mut roam) = rngs();
        tick_mobs(&mut zone, &db, &player, SimInstant(0), &mut combat, &mut roam);
        assert_eq!(zone.mobs[0].pos.manhattan(player.pos), 1);
    }

    #[test]
    fn idle_mobs_stay_near_home() {
        let (mut zone, db) = zone_with_mob("rat", TilePos::new(20, 20));
        let player = player_at(PLAYER_SPAWN);
        let (mut combat, mut roam) = rngs();
        for step in 0..200u64 {
            tick_mobs(&mut zone, &db, &player, SimInstant(step * 500), &mut combat, &mut roam);
            let mob = &zone.mobs[0];
            assert!(mob.pos.chebyshev(mob.home) <= ROAM_RADIUS);
        }
    }
}
