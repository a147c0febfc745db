//! Ladders, the sealed gate, braziers and the one-off boss.

use engine::{DefDatabase, SimInstant, TilePos};
use tracing::info;

use crate::content::{MOB_WARDEN_BOSS, OBJECTIVE_UNSEAL_GATE, QUEST_SEALED_DEPTHS};
use crate::entities::{BossState, InteractableKind, LadderDirection, Mob};
use crate::maps::BOSS_SPAWN;
use crate::quests::QuestBook;
use crate::zones::{ZoneKey, ZoneState};

/// Invulnerability granted on arrival through a ladder.
pub const LADDER_INVULN_MS: u64 = 3_000;
pub const BOSS_MOB_ID: &str = "dungeon:warden_boss";
/// Token for the unseal event; the gate only ever unseals once.
pub const GATE_TOKEN: &str = "gate:sealed_gate";

pub fn ladder_destination(from: ZoneKey, direction: LadderDirection) -> Option<ZoneKey> {
    match (from, direction) {
        (ZoneKey::Overworld, LadderDirection::Down) => Some(ZoneKey::Dungeon),
        (ZoneKey::Dungeon, LadderDirection::Up) => Some(ZoneKey::Overworld),
        _ => None,
    }
}

/// The gate is open exactly when the unseal objective is complete.
pub fn gate_open(db: &DefDatabase, quests: &QuestBook) -> bool {
    quests.is_objective_complete(db, QUEST_SEALED_DEPTHS, OBJECTIVE_UNSEAL_GATE)
}

/// Tile on the far side of a gate relative to where the player stands.
pub fn gate_passage(gate: TilePos, player: TilePos) -> TilePos {
    let dx = (gate.x - player.x).signum();
    let dy = (gate.y - player.y).signum();
    if dx != 0 {
        gate.offset(dx, 0)
    } else {
        gate.offset(0, dy)
    }
}

/// Mirrors quest-driven state onto fixtures so snapshots see it.
pub fn sync_gate_flags(zone: &mut ZoneState, open: bool) {
    for fixture in &mut zone.interactables {
        if fixture.kind == InteractableKind::SealedGate {
            fixture.open = open;
        }
    }
}

pub fn braziers_all_lit(zone: &ZoneState) -> bool {
    let mut braziers = zone
        .interactables
        .iter()
        .filter(|fixture| matches!(fixture.kind, InteractableKind::Brazier { .. }))
        .peekable();
    braziers.peek().is_some() && braziers.all(|fixture| fixture.lit)
}

pub fn reset_braziers(zone: &mut ZoneState) {
    for fixture in &mut zone.interactables {
        if matches!(fixture.kind, InteractableKind::Brazier { .. }) {
            fixture.lit = false;
        }
    }
}

pub fn boss_should_spawn(zone: &ZoneState, db: &DefDatabase, quests: &QuestBook) -> bool {
    zone.boss == BossState::Dormant
        && gate_open(db, quests)
        && braziers_all_lit(zone)
        && quests.is_started(QUEST_SEALED_DEPTHS)
        && !quests.is_completed(QUEST_SEALED_DEPTHS)
}

/// Places the boss and flips the zone to `Spawned`. Returns false if the boss def is missing.
pub fn spawn_boss(zone: &mut ZoneState, db: &DefDatabase, now: SimInstant) -> bool {
    let Some(def) = db.mob(MOB_WARDEN_BOSS) else {
        return false;
    };
    let home = if zone.is_free_for_mob(BOSS_SPAWN, BOSS_MOB_ID) {
        BOSS_SPAWN
    } else {
        BOSS_SPAWN
            .neighbors8()
            .into_iter()
            .find(|pos| zone.is_free_for_mob(*pos, BOSS_MOB_ID))
            .unwrap_or(BOSS_SPAWN)
    };
    zone.mobs.retain(|mob| mob.id != BOSS_MOB_ID);
    zone.mobs.push(Mob::spawn(BOSS_MOB_ID, def, home));
    zone.boss = BossState::Spawned;
    info!(zone = zone.key().key(), at_ms = now.as_ms(), "boss_spawned");
    true
}

/// Removes the boss entirely and resets the braziers.
pub fn boss_defeated(zone: &mut ZoneState, now: SimInstant) {
    zone.mobs.retain(|mob| mob.id != BOSS_MOB_ID);
    zone.boss = BossState::Defeated;
    reset_braziers(zone);
    info!(zone = zone.key().key(), at_ms = now.as_ms(), "boss_defeated");
}

#[cfg(test)]
mod tests {
    use crate::content::builtin_def_database;
    use crate::maps::GATE_POS;
    use crate::seeding::seed_interactables;
    use crate::zones::ZoneRegistry;

    use super::*;

    fn dungeon() -> ZoneState {
        let mut registry = ZoneRegistry::new().expect("registry");
        seed_interactables(&mut registry);
        registry
            .get_zone(ZoneKey::Dungeon)
            .expect("dungeon")
            .clone()
    }

    #[test]
    fn ladders_only_lead_one_way_per_zone() {
        assert_eq!(
            ladder_destination(ZoneKey::Overworld, LadderDirection::Down),
            Some(ZoneKey::Dungeon)
        );
        assert_eq!(
            ladder_destination(ZoneKey::Dungeon, LadderDirection::Up),
            Some(ZoneKey::Overworld)
        );
        assert_eq!(ladder_destination(ZoneKey::Overworld, LadderDirection::Up), None);
    }

    #[test]
    fn passage_lands_on_the_far_side() {
        assert_eq!(gate_passage(GATE_POS, GATE_POS.offset(-1, 0)), GATE_POS.offset(1, 0));
        assert_eq!(gate_passage(GATE_POS, GATE_POS.offset(1, 0)), GATE_POS.offset(-1, 0));
    }

    #[test]
    fn boss_needs_gate_braziers_and_quest() {
        let db = builtin_def_database().expect("defs");
        let mut zone = dungeon();
        let mut quests = QuestBook::new();
        assert!(!braziers_all_lit(&zone));
        for fixture in &mut zone.interactables {
            fixture.lit = true;
        }
        assert!(braziers_all_lit(&zone));
        assert!(!boss_should_spawn(&zone, &db, &quests));

        quests
            .start_quest(&db, "first_watch", SimInstant(0))
            .expect("first_watch");
        assert!(!boss_should_spawn(&zone, &db, &quests));
    }

    #[test]
    fn defeat_removes_boss_and_resets_braziers() {
        let db = builtin_def_database().expect("defs");
        let mut zone = dungeon();
        for fixture in &mut zone.interactables {
            fixture.lit = true;
        }
        assert!(spawn_boss(&mut zone, &db, SimInstant(0)));
        assert_eq!(zone.boss, BossState::Spawned);
        assert!(zone.mob(BOSS_MOB_ID).is_some());

        boss_defeated(&mut zone, SimInstant(10));
        assert_eq!(zone.boss, BossState::Defeated);
        assert!(zone.mob(BOSS_MOB_ID).is_none());
        assert!(!braziers_all_lit(&zone));
    }
}
