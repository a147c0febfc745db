use std::sync::Arc;

use engine::{BlobStore, MemoryBlobStore};
use game::content::{builtin_def_database, ITEM_KEY_FRAGMENT, QUEST_FIRST_WATCH, QUEST_SEALED_DEPTHS};
use game::debug::inventory_qty;
use game::entities::{BossState, LadderDirection};
use game::maps::{BRAZIER_EAST_POS, BRAZIER_WEST_POS, GATE_POS, OVERWORLD_ENTRY};
use game::persistence::SAVE_KEY;
use game::quests::QuestStatus;
use game::zone_flow::BOSS_MOB_ID;
use game::{GameSession, PlayerClass, QuestEvent, TeleportOptions, ZoneKey};

const DT_MS: u64 = 50;

fn new_session(seed: u32) -> GameSession {
    let db = Arc::new(builtin_def_database().expect("builtin defs"));
    GameSession::new(db, seed, PlayerClass::Warrior).expect("session")
}

fn complete_first_watch(session: &mut GameSession) {
    session.start_quest(QUEST_FIRST_WATCH).expect("start first_watch");
    for index in 0..3 {
        session.track_quest_event(&QuestEvent::GatherItem {
            item: "logs".to_string(),
            qty: 1,
            token: Some(format!("test:gather:{index}")),
        });
    }
    for index in 0..2 {
        session.track_quest_event(&QuestEvent::KillMob {
            mob: "rat".to_string(),
            qty: 1,
            token: Some(format!("test:kill:{index}")),
        });
    }
    for index in 0..2 {
        session.track_quest_event(&QuestEvent::TalkNpc {
            npc: "quartermaster".to_string(),
            qty: 1,
            token: Some(format!("test:talk:{index}")),
        });
    }
    assert!(session.state().quests.is_completed(QUEST_FIRST_WATCH));
}

fn tick(session: &mut GameSession, ticks: u32) {
    for _ in 0..ticks {
        session.update(DT_MS);
    }
}

fn place(session: &mut GameSession, x: i32, y: i32) {
    let options = TeleportOptions {
        require_walkable: true,
        invuln_ms: 60_000,
    };
    assert!(session.teleport(x, y, options), "cannot stand at {x},{y}");
}

#[test]
fn completed_quest_survives_repeated_loads_without_paying_twice() {
    let mut session = new_session(11);
    let starting_gold = session.state().wallet.gold();
    complete_first_watch(&mut session);
    assert_eq!(inventory_qty(&session, ITEM_KEY_FRAGMENT), 1);
    let gold = session.state().wallet.gold();
    assert_eq!(gold, starting_gold + 50);

    let mut store = MemoryBlobStore::new();
    session.save(&mut store).expect("save");
    for _ in 0..2 {
        let report = session.load(&store).expect("load");
        assert!(report.ok);
        assert!(!report.repaired, "unexpected repairs: {:?}", report.reasons);
        assert_eq!(inventory_qty(&session, ITEM_KEY_FRAGMENT), 1);
        assert_eq!(session.state().wallet.gold(), gold);
        assert!(session.state().quests.is_completed(QUEST_FIRST_WATCH));
    }
}

#[test]
fn replayed_tokens_never_advance_an_objective_twice() {
    let mut session = new_session(3);
    session.start_quest(QUEST_FIRST_WATCH).expect("start");
    let event = QuestEvent::GatherItem {
        item: "logs".to_string(),
        qty: 1,
        token: Some("tree:7:first".to_string()),
    };

    let first = session.track_quest_event(&event);
    assert_eq!(first.advanced.len(), 1);
    let replay = session.track_quest_event(&event);
    assert!(replay.advanced.is_empty());
    assert_eq!(replay.duplicate_tokens, 1);
    assert_eq!(
        session
            .state()
            .quests
            .objective_count(QUEST_FIRST_WATCH, "gather_logs"),
        1
    );

    let mut store = MemoryBlobStore::new();
    session.save(&mut store).expect("save");
    session.load(&store).expect("load");
    let after_load = session.track_quest_event(&event);
    assert_eq!(after_load.duplicate_tokens, 1);
    assert_eq!(
        session
            .state()
            .quests
            .objective_count(QUEST_FIRST_WATCH, "gather_logs"),
        1
    );
}

#[test]
fn sealed_gate_turns_players_away_until_they_hold_the_key() {
    let mut session = new_session(5);
    assert!(session.use_ladder(LadderDirection::Down));
    place(&mut session, GATE_POS.x - 1, GATE_POS.y);

    let outcome = session.interact_tile(GATE_POS.x, GATE_POS.y);
    assert!(outcome.ok);
    assert_eq!(session.state().player.pos, GATE_POS.offset(-1, 0));
    assert!(session.messages().any(|line| line == "The gate is sealed."));
    let dungeon = session.state().zones.active();
    assert!(!dungeon
        .interactable("sealed_gate")
        .expect("gate fixture")
        .open);

    complete_first_watch(&mut session);
    session
        .start_quest(QUEST_SEALED_DEPTHS)
        .expect("start sealed_depths");
    session.drain_messages();
    session.interact_tile(GATE_POS.x, GATE_POS.y);
    assert_eq!(session.state().player.pos, GATE_POS.offset(1, 0));
    assert!(session
        .state()
        .zones
        .active()
        .interactable("sealed_gate")
        .expect("gate fixture")
        .open);
}

#[test]
fn boss_wakes_once_after_both_braziers_burn() {
    let mut session = new_session(9);
    complete_first_watch(&mut session);
    session
        .start_quest(QUEST_SEALED_DEPTHS)
        .expect("start sealed_depths");
    assert!(session.use_ladder(LadderDirection::Down));
    place(&mut session, GATE_POS.x - 1, GATE_POS.y);
    session.interact_tile(GATE_POS.x, GATE_POS.y);

    place(&mut session, BRAZIER_WEST_POS.x + 1, BRAZIER_WEST_POS.y);
    session.interact_tile(BRAZIER_WEST_POS.x, BRAZIER_WEST_POS.y);
    tick(&mut session, 5);
    let boss_count = |session: &GameSession| {
        session
            .state()
            .zones
            .active()
            .mobs
            .iter()
            .filter(|mob| mob.id == BOSS_MOB_ID)
            .count()
    };
    assert_eq!(boss_count(&session), 0);
    assert_eq!(session.state().zones.active().boss, BossState::Dormant);

    place(&mut session, BRAZIER_EAST_POS.x - 1, BRAZIER_EAST_POS.y);
    session.interact_tile(BRAZIER_EAST_POS.x, BRAZIER_EAST_POS.y);
    // Relighting a burning brazier changes nothing.
    session.interact_tile(BRAZIER_EAST_POS.x, BRAZIER_EAST_POS.y);
    tick(&mut session, 1);
    assert_eq!(boss_count(&session), 1);
    assert_eq!(session.state().zones.active().boss, BossState::Spawned);

    tick(&mut session, 20);
    assert_eq!(boss_count(&session), 1);
    assert_eq!(
        session
            .state()
            .quests
            .objective_count(QUEST_SEALED_DEPTHS, "light_braziers"),
        2
    );
}

#[test]
fn killed_mob_respawns_at_home_with_full_health_and_calm() {
    let mut session = new_session(21);
    let rat_id = session
        .state()
        .zones
        .active()
        .mobs
        .iter()
        .find(|mob| mob.def_name == "rat")
        .map(|mob| mob.id.clone())
        .expect("seeded rat");
    let home = session.state().zones.active().mob(&rat_id).expect("rat").home;
    session.state_mut().player.invulnerable_until = engine::SimInstant::from_ms(u64::MAX);

    assert!(session.attack(&rat_id));
    let mut killed_at = None;
    for _ in 0..6_000 {
        session.update(DT_MS);
        let rat = session.state().zones.active().mob(&rat_id).expect("rat");
        if !rat.alive {
            killed_at = Some(session.now());
            break;
        }
        if session.state().player.attack_target.is_none() {
            session.attack(&rat_id);
        }
    }
    let killed_at = killed_at.expect("rat died");
    let respawn_at = session
        .state()
        .zones
        .active()
        .mob(&rat_id)
        .expect("rat")
        .respawn_at;
    assert_eq!(respawn_at, killed_at.after_ms(15_000));

    while session.now().after_ms(DT_MS) < respawn_at {
        session.update(DT_MS);
    }
    assert!(!session.state().zones.active().mob(&rat_id).expect("rat").alive);

    session.update(DT_MS);
    let now = session.now();
    let rat = session.state().zones.active().mob(&rat_id).expect("rat");
    assert!(rat.alive);
    assert_eq!(rat.hp, rat.max_hp);
    assert_eq!(rat.home, home);
    assert!(!rat.ai.target_player);
    assert!(rat.ai.provoked_until <= now);
    assert!(rat.ai.aggro_until <= now);
}

#[test]
fn zones_keep_their_own_state_across_a_round_trip() {
    let mut session = new_session(13);
    let overworld_mobs = session.state().zones.active().mobs.clone();
    let overworld_resources = session.state().zones.active().resources.clone();
    assert!(!session
        .state()
        .zones
        .get_zone(ZoneKey::Dungeon)
        .expect("dungeon")
        .populated);

    assert!(session.use_ladder(LadderDirection::Down));
    assert_eq!(session.state().zones.active_zone(), ZoneKey::Dungeon);
    let dungeon_ids: Vec<String> = session
        .state()
        .zones
        .active()
        .mobs
        .iter()
        .map(|mob| mob.id.clone())
        .collect();
    assert!(!dungeon_ids.is_empty());
    assert!(dungeon_ids
        .iter()
        .all(|id| overworld_mobs.iter().all(|mob| mob.id != *id)));

    assert!(session.use_ladder(LadderDirection::Up));
    assert_eq!(session.state().player.pos, OVERWORLD_ENTRY);
    assert_eq!(session.state().zones.active().mobs, overworld_mobs);
    assert_eq!(session.state().zones.active().resources, overworld_resources);

    assert!(session.use_ladder(LadderDirection::Down));
    let again: Vec<String> = session
        .state()
        .zones
        .active()
        .mobs
        .iter()
        .map(|mob| mob.id.clone())
        .collect();
    assert_eq!(again, dungeon_ids);
    assert!(!session.use_ladder(LadderDirection::Down));
}

#[test]
fn legacy_save_is_migrated_and_repaired() {
    let mut session = new_session(1);
    let legacy = r#"{
        "v": 1,
        "savedAt": 4000,
        "worldSeed": 77,
        "player": { "x": 8, "y": 10, "hp": 10 },
        "skills": { "woodcutting": 500, "juggling": 40 },
        "inventory": [ { "item": "logs", "qty": 1 }, null, { "item": "moon_rock", "qty": 2 } ],
        "wallet": { "gold": 40 },
        "quests": {
            "first_watch": {
                "startedAt": 0,
                "completedAt": 3000,
                "counters": { "gather_logs": 3 }
            }
        },
        "world": { "resources": [], "fires": [] },
        "groundLoot": []
    }"#;
    let mut store = MemoryBlobStore::new();
    store.put(SAVE_KEY, legacy).expect("put");

    let report = session.load(&store).expect("legacy load");
    assert!(report.ok);
    assert!(report.repaired);
    let mentions = |needle: &str| report.reasons.iter().any(|reason| reason.contains(needle));
    assert!(mentions("resource layout"));
    assert!(mentions("juggling"));
    assert!(mentions("moon_rock"));
    assert!(mentions("counters raised"));

    let state = session.state();
    assert_eq!(state.world_seed, 77);
    assert_eq!(session.now().as_ms(), 4000);
    assert_eq!(state.wallet.gold(), 40);
    assert_eq!(inventory_qty(&session, "logs"), 1);
    assert!(state.quests.is_completed(QUEST_FIRST_WATCH));
    // Completed before rewards were tracked, so nothing is paid out again.
    assert_eq!(inventory_qty(&session, ITEM_KEY_FRAGMENT), 0);
    assert_eq!(
        state.quests.status(session.db(), QUEST_SEALED_DEPTHS),
        Some(QuestStatus::Available)
    );
    let overworld = state.zones.get_zone(ZoneKey::Overworld).expect("overworld");
    assert!(overworld.populated);
    assert!(!overworld.mobs.is_empty());
    assert!(!overworld.resources.is_empty());
}
