//! Save blobs. Encoding always writes the current version; decoding reads every older layout,
//! repairs what it can and reports each repair instead of failing.

use std::collections::BTreeMap;

use engine::{BlobStore, DefDatabase, EquipSlot, SimClock, SimInstant, StoreError, TilePos};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::entities::{BossState, Fire, GroundLootPile, Mob, ResourceKind, ResourceNode};
use crate::inventory::{Bank, ItemStack, Wallet, INVENTORY_SLOTS, MAX_GOLD};
use crate::player::PlayerClass;
use crate::quests::{objective_cap, AppliedTokens, QuestBook, QuestProgress};
use crate::seeding::{seed_mobs, DEFAULT_WORLD_SEED, RESOURCE_LAYOUT_VERSION};
use crate::session::{clamp_zoom, GameSession, SessionError, SessionState};
use crate::skills::{Skill, MAX_XP};
use crate::zone_flow::{gate_open, sync_gate_flags, BOSS_MOB_ID};
use crate::zones::{ZoneKey, ZoneState};

pub const SAVE_VERSION: u32 = 3;
pub const SAVE_KEY: &str = "slot1";

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("encode save json: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no save stored under '{key}'")]
    Missing { key: String },
    #[error("malformed save: {reason}")]
    Malformed { reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl LoadError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub ok: bool,
    pub repaired: bool,
    pub reasons: Vec<String>,
}

impl LoadReport {
    pub fn failed(error: &LoadError) -> Self {
        Self {
            ok: false,
            repaired: false,
            reasons: vec![error.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SavedStack {
    item: String,
    qty: u32,
}

impl From<&ItemStack> for SavedStack {
    fn from(stack: &ItemStack) -> Self {
        Self {
            item: stack.item.clone(),
            qty: stack.qty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedPlayer {
    x: i64,
    y: i64,
    #[serde(default)]
    class: Option<String>,
    hp: i64,
    #[serde(default)]
    invulnerable_until: SimInstant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedResource {
    id: String,
    kind: String,
    x: i32,
    y: i32,
    alive: bool,
    #[serde(default)]
    respawn_at: SimInstant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedMob {
    id: String,
    def: String,
    x: i64,
    y: i64,
    home_x: i64,
    home_y: i64,
    hp: i64,
    alive: bool,
    #[serde(default)]
    respawn_at: SimInstant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedFire {
    x: i32,
    y: i32,
    expires_at: SimInstant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedLoot {
    x: i32,
    y: i32,
    items: BTreeMap<String, u32>,
    #[serde(default)]
    created_at: SimInstant,
    expires_at: SimInstant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedFixture {
    id: String,
    lit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedQuest {
    started_at: SimInstant,
    #[serde(default)]
    completed_at: Option<SimInstant>,
    #[serde(default)]
    counters: BTreeMap<String, u32>,
    #[serde(default)]
    tokens: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    rewards_granted: Option<bool>,
}

#[derive(Debug, Serialize)]
struct SavedWorld {
    resources: Vec<SavedResource>,
    mobs: Vec<SavedMob>,
    fires: Vec<SavedFire>,
    fixtures: Vec<SavedFixture>,
    boss: BossState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedZone {
    populated: bool,
    world: SavedWorld,
    ground_loot: Vec<SavedLoot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveBlob {
    v: u32,
    resource_layout_version: u32,
    saved_at: u64,
    clock_ms: u64,
    world_seed: u32,
    event_serial: u64,
    active_zone: ZoneKey,
    player: SavedPlayer,
    skills: BTreeMap<&'static str, u32>,
    inventory: Vec<Option<SavedStack>>,
    bank: Vec<SavedStack>,
    bank_capacity: usize,
    equipment: BTreeMap<&'static str, String>,
    quiver: Option<SavedStack>,
    wallet: BTreeMap<&'static str, u64>,
    quests: BTreeMap<&'static str, BTreeMap<String, SavedQuest>>,
    settings: BTreeMap<&'static str, f32>,
    zones: BTreeMap<&'static str, SavedZone>,
}

fn encode_zone(zone: &ZoneState) -> SavedZone {
    SavedZone {
        populated: zone.populated,
        world: SavedWorld {
            resources: zone
                .resources
                .iter()
                .map(|node| SavedResource {
                    id: node.id.clone(),
                    kind: node.kind.key().to_string(),
                    x: node.pos.x,
                    y: node.pos.y,
                    alive: node.alive,
                    respawn_at: node.respawn_at,
                })
                .collect(),
            mobs: zone
                .mobs
                .iter()
                .map(|mob| SavedMob {
                    id: mob.id.clone(),
                    def: mob.def_name.clone(),
                    x: mob.pos.x.into(),
                    y: mob.pos.y.into(),
                    home_x: mob.home.x.into(),
                    home_y: mob.home.y.into(),
                    hp: mob.hp.into(),
                    alive: mob.alive,
                    respawn_at: mob.respawn_at,
                })
                .collect(),
            fires: zone
                .fires
                .iter()
                .map(|fire| SavedFire {
                    x: fire.pos.x,
                    y: fire.pos.y,
                    expires_at: fire.expires_at,
                })
                .collect(),
            fixtures: zone
                .interactables
                .iter()
                .filter(|fixture| fixture.lit)
                .map(|fixture| SavedFixture {
                    id: fixture.id.clone(),
                    lit: fixture.lit,
                })
                .collect(),
            boss: zone.boss,
        },
        ground_loot: zone
            .ground_loot
            .iter()
            .map(|pile| SavedLoot {
                x: pile.pos.x,
                y: pile.pos.y,
                items: pile.items.clone(),
                created_at: pile.created_at,
                expires_at: pile.expires_at,
            })
            .collect(),
    }
}

fn encode_quest(progress: &QuestProgress) -> SavedQuest {
    let mut tokens: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (objective, token) in progress.tokens.iter() {
        tokens
            .entry(objective.to_string())
            .or_default()
            .push(token.to_string());
    }
    SavedQuest {
        started_at: progress.started_at,
        completed_at: progress.completed_at,
        counters: progress.counters.clone(),
        tokens,
        rewards_granted: Some(progress.rewards_granted),
    }
}

/// Serializes the whole session as a current-version blob.
pub fn encode_save(state: &SessionState) -> Result<String, serde_json::Error> {
    let now = state.now().as_ms();
    let player = &state.player;
    let blob = SaveBlob {
        v: SAVE_VERSION,
        resource_layout_version: RESOURCE_LAYOUT_VERSION,
        saved_at: now,
        clock_ms: now,
        world_seed: state.world_seed,
        event_serial: state.event_serial,
        active_zone: state.zones.active_zone(),
        player: SavedPlayer {
            x: player.pos.x.into(),
            y: player.pos.y.into(),
            class: Some(player.class.key().to_string()),
            hp: player.hp.into(),
            invulnerable_until: player.invulnerable_until,
        },
        skills: state
            .skills
            .iter()
            .map(|(skill, xp)| (skill.key(), xp))
            .collect(),
        inventory: state
            .inventory
            .slots()
            .iter()
            .map(|slot| slot.as_ref().map(SavedStack::from))
            .collect(),
        bank: state.bank.stacks().iter().map(SavedStack::from).collect(),
        bank_capacity: state.bank.capacity(),
        equipment: state
            .equipment
            .iter()
            .map(|(slot, item)| (slot.key(), item.to_string()))
            .collect(),
        quiver: state.quiver.stack.as_ref().map(SavedStack::from),
        wallet: BTreeMap::from([("gold", state.wallet.gold())]),
        quests: BTreeMap::from([(
            "byId",
            state
                .quests
                .iter()
                .map(|(quest, progress)| (quest.to_string(), encode_quest(progress)))
                .collect(),
        )]),
        settings: BTreeMap::from([("zoom", state.settings.zoom)]),
        zones: state
            .zones
            .zones()
            .map(|zone| (zone.key().key(), encode_zone(zone)))
            .collect(),
    };
    serde_json::to_string(&blob)
}

/// Every repair applied while decoding, in the order found.
#[derive(Debug, Default)]
struct Repairs {
    reasons: Vec<String>,
}

impl Repairs {
    fn note(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "save_repaired");
        self.reasons.push(reason);
    }
}

fn validation_err(path: &str, message: impl Into<String>) -> String {
    format!("validation failed at {path}: {}", message.into())
}

fn decode_at<T: DeserializeOwned>(value: &Value, at: &str) -> Result<T, String> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(|error| {
        let path = error.path().to_string();
        let source = error.into_inner();
        if path.is_empty() || path == "." {
            format!("parse save json at {at}: {source}")
        } else {
            format!("parse save json at {at}.{path}: {source}")
        }
    })
}

/// Decodes an optional section; a present but invalid one is dropped with a note.
fn section<T: DeserializeOwned>(
    value: Option<&Value>,
    at: &str,
    repairs: &mut Repairs,
) -> Option<T> {
    let value = value?;
    match decode_at(value, at) {
        Ok(decoded) => Some(decoded),
        Err(reason) => {
            repairs.note(reason);
            None
        }
    }
}

/// Decodes an array element by element, skipping the ones that do not parse.
fn elements<T: DeserializeOwned>(
    value: Option<&Value>,
    at: &str,
    repairs: &mut Repairs,
) -> Option<Vec<T>> {
    let value = value?;
    let Some(items) = value.as_array() else {
        repairs.note(validation_err(at, "expected an array"));
        return None;
    };
    let mut decoded = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match decode_at(item, &format!("{at}[{index}]")) {
            Ok(element) => decoded.push(element),
            Err(reason) => repairs.note(reason),
        }
    }
    Some(decoded)
}

fn parse_root(raw: &str) -> Result<Map<String, Value>, LoadError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let root = serde_path_to_error::deserialize::<_, Value>(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        let source = error.into_inner();
        if path.is_empty() || path == "." {
            LoadError::malformed(format!("parse save json: {source}"))
        } else {
            LoadError::malformed(format!("parse save json at {path}: {source}"))
        }
    })?;
    match root {
        Value::Object(map) => Ok(map),
        _ => Err(LoadError::malformed(validation_err(".", "expected an object"))),
    }
}

/// Saved coordinates are read wide so a wild value lands off-grid and gets repaired.
fn saved_pos(x: i64, y: i64) -> TilePos {
    let narrow = |value: i64| {
        i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
    };
    TilePos::new(narrow(x), narrow(y))
}

/// Clamps a saved hit point value into `1..=max_hp`, noting any change.
fn clamp_hp(saved: i64, max_hp: u32, at: &str, repairs: &mut Repairs) -> u32 {
    let hp = saved.clamp(1, i64::from(max_hp.max(1)));
    if hp != saved {
        repairs.note(validation_err(
            at,
            format!("{saved} out of range, clamped to {hp}"),
        ));
    }
    u32::try_from(hp).unwrap_or(1)
}

fn u32_field(root: &Map<String, Value>, key: &str) -> Option<u32> {
    root.get(key)
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
}

/// Moves an out-of-bounds or unwalkable position onto the closest walkable tile.
fn repair_pos(zone: &ZoneState, pos: TilePos, at: &str, repairs: &mut Repairs) -> Option<TilePos> {
    let grid = zone.grid();
    if grid.is_walkable(pos) && !zone.is_blocked(pos) {
        return Some(pos);
    }
    let repaired = grid
        .nearest_walkable(pos)
        .filter(|candidate| !zone.is_blocked(*candidate));
    match repaired {
        Some(candidate) => repairs.note(validation_err(
            at,
            format!(
                "({}, {}) is not walkable, moved to ({}, {})",
                pos.x, pos.y, candidate.x, candidate.y
            ),
        )),
        None => repairs.note(validation_err(
            at,
            format!("({}, {}) has no walkable tile nearby", pos.x, pos.y),
        )),
    }
    repaired
}

/// Restores a session from a blob without touching any live session.
///
/// Fails only when the blob is not a save at all. Everything else is repaired and noted.
pub fn decode_save(
    db: &DefDatabase,
    raw: &str,
) -> Result<(SessionState, Vec<String>), LoadError> {
    let root = parse_root(raw)?;
    let version = root
        .get("v")
        .and_then(Value::as_u64)
        .ok_or_else(|| LoadError::malformed(validation_err("v", "missing save version")))?;
    let version = u32::try_from(version)
        .ok()
        .filter(|version| *version >= 1)
        .ok_or_else(|| {
            LoadError::malformed(validation_err("v", format!("invalid version {version}")))
        })?;

    let mut repairs = Repairs::default();
    if version > SAVE_VERSION {
        repairs.note(format!(
            "save version {version} is newer than {SAVE_VERSION}; reading known fields only"
        ));
    }

    let world_seed = u32_field(&root, "worldSeed").unwrap_or_else(|| {
        repairs.note(validation_err("worldSeed", "missing, using the default seed"));
        DEFAULT_WORLD_SEED
    });
    let saved_player: Option<SavedPlayer> = section(root.get("player"), "player", &mut repairs);
    let class = match saved_player.as_ref().and_then(|player| player.class.as_deref()) {
        Some(key) => PlayerClass::from_key(key).unwrap_or_else(|| {
            repairs.note(validation_err(
                "player.class",
                format!("unknown class '{key}'"),
            ));
            PlayerClass::default()
        }),
        None => PlayerClass::default(),
    };

    let mut state = SessionState::blank(world_seed, class)?;
    let clock_ms = root
        .get("clockMs")
        .or_else(|| root.get("savedAt"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    state.clock = SimClock::starting_at(clock_ms);
    state.event_serial = root.get("eventSerial").and_then(Value::as_u64).unwrap_or(0);

    restore_skills(&root, &mut state, &mut repairs);
    restore_items(db, &root, &mut state, &mut repairs);
    state.quests = restore_quests(db, &root, version, &mut repairs);

    let layout = u32_field(&root, "resourceLayoutVersion");
    let layout_current = layout == Some(RESOURCE_LAYOUT_VERSION);
    if !layout_current {
        let found = layout.map_or_else(|| "none".to_string(), |layout| layout.to_string());
        repairs.note(format!(
            "resource layout {found} is stale (current {RESOURCE_LAYOUT_VERSION}), regenerated from seed"
        ));
    }
    restore_zones(db, &root, version, layout_current, &mut state, &mut repairs);

    let active = match root.get("activeZone").and_then(Value::as_str) {
        Some(key) => ZoneKey::from_key(key).unwrap_or_else(|| {
            repairs.note(validation_err("activeZone", format!("unknown zone '{key}'")));
            ZoneKey::Overworld
        }),
        None => ZoneKey::Overworld,
    };
    state.zones.set_active_zone(active);
    if let Some(saved) = saved_player {
        restore_player(&saved, &mut state, &mut repairs);
    }

    let zoom = root
        .get("settings")
        .and_then(|settings| settings.get("zoom"))
        .and_then(Value::as_f64);
    if let Some(zoom) = zoom {
        let zoom = zoom as f32;
        let clamped = clamp_zoom(zoom);
        if clamped != zoom {
            repairs.note(validation_err(
                "settings.zoom",
                format!("{zoom} out of range, clamped to {clamped}"),
            ));
        }
        state.settings.zoom = clamped;
    }

    let open = gate_open(db, &state.quests);
    state
        .zones
        .with_zone(ZoneKey::Dungeon, |zone| sync_gate_flags(zone, open));
    Ok((state, repairs.reasons))
}

fn restore_player(saved: &SavedPlayer, state: &mut SessionState, repairs: &mut Repairs) {
    let zone = state.zones.active();
    let pos = repair_pos(zone, saved_pos(saved.x, saved.y), "player", repairs)
        .unwrap_or(zone.blueprint.entry_point);
    let hp = clamp_hp(saved.hp, state.skills.max_hitpoints(), "player.hp", repairs);
    let player = &mut state.player;
    player.pos = pos;
    player.hp = hp;
    player.invulnerable_until = saved.invulnerable_until;
}

fn restore_skills(root: &Map<String, Value>, state: &mut SessionState, repairs: &mut Repairs) {
    let Some(saved) = section::<BTreeMap<String, u64>>(root.get("skills"), "skills", repairs)
    else {
        return;
    };
    for (key, xp) in saved {
        let Some(skill) = Skill::from_key(&key) else {
            repairs.note(validation_err(
                &format!("skills.{key}"),
                "unknown skill dropped",
            ));
            continue;
        };
        if xp > u64::from(MAX_XP) {
            repairs.note(validation_err(
                &format!("skills.{key}"),
                format!("{xp} xp clamped to {MAX_XP}"),
            ));
        }
        let xp = u32::try_from(xp).unwrap_or(MAX_XP);
        state.skills.set_xp(skill, xp);
    }
}

/// Checks a saved stack against the defs: unknown items are dropped, and so are empty stacks.
/// Unstackable quantities collapse to one.
fn checked_stack(
    db: &DefDatabase,
    stack: SavedStack,
    at: &str,
    repairs: &mut Repairs,
) -> Option<ItemStack> {
    if db.item(&stack.item).is_none() {
        repairs.note(validation_err(
            at,
            format!("unknown item '{}' dropped", stack.item),
        ));
        return None;
    }
    if stack.qty == 0 {
        repairs.note(validation_err(at, "empty stack dropped"));
        return None;
    }
    let mut qty = stack.qty;
    if qty > 1 && !db.is_stackable(&stack.item) {
        repairs.note(validation_err(
            at,
            format!("'{}' does not stack, quantity {qty} reduced to 1", stack.item),
        ));
        qty = 1;
    }
    Some(ItemStack::new(stack.item, qty))
}

fn restore_items(
    db: &DefDatabase,
    root: &Map<String, Value>,
    state: &mut SessionState,
    repairs: &mut Repairs,
) {
    let slots: Vec<Option<SavedStack>> =
        elements(root.get("inventory"), "inventory", repairs).unwrap_or_default();
    for (index, slot) in slots.into_iter().enumerate() {
        let at = format!("inventory[{index}]");
        let Some(stack) = slot.and_then(|stack| checked_stack(db, stack, &at, repairs)) else {
            continue;
        };
        if index < INVENTORY_SLOTS && state.inventory.put_slot(index, stack.clone()) {
            continue;
        }
        if let Err(error) = state.inventory.add(db, &stack.item, stack.qty) {
            repairs.note(validation_err(&at, format!("dropped: {error}")));
        }
    }

    if let Some(value) = root.get("bankCapacity") {
        match value.as_u64() {
            Some(capacity) => {
                let capacity = usize::try_from(capacity).unwrap_or(usize::MAX);
                state.bank = Bank::with_capacity(capacity);
                if state.bank.capacity() != capacity {
                    repairs.note(validation_err(
                        "bankCapacity",
                        format!("{capacity} clamped to {}", state.bank.capacity()),
                    ));
                }
            }
            None => repairs.note(validation_err(
                "bankCapacity",
                format!("{value} is not a capacity, kept {}", state.bank.capacity()),
            )),
        }
    }
    let stacks: Vec<SavedStack> = elements(root.get("bank"), "bank", repairs).unwrap_or_default();
    for (index, stack) in stacks.into_iter().enumerate() {
        let at = format!("bank[{index}]");
        // Bank stacks every item, so only unknown or empty entries are rejected here.
        if db.item(&stack.item).is_none() || stack.qty == 0 {
            repairs.note(validation_err(
                &at,
                format!("invalid entry '{}' x {} dropped", stack.item, stack.qty),
            ));
            continue;
        }
        if let Err(error) = state.bank.store(&stack.item, stack.qty) {
            repairs.note(validation_err(&at, format!("dropped: {error}")));
        }
    }

    let equipment: BTreeMap<String, String> =
        section(root.get("equipment"), "equipment", repairs).unwrap_or_default();
    for (slot_key, item) in equipment {
        let at = format!("equipment.{slot_key}");
        let Some(slot) = EquipSlot::from_key(&slot_key) else {
            repairs.note(validation_err(&at, "unknown equipment slot dropped"));
            continue;
        };
        let fits = db
            .item(&item)
            .is_some_and(|def| def.equip_slot == Some(slot));
        if !fits {
            repairs.note(validation_err(
                &at,
                format!("'{item}' does not belong in this slot, dropped"),
            ));
            continue;
        }
        state.equipment.set(slot, item);
    }

    let quiver: Option<Option<SavedStack>> = section(root.get("quiver"), "quiver", repairs);
    if let Some(stack) = quiver.flatten() {
        let is_ammo = db.item(&stack.item).is_some_and(|def| def.ammo);
        if is_ammo && stack.qty > 0 {
            state.quiver.stack = Some(ItemStack::new(stack.item, stack.qty));
        } else {
            repairs.note(validation_err(
                "quiver",
                format!("'{}' x {} is not ammunition, dropped", stack.item, stack.qty),
            ));
        }
    }

    let gold = match root.get("wallet") {
        Some(Value::Object(wallet)) => wallet.get("gold"),
        Some(other) => Some(other),
        None => None,
    };
    if let Some(value) = gold {
        state.wallet = Wallet::with_gold(saved_gold(value, repairs));
    }
}

fn saved_gold(value: &Value, repairs: &mut Repairs) -> u64 {
    if let Some(gold) = value.as_u64() {
        if gold > MAX_GOLD {
            repairs.note(validation_err(
                "wallet.gold",
                format!("{gold} clamped to {MAX_GOLD}"),
            ));
        }
        return gold.min(MAX_GOLD);
    }
    let gold = match value.as_f64() {
        Some(amount) if amount.is_finite() && amount > 0.0 => (amount as u64).min(MAX_GOLD),
        _ => 0,
    };
    repairs.note(validation_err(
        "wallet.gold",
        format!("{value} is not a valid amount, set to {gold}"),
    ));
    gold
}

fn restore_quests(
    db: &DefDatabase,
    root: &Map<String, Value>,
    version: u32,
    repairs: &mut Repairs,
) -> QuestBook {
    let Some(quests) = root.get("quests") else {
        return QuestBook::new();
    };
    // Early saves stored the map directly, later ones wrap it in `byId`.
    let (by_id, base) = match quests.get("byId") {
        Some(by_id) => (by_id, "quests.byId"),
        None => (quests, "quests"),
    };
    let saved: BTreeMap<String, Value> = section(Some(by_id), base, repairs).unwrap_or_default();

    let mut progress = BTreeMap::new();
    for (quest_id, value) in saved {
        let at = format!("{base}.{quest_id}");
        let Some(def) = db.quest(&quest_id) else {
            repairs.note(validation_err(&at, "unknown quest dropped"));
            continue;
        };
        let Some(saved) = section::<SavedQuest>(Some(&value), &at, repairs) else {
            continue;
        };

        let mut restored = QuestProgress::started(def, saved.started_at);
        for (objective, count) in &saved.counters {
            if def.objective(objective).is_none() {
                repairs.note(validation_err(
                    &format!("{at}.counters.{objective}"),
                    "unknown objective dropped",
                ));
                continue;
            }
            restored.counters.insert(objective.clone(), *count);
        }
        if saved.completed_at.is_some() && !restored.all_objectives_met(def) {
            repairs.note(validation_err(
                &at,
                "completed with objectives below target, counters raised",
            ));
            for objective in &def.objectives {
                restored.counters.insert(objective.id.clone(), objective.target);
            }
        }
        for objective in &def.objectives {
            let cap = objective_cap(def, objective, &restored);
            let count = restored.count(&objective.id);
            if count > cap {
                repairs.note(validation_err(
                    &format!("{at}.counters.{}", objective.id),
                    format!("{count} clamped to {cap}"),
                ));
                restored.counters.insert(objective.id.clone(), cap);
            }
        }

        let mut tokens = AppliedTokens::default();
        for (objective, applied) in saved.tokens {
            if def.objective(&objective).is_none() {
                repairs.note(validation_err(
                    &format!("{at}.tokens.{objective}"),
                    "tokens for unknown objective dropped",
                ));
                continue;
            }
            for token in applied {
                tokens.insert(objective.clone(), token);
            }
        }
        restored.tokens = tokens;
        restored.completed_at = saved.completed_at;
        // Before version 3 a completion time meant the rewards were already handed out.
        restored.rewards_granted = match saved.rewards_granted {
            Some(granted) if version >= SAVE_VERSION => granted,
            _ => saved.completed_at.is_some(),
        };
        progress.insert(quest_id, restored);
    }
    QuestBook::from_progress(progress)
}

fn restore_zones(
    db: &DefDatabase,
    root: &Map<String, Value>,
    version: u32,
    layout_current: bool,
    state: &mut SessionState,
    repairs: &mut Repairs,
) {
    let world_seed = state.world_seed;
    match root.get("zones").and_then(Value::as_object) {
        Some(zones) => {
            for (key, value) in zones {
                let at = format!("zones.{key}");
                let Some(zone_key) = ZoneKey::from_key(key) else {
                    repairs.note(validation_err(&at, "unknown zone dropped"));
                    continue;
                };
                let restored = state.zones.with_zone(zone_key, |zone| {
                    let saved = ZoneSections {
                        populated: value.get("populated").and_then(Value::as_bool),
                        world: value.get("world"),
                        ground_loot: value.get("groundLoot"),
                    };
                    restore_zone(db, zone, &saved, &at, layout_current, world_seed, repairs);
                });
                if restored.is_none() {
                    repairs.note(validation_err(&at, "zone is not registered"));
                }
            }
        }
        None => {
            if version >= 2 {
                repairs.note(validation_err("zones", "missing, reading legacy world"));
            }
            let saved = ZoneSections {
                populated: None,
                world: root.get("world"),
                ground_loot: root.get("groundLoot"),
            };
            state.zones.with_zone(ZoneKey::Overworld, |zone| {
                restore_zone(db, zone, &saved, "world", layout_current, world_seed, repairs);
            });
        }
    }
}

struct ZoneSections<'a> {
    populated: Option<bool>,
    world: Option<&'a Value>,
    ground_loot: Option<&'a Value>,
}

fn restore_zone(
    db: &DefDatabase,
    zone: &mut ZoneState,
    saved: &ZoneSections<'_>,
    at: &str,
    layout_current: bool,
    world_seed: u32,
    repairs: &mut Repairs,
) {
    let world = saved.world;
    let field = |key: &str| world.and_then(|world| world.get(key));

    if layout_current {
        let resources_at = format!("{at}.world.resources");
        if let Some(resources) =
            elements::<SavedResource>(field("resources"), &resources_at, repairs)
        {
            zone.resources = restore_resources(zone, resources, &resources_at, repairs);
        }
    }

    let mobs_at = format!("{at}.world.mobs");
    let mobs = elements::<SavedMob>(field("mobs"), &mobs_at, repairs);
    // Older saves carry no flag; a zone with saved mobs, or the overworld, was populated.
    let populated = saved.populated.unwrap_or_else(|| {
        zone.key() == ZoneKey::Overworld || mobs.as_ref().is_some_and(|mobs| !mobs.is_empty())
    });
    match mobs {
        Some(mobs) => zone.mobs = restore_mobs(db, zone, mobs, &mobs_at, repairs),
        None if populated => {
            repairs.note(validation_err(&mobs_at, "missing, reseeded"));
            seed_mobs(zone, db, world_seed);
        }
        None => {}
    }
    zone.populated = populated;

    let fires: Vec<SavedFire> =
        elements(field("fires"), &format!("{at}.world.fires"), repairs).unwrap_or_default();
    zone.fires = fires
        .into_iter()
        .map(|fire| Fire {
            pos: TilePos::new(fire.x, fire.y),
            expires_at: fire.expires_at,
        })
        .filter(|fire| zone.grid().in_bounds(fire.pos))
        .collect();

    let fixtures_at = format!("{at}.world.fixtures");
    let fixtures: Vec<SavedFixture> =
        elements(field("fixtures"), &fixtures_at, repairs).unwrap_or_default();
    for fixture in fixtures {
        match zone.interactable_mut(&fixture.id) {
            Some(interactable) => interactable.lit = fixture.lit,
            None => repairs.note(validation_err(
                &fixtures_at,
                format!("unknown fixture '{}' dropped", fixture.id),
            )),
        }
    }

    zone.boss = section(field("boss"), &format!("{at}.world.boss"), repairs).unwrap_or_default();
    let has_boss = zone.mobs.iter().any(|mob| mob.id == BOSS_MOB_ID);
    if zone.boss == BossState::Spawned && !has_boss {
        repairs.note(validation_err(
            &format!("{at}.world.boss"),
            "spawned without a boss mob, reset to dormant",
        ));
        zone.boss = BossState::Dormant;
    } else if zone.boss != BossState::Spawned && has_boss {
        repairs.note(validation_err(
            &mobs_at,
            "boss mob present while the boss is not spawned, removed",
        ));
        zone.mobs.retain(|mob| mob.id != BOSS_MOB_ID);
    }

    let loot_at = format!("{at}.groundLoot");
    let piles: Vec<SavedLoot> =
        elements(saved.ground_loot, &loot_at, repairs).unwrap_or_default();
    zone.ground_loot = piles
        .into_iter()
        .filter_map(|pile| {
            let pos = TilePos::new(pile.x, pile.y);
            if !zone.grid().in_bounds(pos) {
                repairs.note(validation_err(&loot_at, "pile out of bounds dropped"));
                return None;
            }
            let items = pile
                .items
                .into_iter()
                .filter(|(item, qty)| {
                    let known = db.item(item).is_some() && *qty > 0;
                    if !known {
                        repairs.note(validation_err(
                            &loot_at,
                            format!("invalid loot '{item}' x {qty} dropped"),
                        ));
                    }
                    known
                })
                .collect::<BTreeMap<_, _>>();
            (!items.is_empty()).then_some(GroundLootPile {
                pos,
                items,
                created_at: pile.created_at,
                expires_at: pile.expires_at,
            })
        })
        .collect();
}

fn restore_resources(
    zone: &ZoneState,
    saved: Vec<SavedResource>,
    at: &str,
    repairs: &mut Repairs,
) -> Vec<ResourceNode> {
    let mut restored = Vec::with_capacity(saved.len());
    for resource in saved {
        let Some(kind) = ResourceKind::from_key(&resource.kind) else {
            repairs.note(validation_err(
                at,
                format!("unknown resource kind '{}' dropped", resource.kind),
            ));
            continue;
        };
        let pos = TilePos::new(resource.x, resource.y);
        if !zone.grid().in_bounds(pos) || restored.iter().any(|node: &ResourceNode| node.pos == pos)
        {
            repairs.note(validation_err(
                at,
                format!("resource '{}' has an invalid position, dropped", resource.id),
            ));
            continue;
        }
        let mut node = ResourceNode::new(resource.id, kind, pos);
        node.alive = resource.alive;
        node.respawn_at = resource.respawn_at;
        restored.push(node);
    }
    restored
}

fn restore_mobs(
    db: &DefDatabase,
    zone: &ZoneState,
    saved: Vec<SavedMob>,
    at: &str,
    repairs: &mut Repairs,
) -> Vec<Mob> {
    let mut restored: Vec<Mob> = Vec::with_capacity(saved.len());
    for saved_mob in saved {
        let Some(def) = db.mob(&saved_mob.def) else {
            repairs.note(validation_err(
                at,
                format!("unknown mob kind '{}' dropped", saved_mob.def),
            ));
            continue;
        };
        if restored.iter().any(|mob| mob.id == saved_mob.id) {
            repairs.note(validation_err(
                at,
                format!("duplicate mob id '{}' dropped", saved_mob.id),
            ));
            continue;
        }
        let home_at = format!("{at}.{}.home", saved_mob.id);
        let Some(home) = repair_pos(
            zone,
            saved_pos(saved_mob.home_x, saved_mob.home_y),
            &home_at,
            repairs,
        ) else {
            continue;
        };
        let mut mob = Mob::spawn(saved_mob.id, def, home);
        mob.alive = saved_mob.alive;
        mob.respawn_at = saved_mob.respawn_at;
        if mob.alive {
            let pos_at = format!("{at}.{}", mob.id);
            mob.pos = repair_pos(zone, saved_pos(saved_mob.x, saved_mob.y), &pos_at, repairs)
                .unwrap_or(home);
            mob.hp = clamp_hp(saved_mob.hp, mob.max_hp, &format!("{pos_at}.hp"), repairs);
        } else {
            mob.hp = 0;
        }
        restored.push(mob);
    }
    restored
}

impl GameSession {
    pub fn save(&self, store: &mut dyn BlobStore) -> Result<(), SaveError> {
        let blob = encode_save(self.state())?;
        store.put(SAVE_KEY, &blob)?;
        info!(
            key = SAVE_KEY,
            bytes = blob.len(),
            at_ms = self.now().as_ms(),
            "save_written"
        );
        Ok(())
    }

    /// Replaces the session with the stored save. On error the session is left as it was.
    pub fn load(&mut self, store: &dyn BlobStore) -> Result<LoadReport, LoadError> {
        let raw = store.get(SAVE_KEY)?.ok_or_else(|| LoadError::Missing {
            key: SAVE_KEY.to_string(),
        })?;
        let db = self.db_handle();
        let (state, reasons) = match decode_save(&db, &raw) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(key = SAVE_KEY, %error, "save_load_failed");
                return Err(error);
            }
        };
        self.replace_state(state);
        let now = self.now();
        let update = self.state_mut().quests.reconcile_completions(&db, now);
        self.apply_quest_update(&update, now);
        info!(
            key = SAVE_KEY,
            repairs = reasons.len(),
            at_ms = now.as_ms(),
            "save_loaded"
        );
        self.say("Game loaded.");
        Ok(LoadReport {
            ok: true,
            repaired: !reasons.is_empty(),
            reasons,
        })
    }

    pub fn clear_save(&mut self, store: &mut dyn BlobStore) -> Result<bool, StoreError> {
        let existed = store.remove(SAVE_KEY)?;
        info!(key = SAVE_KEY, existed, "save_cleared");
        Ok(existed)
    }
}
