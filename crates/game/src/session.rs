//! The session aggregate. One [`GameSession`] owns zones, player, economy and quests, and
//! [`GameSession::update`] advances them in a fixed order:
//! clock, zone timers, movement, timed actions, player combat, AI, gating.

use std::collections::VecDeque;
use std::sync::Arc;

use engine::{
    find_path_to_adjacent, find_path_with, DefDatabase, EquipSlot, MobDef, NavCache, RewardDef,
    SimClock, SimInstant, TilePos, TilemapError, XorShift32,
};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::actions::{
    burn_chance, smith_recipe, ActionKind, CookRecipe, SmeltRecipe, TimedAction, COOKING_XP,
    COOK_RECIPES, FIREMAKING_XP, FIRE_DURATION_MS, SMELT_RECIPES,
};
use crate::ai::{disengage_all, tick_mobs, PlayerTarget, PROVOKE_MS};
use crate::combat::{
    combat_xp, mob_defence, player_combat_stats, roll_attack, AttackStyle, PlayerCombatStats,
    PLAYER_ATTACK_COOLDOWN_MS,
};
use crate::content::{
    ITEM_KEY_FRAGMENT, ITEM_LOGS, ITEM_TINDERBOX, OBJECTIVE_LIGHT_BRAZIERS, OBJECTIVE_UNSEAL_GATE,
    VENDOR_STOCK,
};
use crate::entities::{Fire, InteractableKind, LadderDirection};
use crate::inventory::{self, Bank, Equipment, Inventory, InventoryError, Quiver, Wallet};
use crate::maps::PLAYER_SPAWN;
use crate::player::{Player, PlayerClass, PLAYER_STEP_MS};
use crate::quests::{QuestBook, QuestError, QuestEvent, QuestUpdate};
use crate::seeding::{
    seed_interactables, seed_mobs, seed_resources, zone_salt, SALT_AI, SALT_COMBAT,
};
use crate::skills::{Skill, Skills};
use crate::zone_flow::{
    boss_defeated, boss_should_spawn, gate_open, gate_passage, ladder_destination, spawn_boss,
    sync_gate_flags, BOSS_MOB_ID, GATE_TOKEN, LADDER_INVULN_MS,
};
use crate::zones::{ZoneKey, ZoneRegistry, ZoneState};

pub const STARTING_GOLD: u64 = 25;
pub const DEFAULT_ZOOM: f32 = 1.0;
pub const MIN_ZOOM: f32 = 0.5;
pub const MAX_ZOOM: f32 = 3.0;
const RESPAWN_INVULN_MS: u64 = 3_000;
const STARTING_ARROWS: u32 = 30;
const MESSAGE_LOG_LIMIT: usize = 64;
const DEFAULT_SMITH_CHOICE: &str = "bronze_sword";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to build zone maps: {0}")]
    Zones(#[from] TilemapError),
}

/// Player-facing failures of direct commands (bank, vendor, equipment, food).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("the {panel} is not open")]
    PanelClosed { panel: &'static str },
    #[error("the store does not sell '{item}'")]
    NotStocked { item: String },
    #[error("'{item}' is not something you can eat")]
    NotEdible { item: String },
    #[error("unknown equipment slot '{slot}'")]
    UnknownSlot { slot: String },
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub zoom: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self { zoom: DEFAULT_ZOOM }
    }
}

/// Non-finite zoom falls back to the default; everything else is clamped to the legal range.
pub fn clamp_zoom(zoom: f32) -> f32 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        DEFAULT_ZOOM
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    Bank,
    Vendor,
}

impl Panel {
    pub fn key(self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Vendor => "vendor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl InteractOutcome {
    fn accepted() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn rejected(reason: &'static str) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeleportOptions {
    pub require_walkable: bool,
    pub invuln_ms: u64,
}

impl Default for TeleportOptions {
    fn default() -> Self {
        Self {
            require_walkable: true,
            invuln_ms: 0,
        }
    }
}

/// Everything a save captures. Loading swaps it out wholesale.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub world_seed: u32,
    pub clock: SimClock,
    pub zones: ZoneRegistry,
    pub player: Player,
    pub skills: Skills,
    pub inventory: Inventory,
    pub bank: Bank,
    pub equipment: Equipment,
    pub quiver: Quiver,
    pub wallet: Wallet,
    pub quests: QuestBook,
    pub settings: Settings,
    /// Monotonic counter behind generated quest event tokens.
    pub event_serial: u64,
}

impl SessionState {
    /// Zones with fixtures and resources but no mobs, player at spawn with empty pockets.
    pub fn blank(world_seed: u32, class: PlayerClass) -> Result<Self, SessionError> {
        let mut zones = ZoneRegistry::new()?;
        seed_interactables(&mut zones);
        seed_resources(&mut zones, world_seed);
        let skills = Skills::new();
        Ok(Self {
            world_seed,
            clock: SimClock::default(),
            zones,
            player: Player::new(PLAYER_SPAWN, class, skills.max_hitpoints()),
            skills,
            inventory: Inventory::new(),
            bank: Bank::default(),
            equipment: Equipment::default(),
            quiver: Quiver::default(),
            wallet: Wallet::with_gold(0),
            quests: QuestBook::new(),
            settings: Settings::default(),
            event_serial: 0,
        })
    }

    /// A fresh game: overworld populated, dungeon left for first arrival, class kit handed out.
    pub fn new_game(
        db: &DefDatabase,
        world_seed: u32,
        class: PlayerClass,
    ) -> Result<Self, SessionError> {
        let mut state = Self::blank(world_seed, class)?;
        state
            .zones
            .with_zone(ZoneKey::Overworld, |zone| seed_mobs(zone, db, world_seed));
        state.wallet = Wallet::with_gold(STARTING_GOLD);
        state.grant_starting_kit(db);
        Ok(state)
    }

    fn grant_starting_kit(&mut self, db: &DefDatabase) {
        let mut kit = vec![(ITEM_TINDERBOX, 1)];
        match self.player.class {
            PlayerClass::Warrior => kit.push(("bronze_sword", 1)),
            PlayerClass::Ranger => kit.extend([("shortbow", 1), ("bronze_arrows", STARTING_ARROWS)]),
            PlayerClass::Mage => {}
        }
        for (item, qty) in kit {
            if let Err(error) = self.inventory.add(db, item, qty) {
                warn!(item, %error, "starting_kit_item_skipped");
                continue;
            }
            let equippable = db
                .item(item)
                .is_some_and(|def| def.ammo || def.equip_slot.is_some());
            if equippable {
                if let Err(error) = inventory::equip(
                    db,
                    &mut self.inventory,
                    &mut self.equipment,
                    &mut self.quiver,
                    item,
                ) {
                    warn!(item, %error, "starting_kit_equip_failed");
                }
            }
        }
    }

    pub fn now(&self) -> SimInstant {
        self.clock.now()
    }
}

/// What a tile holds, in interaction priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Mob { id: String },
    Fixture { id: String },
    Decor { label: String },
    Resource { id: String },
    Fire,
    Loot,
}

impl Target {
    /// Loot is picked up by standing on it, fires can be used from on top, everything else
    /// from a 4-neighbor.
    fn reachable_from(&self, player: TilePos, tile: TilePos) -> bool {
        match self {
            Self::Loot => player == tile,
            Self::Fire => player.manhattan(tile) <= 1,
            _ => player.manhattan(tile) == 1,
        }
    }
}

fn target_at(zone: &ZoneState, pos: TilePos, now: SimInstant) -> Option<Target> {
    if let Some(mob) = zone.live_mob_at(pos) {
        return Some(Target::Mob { id: mob.id.clone() });
    }
    if let Some(fixture) = zone.interactable_at(pos) {
        return Some(match &fixture.kind {
            InteractableKind::Decor { label } => Target::Decor {
                label: label.clone(),
            },
            _ => Target::Fixture {
                id: fixture.id.clone(),
            },
        });
    }
    if let Some(node) = zone.resource_at(pos).filter(|node| node.alive) {
        return Some(Target::Resource {
            id: node.id.clone(),
        });
    }
    if zone.fire_at(pos).is_some() {
        return Some(Target::Fire);
    }
    zone.ground_loot
        .iter()
        .any(|pile| pile.pos == pos && !pile.is_expired(now))
        .then_some(Target::Loot)
}

pub struct GameSession {
    db: Arc<DefDatabase>,
    state: SessionState,
    nav: NavCache,
    combat_rng: XorShift32,
    ai_rng: XorShift32,
    messages: VecDeque<String>,
    open_panel: Option<Panel>,
    smith_choice: String,
}

impl GameSession {
    pub fn new(
        db: Arc<DefDatabase>,
        world_seed: u32,
        class: PlayerClass,
    ) -> Result<Self, SessionError> {
        let state = SessionState::new_game(&db, world_seed, class)?;
        info!(world_seed, class = class.key(), "session_started");
        Ok(Self::from_state(db, state))
    }

    pub fn from_state(db: Arc<DefDatabase>, state: SessionState) -> Self {
        let seed = state.world_seed;
        Self {
            db,
            combat_rng: XorShift32::salted(seed, SALT_COMBAT),
            ai_rng: XorShift32::salted(seed, zone_salt(SALT_AI, state.zones.active_zone())),
            state,
            nav: NavCache::default(),
            messages: VecDeque::new(),
            open_panel: None,
            smith_choice: DEFAULT_SMITH_CHOICE.to_string(),
        }
    }

    pub fn db(&self) -> &DefDatabase {
        &self.db
    }

    pub(crate) fn db_handle(&self) -> Arc<DefDatabase> {
        Arc::clone(&self.db)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Raw access for tools and tests; skips every gameplay rule.
    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn now(&self) -> SimInstant {
        self.state.now()
    }

    pub fn open_panel(&self) -> Option<Panel> {
        self.open_panel
    }

    pub fn smith_choice(&self) -> &str {
        &self.smith_choice
    }

    pub fn nav_rebuilds(&self) -> u64 {
        self.nav.rebuild_count()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    pub fn drain_messages(&mut self) -> Vec<String> {
        self.messages.drain(..).collect()
    }

    /// Swaps in a restored state and drops everything derived from the old one.
    pub(crate) fn replace_state(&mut self, state: SessionState) {
        let seed = state.world_seed;
        let clock_salt = state.clock.now().as_ms() as u32;
        self.combat_rng = XorShift32::salted(seed ^ clock_salt, SALT_COMBAT);
        self.ai_rng = XorShift32::salted(seed ^ clock_salt, SALT_AI);
        self.state = state;
        self.nav.clear();
        self.open_panel = None;
    }

    pub(crate) fn say(&mut self, text: impl Into<String>) {
        let text = text.into();
        debug!(message = %text, "player_message");
        self.messages.push_back(text);
        while self.messages.len() > MESSAGE_LOG_LIMIT {
            self.messages.pop_front();
        }
    }

    fn next_token(&mut self, kind: &str, subject: &str) -> String {
        self.state.event_serial = self.state.event_serial.saturating_add(1);
        format!("{kind}:{subject}:{}", self.state.event_serial)
    }

    fn combat_stats(&self) -> PlayerCombatStats {
        player_combat_stats(
            &self.db,
            self.state.player.class,
            &self.state.skills,
            &self.state.equipment,
            &self.state.quiver,
        )
    }

    /// Advances the simulation by `dt_ms` milliseconds.
    pub fn update(&mut self, dt_ms: u64) {
        let now = self.state.clock.advance(dt_ms);
        let zone = self.state.zones.active_mut();
        let timers = zone.tick_timers(now);
        if !timers.revived_mobs.is_empty() || timers.revived_resources > 0 {
            debug!(
                zone = zone.key().key(),
                mobs = ?timers.revived_mobs,
                resources = timers.revived_resources,
                "zone_respawns"
            );
        }
        self.step_player(now);
        self.complete_due_action(now);
        self.player_combat(now);
        self.run_ai(now);
        self.check_gating(now);
    }

    fn plan_path(&mut self, goal: TilePos, adjacent: bool) -> Option<Vec<TilePos>> {
        let zones = &self.state.zones;
        let zone = zones.active();
        if self.nav.refresh(zone.grid(), zones.nav_generation()) {
            debug!(
                zone = zone.key().key(),
                generation = zones.nav_generation(),
                rebuilds = self.nav.rebuild_count(),
                "nav_cache_rebuilt"
            );
        }
        let nav = &self.nav;
        let blocked = |pos: TilePos| {
            !nav.is_walkable(pos) || zone.is_blocked(pos) || zone.live_mob_at(pos).is_some()
        };
        let start = self.state.player.pos;
        if adjacent {
            find_path_to_adjacent(zone.grid(), start, goal, blocked)
        } else {
            find_path_with(zone.grid(), start, goal, blocked)
        }
    }

    /// Walks to a tile, dropping whatever the player was doing.
    pub fn walk_to(&mut self, x: i32, y: i32) -> bool {
        let goal = TilePos::new(x, y);
        self.state.player.stop();
        self.open_panel = None;
        match self.plan_path(goal, false) {
            Some(path) => {
                self.state.player.path = path.into();
                true
            }
            None => {
                self.say("You can't reach that.");
                false
            }
        }
    }

    fn step_player(&mut self, now: SimInstant) {
        if !self.state.player.next_step_at.has_passed(now) {
            return;
        }
        let Some(next) = self.state.player.path.front().copied() else {
            return;
        };
        let zone = self.state.zones.active();
        if !zone.grid().is_walkable(next) || zone.is_blocked(next) {
            self.state.player.path.clear();
            self.state.player.pending_interaction = None;
            self.say("Something blocks the way.");
            return;
        }
        if zone.live_mob_at(next).is_some() {
            return;
        }
        let player = &mut self.state.player;
        player.path.pop_front();
        player.pos = next;
        player.next_step_at = now.after_ms(PLAYER_STEP_MS);
        if player.path.is_empty() {
            if let Some(target) = player.pending_interaction.take() {
                self.perform_interaction(target, now);
            }
        }
    }

    /// Clicks a tile: attack a mob, or walk to and use whatever is there.
    pub fn interact_tile(&mut self, x: i32, y: i32) -> InteractOutcome {
        let now = self.now();
        let tile = TilePos::new(x, y);
        let zone = self.state.zones.active();
        if !zone.grid().in_bounds(tile) {
            return InteractOutcome::rejected("out_of_bounds");
        }
        let Some(target) = target_at(zone, tile, now) else {
            return InteractOutcome::rejected("no_entity");
        };
        match &target {
            Target::Decor { label } => {
                let label = label.clone();
                self.say(label);
                return InteractOutcome::rejected("decor_only");
            }
            Target::Mob { id } => {
                let id = id.clone();
                self.attack(&id);
                return InteractOutcome::accepted();
            }
            _ => {}
        }

        self.state.player.stop();
        self.open_panel = None;
        if target.reachable_from(self.state.player.pos, tile) {
            self.perform_interaction(tile, now);
            return InteractOutcome::accepted();
        }
        match self.plan_path(tile, target != Target::Loot) {
            Some(path) if path.is_empty() => self.perform_interaction(tile, now),
            Some(path) => {
                self.state.player.path = path.into();
                self.state.player.pending_interaction = Some(tile);
            }
            None => self.say("You can't reach that."),
        }
        InteractOutcome::accepted()
    }

    fn perform_interaction(&mut self, tile: TilePos, now: SimInstant) {
        let Some(target) = target_at(self.state.zones.active(), tile, now) else {
            self.say("There is nothing there anymore.");
            return;
        };
        if !target.reachable_from(self.state.player.pos, tile) {
            self.say("You can't reach that from here.");
            return;
        }
        match target {
            Target::Mob { id } => {
                self.attack(&id);
            }
            Target::Decor { label } => self.say(label),
            Target::Loot => self.pick_up_loot(tile, now),
            Target::Fire => self.start_cooking(tile, now),
            Target::Resource { id } => self.start_gathering(&id, now),
            Target::Fixture { id } => self.use_fixture(&id, now),
        }
    }

    fn use_fixture(&mut self, id: &str, now: SimInstant) {
        let Some(kind) = self
            .state
            .zones
            .active()
            .interactable(id)
            .map(|fixture| fixture.kind.clone())
        else {
            return;
        };
        match kind {
            InteractableKind::Bank => {
                self.open_panel = Some(Panel::Bank);
                self.say("The bank is open.");
            }
            InteractableKind::Vendor => {
                self.open_panel = Some(Panel::Vendor);
                self.say("The store is open.");
            }
            InteractableKind::Furnace => self.start_smelting(now),
            InteractableKind::Anvil => self.start_smithing(now),
            InteractableKind::Ladder(direction) => {
                self.use_ladder(direction);
            }
            InteractableKind::SealedGate => self.use_gate(id, now),
            InteractableKind::Brazier { token } => self.light_brazier(id, &token, now),
            InteractableKind::QuestNpc { npc } => self.talk_to(&npc, now),
            InteractableKind::Decor { label } => self.say(label),
        }
    }

    /// Moves to the matching zone's entry point, populating it on first arrival.
    pub fn use_ladder(&mut self, direction: LadderDirection) -> bool {
        let now = self.now();
        let from = self.state.zones.active_zone();
        let Some(to) = ladder_destination(from, direction) else {
            self.say(format!("There is no way {} from here.", direction.key()));
            return false;
        };
        disengage_all(self.state.zones.active_mut());
        if !self.state.zones.set_active_zone(to) {
            return false;
        }
        let world_seed = self.state.world_seed;
        let zone = self.state.zones.active_mut();
        if !zone.populated {
            let mobs = seed_mobs(zone, &self.db, world_seed);
            info!(zone = to.key(), mobs, "zone_populated");
        }
        let entry = zone.blueprint.entry_point;
        let player = &mut self.state.player;
        player.stop();
        player.pos = entry;
        player.invulnerable_until = now.after_ms(LADDER_INVULN_MS);
        self.open_panel = None;
        info!(
            from = from.key(),
            to = to.key(),
            at_ms = now.as_ms(),
            "zone_switched"
        );
        self.say(format!("You climb {} into the {}.", direction.key(), to.key()));
        true
    }

    pub fn teleport(&mut self, x: i32, y: i32, options: TeleportOptions) -> bool {
        let now = self.now();
        let pos = TilePos::new(x, y);
        let zone = self.state.zones.active();
        if !zone.grid().in_bounds(pos) {
            return false;
        }
        if options.require_walkable && (!zone.grid().is_walkable(pos) || zone.is_blocked(pos)) {
            return false;
        }
        let player = &mut self.state.player;
        player.stop();
        player.pos = pos;
        if options.invuln_ms > 0 {
            player.invulnerable_until = now.after_ms(options.invuln_ms);
        }
        self.open_panel = None;
        debug!(x, y, "player_teleported");
        true
    }

    fn use_gate(&mut self, id: &str, now: SimInstant) {
        let Some(gate) = self
            .state
            .zones
            .active()
            .interactable(id)
            .map(|fixture| fixture.pos)
        else {
            return;
        };
        if !gate_open(&self.db, &self.state.quests) && self.state.inventory.contains(ITEM_KEY_FRAGMENT)
        {
            let event = QuestEvent::Manual {
                key: OBJECTIVE_UNSEAL_GATE.to_string(),
                qty: 1,
                token: Some(GATE_TOKEN.to_string()),
            };
            self.apply_event(&event, now);
        }
        if !gate_open(&self.db, &self.state.quests) {
            info!(at_ms = now.as_ms(), "gate_rejected");
            self.say("The gate is sealed.");
            return;
        }
        let destination = gate_passage(gate, self.state.player.pos);
        let zone = self.state.zones.active();
        if !zone.grid().is_walkable(destination) || zone.is_blocked(destination) {
            self.say("Something blocks the far side of the gate.");
            return;
        }
        self.state.player.pos = destination;
        self.say("You pass through the gate.");
    }

    fn light_brazier(&mut self, id: &str, token: &str, now: SimInstant) {
        let lit = self
            .state
            .zones
            .active()
            .interactable(id)
            .is_some_and(|fixture| fixture.lit);
        if lit {
            self.say("The brazier is already burning.");
            return;
        }
        if !self.state.inventory.contains(ITEM_TINDERBOX) {
            self.say("You need a tinderbox to light this.");
            return;
        }
        if let Some(fixture) = self.state.zones.active_mut().interactable_mut(id) {
            fixture.lit = true;
        }
        info!(brazier = id, at_ms = now.as_ms(), "brazier_lit");
        self.say("The brazier flares to life.");
        let event = QuestEvent::Manual {
            key: OBJECTIVE_LIGHT_BRAZIERS.to_string(),
            qty: 1,
            token: Some(token.to_string()),
        };
        self.apply_event(&event, now);
    }

    fn talk_to(&mut self, npc: &str, now: SimInstant) {
        let mut started = false;
        if let Some(quest) = self.state.quests.next_quest_from(&self.db, npc) {
            match self.state.quests.start_quest(&self.db, &quest, now) {
                Ok(()) => {
                    started = true;
                    let label = self.quest_label(&quest);
                    self.say(format!("Quest started: {label}"));
                }
                Err(error) => warn!(npc, %error, "quest_start_failed"),
            }
        }
        let token = self.next_token("talk", npc);
        let event = QuestEvent::TalkNpc {
            npc: npc.to_string(),
            qty: 1,
            token: Some(token),
        };
        let update = self.apply_event(&event, now);
        if !started && update.is_empty() {
            self.say(format!("The {npc} has nothing new for you."));
        }
    }

    fn quest_label(&self, quest: &str) -> String {
        self.db
            .quest(quest)
            .map(|def| def.label.clone())
            .unwrap_or_else(|| quest.to_string())
    }

    pub fn start_quest(&mut self, quest: &str) -> Result<(), QuestError> {
        let now = self.now();
        self.state.quests.start_quest(&self.db, quest, now)?;
        let label = self.quest_label(quest);
        self.say(format!("Quest started: {label}"));
        Ok(())
    }

    /// Feeds one event through the quest book and applies whatever it unlocked or paid out.
    pub fn track_quest_event(&mut self, event: &QuestEvent) -> QuestUpdate {
        let now = self.now();
        self.apply_event(event, now)
    }

    fn apply_event(&mut self, event: &QuestEvent, now: SimInstant) -> QuestUpdate {
        let update = self.state.quests.track_quest_event(&self.db, event, now);
        if update.duplicate_tokens > 0 {
            debug!(
                kind = event.type_key(),
                token = event.token(),
                duplicates = update.duplicate_tokens,
                "quest_event_duplicate"
            );
        }
        self.apply_quest_update(&update, now);
        update
    }

    pub(crate) fn apply_quest_update(&mut self, update: &QuestUpdate, now: SimInstant) {
        for advance in &update.advanced {
            let label = self
                .db
                .quest(&advance.quest)
                .and_then(|def| def.objective(&advance.objective))
                .map(|objective| objective.label.clone())
                .unwrap_or_else(|| advance.objective.clone());
            self.say(format!("{label}: {}/{}", advance.count, advance.target));
        }
        for quest in &update.completed {
            let label = self.quest_label(quest);
            self.say(format!("Quest complete: {label}"));
        }
        for (quest, reward) in &update.rewards {
            self.grant_reward(quest, reward, now);
        }
        for quest in &update.unlocked {
            let label = self.quest_label(quest);
            self.say(format!("New quest available: {label}"));
        }
        self.sync_gate();
    }

    fn grant_reward(&mut self, quest: &str, reward: &RewardDef, now: SimInstant) {
        match reward {
            RewardDef::Item { item, qty } => {
                match self.state.inventory.add(&self.db, item, *qty) {
                    Ok(()) => {}
                    Err(InventoryError::Full { .. }) => {
                        warn!(quest, item = %item, qty, "reward_dropped_to_ground");
                        let pos = self.state.player.pos;
                        self.state
                            .zones
                            .active_mut()
                            .drop_loot(pos, item, *qty, now);
                        self.say("Your inventory is full; the reward falls to the ground.");
                    }
                    Err(error) => warn!(quest, item = %item, %error, "reward_item_skipped"),
                }
            }
            RewardDef::Gold { amount } => self.state.wallet.credit(u64::from(*amount)),
            RewardDef::Xp { skill, amount } => match Skill::from_key(skill) {
                Some(skill) => self.grant_xp(skill, *amount),
                None => warn!(quest, skill = %skill, "reward_unknown_skill"),
            },
        }
    }

    fn grant_xp(&mut self, skill: Skill, amount: u32) {
        if let Some(level) = self.state.skills.add_xp(skill, amount) {
            info!(skill = skill.key(), level, "level_up");
            self.say(format!("Your {} level is now {level}.", skill.key()));
        }
    }

    fn sync_gate(&mut self) {
        let open = gate_open(&self.db, &self.state.quests);
        self.state
            .zones
            .with_zone(ZoneKey::Dungeon, |zone| sync_gate_flags(zone, open));
    }

    fn check_gating(&mut self, now: SimInstant) {
        self.sync_gate();
        if self.state.zones.active_zone() != ZoneKey::Dungeon {
            return;
        }
        if boss_should_spawn(self.state.zones.active(), &self.db, &self.state.quests)
            && spawn_boss(self.state.zones.active_mut(), &self.db, now)
        {
            self.say("The Warden awakens!");
        }
    }

    fn start_action(&mut self, kind: ActionKind, now: SimInstant) {
        debug!(action = kind.type_key(), at_ms = now.as_ms(), "action_started");
        self.state.player.action = Some(TimedAction::start(kind, now));
    }

    fn complete_due_action(&mut self, now: SimInstant) {
        let due = self
            .state
            .player
            .action
            .as_ref()
            .is_some_and(|action| action.is_due(now));
        if !due {
            return;
        }
        let Some(action) = self.state.player.action.take() else {
            return;
        };
        debug!(action = action.kind.type_key(), at_ms = now.as_ms(), "action_completed");
        match action.kind {
            ActionKind::Gather { resource_id } => self.finish_gathering(&resource_id, now),
            ActionKind::Smelt => {
                if self.finish_smelting(now) && self.smeltable_recipe().is_some() {
                    self.start_action(ActionKind::Smelt, now);
                }
            }
            ActionKind::Cook { fire } => {
                let fire_burning = self.state.zones.active().fire_at(fire).is_some();
                if self.finish_cooking(fire, now)
                    && fire_burning
                    && self.cookable_recipe().is_some()
                {
                    self.start_action(ActionKind::Cook { fire }, now);
                }
            }
            ActionKind::Smith { item } => self.finish_smithing(&item),
            ActionKind::LightFire => self.finish_lighting_fire(now),
        }
    }

    fn start_gathering(&mut self, id: &str, now: SimInstant) {
        let Some(kind) = self
            .state
            .zones
            .active()
            .resources
            .iter()
            .find(|node| node.id == id && node.alive)
            .map(|node| node.kind)
        else {
            return;
        };
        let level = self.state.skills.level(kind.skill());
        if level < kind.level_required() {
            self.say(format!(
                "You need {} level {} for that.",
                kind.skill().key(),
                kind.level_required()
            ));
            return;
        }
        if !self.state.inventory.can_add(&self.db, kind.yield_item(), 1) {
            self.say("Your inventory is full.");
            return;
        }
        self.start_action(
            ActionKind::Gather {
                resource_id: id.to_string(),
            },
            now,
        );
    }

    fn finish_gathering(&mut self, id: &str, now: SimInstant) {
        let Some(kind) = self
            .state
            .zones
            .active()
            .resources
            .iter()
            .find(|node| node.id == id && node.alive)
            .map(|node| node.kind)
        else {
            self.say("There is nothing left to gather.");
            return;
        };
        let item = kind.yield_item();
        if let Err(error) = self.state.inventory.add(&self.db, item, 1) {
            self.say(format!("You can't carry that: {error}."));
            return;
        }
        if let Some(node) = self.state.zones.active_mut().resource_mut(id) {
            node.deplete(now);
        }
        info!(resource = id, item, at_ms = now.as_ms(), "resource_gathered");
        self.grant_xp(kind.skill(), kind.xp());
        let token = self.next_token("gather", id);
        let event = QuestEvent::GatherItem {
            item: item.to_string(),
            qty: 1,
            token: Some(token),
        };
        self.apply_event(&event, now);
    }

    fn smeltable_recipe(&self) -> Option<&'static SmeltRecipe> {
        let level = self.state.skills.level(Skill::Smithing);
        SMELT_RECIPES.iter().find(|recipe| {
            level >= recipe.level
                && recipe
                    .inputs
                    .iter()
                    .all(|(item, qty)| self.state.inventory.count(item) >= *qty)
        })
    }

    fn start_smelting(&mut self, now: SimInstant) {
        if self.smeltable_recipe().is_none() {
            self.say("You have no ore you can smelt.");
            return;
        }
        self.start_action(ActionKind::Smelt, now);
    }

    fn finish_smelting(&mut self, now: SimInstant) -> bool {
        let Some(recipe) = self.smeltable_recipe() else {
            return false;
        };
        for (item, qty) in recipe.inputs {
            if let Err(error) = self.state.inventory.remove(item, *qty) {
                warn!(item, %error, "smelt_input_missing");
                return false;
            }
        }
        if let Err(error) = self.state.inventory.add(&self.db, recipe.bar, 1) {
            warn!(bar = recipe.bar, %error, "smelt_output_lost");
            return false;
        }
        self.grant_xp(Skill::Smithing, recipe.xp);
        let token = self.next_token("smelt", recipe.bar);
        let event = QuestEvent::SmeltItem {
            item: recipe.bar.to_string(),
            qty: 1,
            token: Some(token),
        };
        self.apply_event(&event, now);
        true
    }

    /// Picks what the anvil produces next.
    pub fn set_smith_choice(&mut self, product: &str) -> bool {
        if smith_recipe(product).is_none() {
            return false;
        }
        self.smith_choice = product.to_string();
        true
    }

    fn start_smithing(&mut self, now: SimInstant) {
        let Some(recipe) = smith_recipe(&self.smith_choice) else {
            return;
        };
        if self.state.skills.level(Skill::Smithing) < recipe.level {
            self.say(format!(
                "You need smithing level {} to make that.",
                recipe.level
            ));
            return;
        }
        if self.state.inventory.count(recipe.bar) < recipe.bars {
            self.say(format!("You need {} x {}.", recipe.bars, recipe.bar));
            return;
        }
        self.start_action(
            ActionKind::Smith {
                item: recipe.product.to_string(),
            },
            now,
        );
    }

    fn finish_smithing(&mut self, product: &str) {
        let Some(recipe) = smith_recipe(product) else {
            return;
        };
        // Staged on a copy so a rejected product leaves the bars untouched.
        let mut staged = self.state.inventory.clone();
        if staged.remove(recipe.bar, recipe.bars).is_err() {
            self.say(format!("You need {} x {}.", recipe.bars, recipe.bar));
            return;
        }
        if let Err(error) = staged.add(&self.db, recipe.product, recipe.output_qty) {
            warn!(product, %error, "smith_output_rejected");
            self.say(format!("You can't carry that: {error}."));
            return;
        }
        self.state.inventory = staged;
        self.grant_xp(Skill::Smithing, recipe.xp);
        self.say(format!("You make {} x {}.", recipe.output_qty, recipe.product));
    }

    fn cookable_recipe(&self) -> Option<&'static CookRecipe> {
        let level = self.state.skills.level(Skill::Cooking);
        COOK_RECIPES
            .iter()
            .find(|recipe| level >= recipe.level && self.state.inventory.contains(recipe.raw))
    }

    fn start_cooking(&mut self, fire: TilePos, now: SimInstant) {
        if self.cookable_recipe().is_none() {
            self.say("You have nothing to cook.");
            return;
        }
        self.start_action(ActionKind::Cook { fire }, now);
    }

    fn finish_cooking(&mut self, fire: TilePos, now: SimInstant) -> bool {
        if self.state.zones.active().fire_at(fire).is_none() {
            self.say("The fire has gone out.");
            return false;
        }
        let Some(recipe) = self.cookable_recipe() else {
            return false;
        };
        if self.state.inventory.remove(recipe.raw, 1).is_err() {
            return false;
        }
        let chance = burn_chance(self.state.skills.level(Skill::Cooking));
        let burnt = self.combat_rng.gen_bool(f64::from(chance));
        let product = if burnt { recipe.burnt } else { recipe.cooked };
        if let Err(error) = self.state.inventory.add(&self.db, product, 1) {
            warn!(product, %error, "cook_output_lost");
            return false;
        }
        if burnt {
            self.say(format!("You accidentally burn the {}.", recipe.raw));
            return true;
        }
        self.grant_xp(Skill::Cooking, COOKING_XP);
        let token = self.next_token("cook", recipe.cooked);
        let event = QuestEvent::CookAny {
            item: recipe.cooked.to_string(),
            qty: 1,
            token: Some(token),
        };
        self.apply_event(&event, now);
        true
    }

    /// Starts lighting a fire on the player's tile from one log.
    pub fn light_fire(&mut self) -> bool {
        let now = self.now();
        if !self.state.inventory.contains(ITEM_TINDERBOX) {
            self.say("You need a tinderbox.");
            return false;
        }
        if !self.state.inventory.contains(ITEM_LOGS) {
            self.say("You have no logs.");
            return false;
        }
        let pos = self.state.player.pos;
        let zone = self.state.zones.active();
        if zone.fire_at(pos).is_some() || zone.blueprint.in_building(pos) {
            self.say("You can't light a fire here.");
            return false;
        }
        self.state.player.stop();
        self.start_action(ActionKind::LightFire, now);
        true
    }

    fn finish_lighting_fire(&mut self, now: SimInstant) {
        let pos = self.state.player.pos;
        if self.state.zones.active().fire_at(pos).is_some() {
            return;
        }
        if self.state.inventory.remove(ITEM_LOGS, 1).is_err() {
            self.say("You have no logs.");
            return;
        }
        self.state.zones.active_mut().fires.push(Fire {
            pos,
            expires_at: now.after_ms(FIRE_DURATION_MS),
        });
        self.grant_xp(Skill::Firemaking, FIREMAKING_XP);
        self.say("The fire catches.");
    }

    fn pick_up_loot(&mut self, tile: TilePos, now: SimInstant) {
        let zone = self.state.zones.active_mut();
        let Some(pile) = zone.loot_at_mut(tile, now) else {
            return;
        };
        let offered = pile
            .items
            .iter()
            .map(|(item, qty)| (item.clone(), *qty))
            .collect::<Vec<_>>();
        let mut taken = Vec::new();
        let mut left_behind = false;
        for (item, qty) in offered {
            match self.state.inventory.add(&self.db, &item, qty) {
                Ok(()) => {
                    pile.items.remove(&item);
                    taken.push(format!("{qty} x {item}"));
                }
                Err(_) => left_behind = true,
            }
        }
        zone.remove_empty_loot();
        if !taken.is_empty() {
            self.say(format!("You pick up {}.", taken.join(", ")));
        }
        if left_behind {
            self.say("You can't carry everything here.");
        }
    }

    /// Targets a live mob in the active zone; combat closes the distance each tick.
    pub fn attack(&mut self, mob_id: &str) -> bool {
        let alive = self
            .state
            .zones
            .active()
            .mob(mob_id)
            .is_some_and(|mob| mob.alive);
        if !alive {
            self.say("There is nothing to attack.");
            return false;
        }
        self.state.player.stop();
        self.state.player.attack_target = Some(mob_id.to_string());
        self.open_panel = None;
        true
    }

    fn player_combat(&mut self, now: SimInstant) {
        let Some(target_id) = self.state.player.attack_target.clone() else {
            return;
        };
        let db = Arc::clone(&self.db);
        let Some((mob_pos, def)) = self
            .state
            .zones
            .active()
            .mob(&target_id)
            .filter(|mob| mob.alive)
            .and_then(|mob| db.mob(&mob.def_name).map(|def| (mob.pos, def)))
        else {
            self.state.player.attack_target = None;
            return;
        };

        let stats = self.combat_stats();
        let distance = self.state.player.pos.manhattan(mob_pos);
        if distance == 0 || distance > stats.style.range() {
            if self.state.player.path.is_empty() {
                match self.plan_path(mob_pos, true) {
                    Some(path) => self.state.player.path = path.into(),
                    None => {
                        self.state.player.attack_target = None;
                        self.say("You can't reach your target.");
                    }
                }
            }
            return;
        }

        self.state.player.path.clear();
        if !self.state.player.next_attack_at.has_passed(now) {
            return;
        }
        if stats.style.needs_ammo() && self.state.quiver.consume_one().is_none() {
            self.state.player.attack_target = None;
            self.say("You have no ammunition.");
            return;
        }
        let roll = roll_attack(
            &mut self.combat_rng,
            stats.accuracy,
            mob_defence(def),
            stats.max_hit,
            0,
        );
        self.state.player.next_attack_at = now.after_ms(PLAYER_ATTACK_COOLDOWN_MS);
        let Some(mob) = self.state.zones.active_mut().mob_mut(&target_id) else {
            return;
        };
        mob.ai.provoked_until = now.after_ms(PROVOKE_MS);
        mob.hp = mob.hp.saturating_sub(roll.damage);
        let killed = mob.hp == 0;
        debug!(
            mob = %target_id,
            hit = roll.hit,
            damage = roll.damage,
            mob_hp = mob.hp,
            "player_attack"
        );
        for (skill, xp) in combat_xp(stats.style, roll.damage) {
            self.grant_xp(skill, xp);
        }
        if killed {
            self.on_mob_killed(&target_id, def, stats.style, now);
        }
    }

    /// Death, then the drop roll, then the kill event; exactly once per kill.
    fn on_mob_killed(&mut self, id: &str, def: &MobDef, style: AttackStyle, now: SimInstant) {
        let zone = self.state.zones.active_mut();
        let Some(mob) = zone.mob_mut(id) else {
            return;
        };
        let pos = mob.pos;
        mob.kill(now, def.respawn_ms);
        for entry in &def.drops {
            let chance = f64::from(entry.chance.clamp(0.0, 1.0));
            if !self.combat_rng.gen_bool(chance) {
                continue;
            }
            if self.db.item(&entry.item).is_none() {
                warn!(mob = %def.def_name, item = %entry.item, "drop_unknown_item");
                continue;
            }
            let low = entry.min.min(entry.max);
            let high = entry.min.max(entry.max);
            let qty = self.combat_rng.gen_range(low..=high);
            zone.drop_loot(pos, &entry.item, qty, now);
        }
        self.state.player.attack_target = None;
        info!(mob = id, def = %def.def_name, at_ms = now.as_ms(), "mob_killed");
        self.say(format!("You defeat the {}.", def.label));

        let kill_skill = match style {
            AttackStyle::Melee => Skill::Attack,
            AttackStyle::Ranged => Skill::Ranged,
            AttackStyle::Magic => Skill::Magic,
        };
        self.grant_xp(kill_skill, def.xp);
        let token = self.next_token("kill", id);
        let event = QuestEvent::KillMob {
            mob: def.def_name.clone(),
            qty: 1,
            token: Some(token),
        };
        self.apply_event(&event, now);

        if id == BOSS_MOB_ID {
            boss_defeated(self.state.zones.active_mut(), now);
            self.say("The Warden falls. The braziers gutter out.");
        }
    }

    fn run_ai(&mut self, now: SimInstant) {
        let stats = self.combat_stats();
        let target = PlayerTarget {
            pos: self.state.player.pos,
            alive: self.state.player.hp > 0,
            invulnerable: self.state.player.is_invulnerable(now),
            defence: stats.defence,
            damage_reduction: stats.damage_reduction,
        };
        let zone = self.state.zones.active_mut();
        let report = tick_mobs(
            zone,
            &self.db,
            &target,
            now,
            &mut self.combat_rng,
            &mut self.ai_rng,
        );
        if report.damage_to_player == 0 {
            return;
        }
        let player = &mut self.state.player;
        player.hp = player.hp.saturating_sub(report.damage_to_player);
        let hp = player.hp;
        self.say(format!("You take {} damage.", report.damage_to_player));
        if hp == 0 {
            self.player_died(now);
        }
    }

    fn player_died(&mut self, now: SimInstant) {
        let zone = self.state.zones.active_zone();
        info!(zone = zone.key(), at_ms = now.as_ms(), "player_died");
        disengage_all(self.state.zones.active_mut());
        self.state.zones.set_active_zone(ZoneKey::Overworld);
        let max_hp = self.state.skills.max_hitpoints();
        let player = &mut self.state.player;
        player.stop();
        player.pos = PLAYER_SPAWN;
        player.hp = max_hp;
        player.invulnerable_until = now.after_ms(RESPAWN_INVULN_MS);
        self.open_panel = None;
        self.say("Oh dear, you are dead!");
    }

    fn require_panel(&self, panel: Panel) -> Result<(), ActionError> {
        if self.open_panel == Some(panel) {
            Ok(())
        } else {
            Err(ActionError::PanelClosed { panel: panel.key() })
        }
    }

    pub fn deposit(&mut self, item: &str, qty: u32) -> Result<(), ActionError> {
        self.require_panel(Panel::Bank)?;
        inventory::deposit(&mut self.state.inventory, &mut self.state.bank, item, qty)?;
        debug!(item, qty, "bank_deposit");
        Ok(())
    }

    pub fn withdraw(&mut self, item: &str, qty: u32) -> Result<(), ActionError> {
        self.require_panel(Panel::Bank)?;
        inventory::withdraw(
            &self.db,
            &mut self.state.inventory,
            &mut self.state.bank,
            item,
            qty,
        )?;
        debug!(item, qty, "bank_withdraw");
        Ok(())
    }

    pub fn buy(&mut self, item: &str, qty: u32) -> Result<u64, ActionError> {
        self.require_panel(Panel::Vendor)?;
        if !VENDOR_STOCK.contains(&item) {
            return Err(ActionError::NotStocked {
                item: item.to_string(),
            });
        }
        let cost = inventory::buy(
            &self.db,
            &mut self.state.inventory,
            &mut self.state.wallet,
            item,
            qty,
        )?;
        info!(item, qty, cost, "vendor_buy");
        Ok(cost)
    }

    pub fn sell(&mut self, item: &str, qty: u32) -> Result<u64, ActionError> {
        self.require_panel(Panel::Vendor)?;
        let proceeds = inventory::sell(
            &self.db,
            &mut self.state.inventory,
            &mut self.state.wallet,
            item,
            qty,
        )?;
        info!(item, qty, proceeds, "vendor_sell");
        Ok(proceeds)
    }

    pub fn equip(&mut self, item: &str) -> Result<(), ActionError> {
        inventory::equip(
            &self.db,
            &mut self.state.inventory,
            &mut self.state.equipment,
            &mut self.state.quiver,
            item,
        )?;
        Ok(())
    }

    pub fn unequip(&mut self, slot: &str) -> Result<(), ActionError> {
        let slot = EquipSlot::from_key(slot).ok_or_else(|| ActionError::UnknownSlot {
            slot: slot.to_string(),
        })?;
        inventory::unequip(
            &self.db,
            &mut self.state.inventory,
            &mut self.state.equipment,
            slot,
        )?;
        Ok(())
    }

    /// Eats one unit and returns the hitpoints actually restored.
    pub fn eat(&mut self, item: &str) -> Result<u32, ActionError> {
        let heals = self
            .db
            .item(item)
            .map(|def| def.heals)
            .filter(|heals| *heals > 0)
            .ok_or_else(|| ActionError::NotEdible {
                item: item.to_string(),
            })?;
        self.state.inventory.remove(item, 1)?;
        let max_hp = self.state.skills.max_hitpoints();
        let before = self.state.player.hp;
        self.state.player.hp = before.saturating_add(heals).min(max_hp);
        Ok(self.state.player.hp - before)
    }

    /// Debug grant straight into the inventory.
    pub fn give_item(&mut self, item: &str, qty: u32) -> Result<(), InventoryError> {
        self.state.inventory.add(&self.db, item, qty)
    }

    pub fn set_zoom(&mut self, zoom: f32) -> f32 {
        self.state.settings.zoom = clamp_zoom(zoom);
        self.state.settings.zoom
    }
}

#[cfg(test)]
mod tests {
    use crate::content::builtin_def_database;
    use crate::maps::{ANVIL_POS, BANK_POS, FURNACE_POS, QUARTERMASTER_POS, VENDOR_POS, WELL_POS};

    use super::*;

    fn session(class: PlayerClass) -> GameSession {
        let db = Arc::new(builtin_def_database().expect("defs"));
        GameSession::new(db, 1234, class).expect("session")
    }

    fn run(session: &mut GameSession, ticks: u32) {
        for _ in 0..ticks {
            session.update(50);
        }
    }

    #[test]
    fn starting_kit_depends_on_class() {
        let warrior = session(PlayerClass::Warrior);
        assert_eq!(warrior.state().equipment.get(EquipSlot::Weapon), Some("bronze_sword"));
        assert_eq!(warrior.state().wallet.gold(), STARTING_GOLD);
        assert!(warrior.state().inventory.contains(ITEM_TINDERBOX));

        let ranger = session(PlayerClass::Ranger);
        assert_eq!(ranger.state().equipment.get(EquipSlot::Weapon), Some("shortbow"));
        assert_eq!(ranger.state().quiver.ammo_count(), STARTING_ARROWS);

        let mage = session(PlayerClass::Mage);
        assert!(mage.state().equipment.get(EquipSlot::Weapon).is_none());
    }

    #[test]
    fn interact_reports_reasons() {
        let mut session = session(PlayerClass::Warrior);
        assert_eq!(
            session.interact_tile(-1, 5),
            InteractOutcome::rejected("out_of_bounds")
        );
        assert_eq!(
            session.interact_tile(8, 9),
            InteractOutcome::rejected("no_entity")
        );
        assert_eq!(
            session.interact_tile(WELL_POS.x, WELL_POS.y),
            InteractOutcome::rejected("decor_only")
        );
    }

    #[test]
    fn walking_to_a_fixture_uses_it_on_arrival() {
        let mut session = session(PlayerClass::Warrior);
        let outcome = session.interact_tile(BANK_POS.x, BANK_POS.y);
        assert!(outcome.ok);
        assert!(session.state().player.pending_interaction.is_some());
        run(&mut session, 200);
        assert_eq!(session.open_panel(), Some(Panel::Bank));
        assert_eq!(session.state().player.pos.manhattan(BANK_POS), 1);
    }

    #[test]
    fn bank_and_vendor_need_their_panel() {
        let mut session = session(PlayerClass::Warrior);
        assert!(matches!(
            session.deposit(ITEM_TINDERBOX, 1),
            Err(ActionError::PanelClosed { panel: "bank" })
        ));

        assert!(session.teleport(VENDOR_POS.x, VENDOR_POS.y + 1, TeleportOptions::default()));
        assert!(session.interact_tile(VENDOR_POS.x, VENDOR_POS.y).ok);
        assert_eq!(session.open_panel(), Some(Panel::Vendor));
        let cost = session.buy("bronze_arrows", 5).expect("buy arrows");
        assert_eq!(cost, 10);
        assert_eq!(session.state().wallet.gold(), STARTING_GOLD - 10);
        assert!(matches!(
            session.buy("warden_relic", 1),
            Err(ActionError::NotStocked { .. })
        ));
        let proceeds = session.sell("bronze_arrows", 5).expect("sell arrows");
        assert_eq!(proceeds, 0);
    }

    #[test]
    fn smelting_repeats_while_ore_remains() {
        let mut session = session(PlayerClass::Warrior);
        for item in ["copper_ore", "tin_ore"] {
            session.give_item(item, 2).expect("ore");
        }
        assert!(session.teleport(FURNACE_POS.x, FURNACE_POS.y + 1, TeleportOptions::default()));
        assert!(session.interact_tile(FURNACE_POS.x, FURNACE_POS.y).ok);
        assert!(session.state().player.action.is_some());
        run(&mut session, 80);
        assert_eq!(session.state().inventory.count("bronze_bar"), 2);
        assert_eq!(session.state().inventory.count("copper_ore"), 0);
        assert!(session.state().player.action.is_none());
    }

    #[test]
    fn smithing_with_no_room_keeps_the_bars() {
        let mut session = session(PlayerClass::Warrior);
        session.give_item("bronze_bar", 2).expect("bars");
        while session.state().inventory.free_slots() > 0 {
            session.give_item("logs", 1).expect("logs");
        }
        assert!(session.set_smith_choice("bronze_arrows"));
        assert!(session.interact_tile(ANVIL_POS.x, ANVIL_POS.y).ok);
        run(&mut session, 300);

        assert_eq!(session.state().inventory.count("bronze_bar"), 2);
        assert_eq!(session.state().inventory.count("bronze_arrows"), 0);
        assert!(session
            .messages()
            .any(|line| line.starts_with("You can't carry that")));
    }

    #[test]
    fn talking_to_the_quartermaster_starts_first_watch() {
        let mut session = session(PlayerClass::Warrior);
        assert!(session.teleport(
            QUARTERMASTER_POS.x,
            QUARTERMASTER_POS.y + 1,
            TeleportOptions::default()
        ));
        assert!(session
            .interact_tile(QUARTERMASTER_POS.x, QUARTERMASTER_POS.y)
            .ok);
        assert!(session.state().quests.is_started("first_watch"));
        assert_eq!(
            session
                .state()
                .quests
                .objective_count("first_watch", "report_back"),
            1
        );
    }

    #[test]
    fn zoom_is_clamped() {
        let mut session = session(PlayerClass::Mage);
        assert_eq!(session.set_zoom(10.0), MAX_ZOOM);
        assert_eq!(session.set_zoom(0.1), MIN_ZOOM);
        assert_eq!(session.set_zoom(f32::NAN), DEFAULT_ZOOM);
    }

    #[test]
    fn eating_heals_up_to_max() {
        let mut session = session(PlayerClass::Warrior);
        session.give_item("shrimp", 1).expect("shrimp");
        session.state_mut().player.hp = 9;
        assert_eq!(session.eat("shrimp").expect("eat"), 1);
        assert_eq!(session.state().player.hp, 10);
        assert!(matches!(session.eat("logs"), Err(ActionError::NotEdible { .. })));
    }
}
