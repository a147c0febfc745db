//! Introspection and the line-oriented debug console shared by stdin and the dev thruport.

use std::collections::BTreeMap;

use engine::{
    parse_arg, require_arg_count, require_no_args, BlobStore, CommandParseError,
    ConsoleCommandRegistry, ConsoleRegistryError,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::entities::{BossState, InteractableKind, LadderDirection};
use crate::inventory::ItemStack;
use crate::persistence::LoadReport;
use crate::player::PlayerClass;
use crate::quests::QuestEvent;
use crate::session::{GameSession, TeleportOptions};
use crate::skills::Skill;
use crate::zones::ZoneKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackSnapshot {
    pub item: String,
    pub qty: u32,
}

impl From<&ItemStack> for StackSnapshot {
    fn from(stack: &ItemStack) -> Self {
        Self {
            item: stack.item.clone(),
            qty: stack.qty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub x: i32,
    pub y: i32,
    pub class: PlayerClass,
    pub hp: u32,
    pub max_hp: u32,
    pub invulnerable: bool,
    pub action: Option<&'static str>,
    pub attack_target: Option<String>,
    pub path_len: usize,
    pub combat_level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobSnapshot {
    pub id: String,
    pub def: String,
    pub x: i32,
    pub y: i32,
    pub hp: u32,
    pub combat_level: u32,
    pub alive: bool,
    pub engaged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSnapshot {
    pub key: ZoneKey,
    pub populated: bool,
    pub mobs: Vec<MobSnapshot>,
    pub resources_alive: usize,
    pub resources_total: usize,
    pub fires: usize,
    pub loot_piles: usize,
    pub boss: BossState,
    pub gate_open: bool,
    pub braziers_lit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub now_ms: u64,
    pub world_seed: u32,
    pub active_zone: ZoneKey,
    pub player: PlayerSnapshot,
    pub gold: u64,
    pub inventory: Vec<StackSnapshot>,
    pub bank: Vec<StackSnapshot>,
    pub equipment: BTreeMap<&'static str, String>,
    pub quiver: Option<StackSnapshot>,
    pub skills: BTreeMap<&'static str, u32>,
    pub zone: ZoneSnapshot,
    pub open_panel: Option<&'static str>,
    pub zoom: f32,
    pub nav_rebuilds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveSnapshot {
    pub id: String,
    pub label: String,
    pub count: u32,
    pub target: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestSnapshot {
    pub id: String,
    pub label: String,
    pub status: &'static str,
    pub objectives: Vec<ObjectiveSnapshot>,
    pub completed_at_ms: Option<u64>,
    pub rewards_granted: bool,
}

pub fn state_snapshot(session: &GameSession) -> StateSnapshot {
    let state = session.state();
    let now = session.now();
    let zone = state.zones.active();
    let player = &state.player;
    StateSnapshot {
        now_ms: now.as_ms(),
        world_seed: state.world_seed,
        active_zone: zone.key(),
        player: PlayerSnapshot {
            x: player.pos.x,
            y: player.pos.y,
            class: player.class,
            hp: player.hp,
            max_hp: state.skills.max_hitpoints(),
            invulnerable: player.is_invulnerable(now),
            action: player.action.as_ref().map(|action| action.kind.type_key()),
            attack_target: player.attack_target.clone(),
            path_len: player.path.len(),
            combat_level: state.skills.combat_level(),
        },
        gold: state.wallet.gold(),
        inventory: state
            .inventory
            .slots()
            .iter()
            .flatten()
            .map(StackSnapshot::from)
            .collect(),
        bank: state.bank.stacks().iter().map(StackSnapshot::from).collect(),
        equipment: state
            .equipment
            .iter()
            .map(|(slot, item)| (slot.key(), item.to_string()))
            .collect(),
        quiver: state.quiver.stack.as_ref().map(StackSnapshot::from),
        skills: Skill::ALL
            .into_iter()
            .map(|skill| (skill.key(), state.skills.level(skill)))
            .collect(),
        zone: ZoneSnapshot {
            key: zone.key(),
            populated: zone.populated,
            mobs: zone
                .mobs
                .iter()
                .map(|mob| MobSnapshot {
                    id: mob.id.clone(),
                    def: mob.def_name.clone(),
                    x: mob.pos.x,
                    y: mob.pos.y,
                    hp: mob.hp,
                    combat_level: mob.combat_level,
                    alive: mob.alive,
                    engaged: mob.ai.target_player,
                })
                .collect(),
            resources_alive: zone.resources.iter().filter(|node| node.alive).count(),
            resources_total: zone.resources.len(),
            fires: zone.fires.len(),
            loot_piles: zone
                .ground_loot
                .iter()
                .filter(|pile| !pile.is_expired(now))
                .count(),
            boss: zone.boss,
            gate_open: zone
                .interactables
                .iter()
                .any(|fixture| fixture.kind == InteractableKind::SealedGate && fixture.open),
            braziers_lit: zone
                .interactables
                .iter()
                .filter(|fixture| {
                    matches!(fixture.kind, InteractableKind::Brazier { .. }) && fixture.lit
                })
                .count(),
        },
        open_panel: session.open_panel().map(|panel| panel.key()),
        zoom: state.settings.zoom,
        nav_rebuilds: session.nav_rebuilds(),
    }
}

/// Every defined quest with its live progress, in definition order.
pub fn quest_snapshot(session: &GameSession) -> Vec<QuestSnapshot> {
    let db = session.db();
    let quests = &session.state().quests;
    db.quests()
        .map(|def| {
            let progress = quests.progress(&def.def_name);
            QuestSnapshot {
                id: def.def_name.clone(),
                label: def.label.clone(),
                status: quests
                    .status(db, &def.def_name)
                    .map_or("unknown", |status| status.key()),
                objectives: def
                    .objectives
                    .iter()
                    .map(|objective| ObjectiveSnapshot {
                        id: objective.id.clone(),
                        label: objective.label.clone(),
                        count: quests.objective_count(&def.def_name, &objective.id),
                        target: objective.target,
                    })
                    .collect(),
                completed_at_ms: progress
                    .and_then(|progress| progress.completed_at)
                    .map(|at| at.as_ms()),
                rewards_granted: progress.is_some_and(|progress| progress.rewards_granted),
            }
        })
        .collect()
}

/// Inventory quantity of one item; the quiver counts toward its ammo.
pub fn inventory_qty(session: &GameSession, item: &str) -> u32 {
    let state = session.state();
    let quivered = state
        .quiver
        .stack
        .as_ref()
        .filter(|stack| stack.item == item)
        .map_or(0, |stack| stack.qty);
    state.inventory.count(item).saturating_add(quivered)
}

/// Advances `ticks` fixed steps of `dt_ms` each.
pub fn advance_ticks(session: &mut GameSession, ticks: u32, dt_ms: u64) {
    for _ in 0..ticks {
        session.update(dt_ms);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebugCommand {
    Help,
    Snapshot,
    Quests,
    Qty { item: String },
    Tick { ticks: u32 },
    Save,
    Load,
    ClearSave,
    Teleport { x: i32, y: i32, force: bool },
    Interact { x: i32, y: i32 },
    Move { x: i32, y: i32 },
    Ladder { direction: LadderDirection },
    StartQuest { quest: String },
    Give { item: String, qty: u32 },
    QuestEvent { event: QuestEvent },
    Attack { mob: String },
    Deposit { item: String, qty: u32 },
    Withdraw { item: String, qty: u32 },
    Buy { item: String, qty: u32 },
    Sell { item: String, qty: u32 },
    Equip { item: String },
    Unequip { slot: String },
    LightFire,
    Eat { item: String },
    Smith { product: String },
    Zoom { zoom: f32 },
    Status,
    Quit,
}

fn parse_xy(args: &[String], usage: &str) -> Result<(i32, i32), CommandParseError> {
    Ok((
        parse_arg(args, 0, "x", "integer", usage)?,
        parse_arg(args, 1, "y", "integer", usage)?,
    ))
}

fn parse_item_qty(args: &[String], usage: &str) -> Result<(String, u32), CommandParseError> {
    if args.is_empty() || args.len() > 2 {
        return Err(CommandParseError::new(
            format!("expected 1 or 2 argument(s), got {}", args.len()),
            usage,
        ));
    }
    let qty = if args.len() == 2 {
        parse_arg(args, 1, "qty", "positive integer", usage)?
    } else {
        1
    };
    Ok((args[0].clone(), qty))
}

fn parse_single(args: &[String], usage: &str) -> Result<String, CommandParseError> {
    require_arg_count(args, 1, usage)?;
    Ok(args[0].clone())
}

fn parse_quest_event(args: &[String]) -> Result<DebugCommand, CommandParseError> {
    const USAGE: &str = "quest_event <kind> <subject> <token|-> [qty]";
    if args.len() != 3 && args.len() != 4 {
        return Err(CommandParseError::new(
            format!("expected 3 or 4 argument(s), got {}", args.len()),
            USAGE,
        ));
    }
    let subject = args[1].clone();
    // "-" raises the event without a token.
    let token = Some(args[2].clone()).filter(|token| token != "-");
    let qty = if args.len() == 4 {
        parse_arg(args, 3, "qty", "positive integer", USAGE)?
    } else {
        1
    };
    let event = match args[0].as_str() {
        "gather_item" => QuestEvent::GatherItem {
            item: subject,
            qty,
            token,
        },
        "cook_any" => QuestEvent::CookAny {
            item: subject,
            qty,
            token,
        },
        "smelt_item" => QuestEvent::SmeltItem {
            item: subject,
            qty,
            token,
        },
        "kill_mob" => QuestEvent::KillMob {
            mob: subject,
            qty,
            token,
        },
        "talk_npc" => QuestEvent::TalkNpc {
            npc: subject,
            qty,
            token,
        },
        "manual" => QuestEvent::Manual {
            key: subject,
            qty,
            token,
        },
        other => {
            return Err(CommandParseError::new(
                format!("unknown event kind '{other}'"),
                USAGE,
            ))
        }
    };
    Ok(DebugCommand::QuestEvent { event })
}

pub fn debug_command_registry() -> Result<ConsoleCommandRegistry<DebugCommand>, ConsoleRegistryError>
{
    let mut registry = ConsoleCommandRegistry::new();
    registry.register("help", "List commands", "", |args| {
        require_no_args(args, "help")?;
        Ok(DebugCommand::Help)
    })?;
    registry.register("snapshot", "Print session state as JSON", "", |args| {
        require_no_args(args, "snapshot")?;
        Ok(DebugCommand::Snapshot)
    })?;
    registry.register("quests", "Print quest progress as JSON", "", |args| {
        require_no_args(args, "quests")?;
        Ok(DebugCommand::Quests)
    })?;
    registry.register("qty", "Inventory quantity of an item", "<item>", |args| {
        Ok(DebugCommand::Qty {
            item: parse_single(args, "qty <item>")?,
        })
    })?;
    registry.register("tick", "Advance fixed ticks", "[n]", |args| {
        const USAGE: &str = "tick [n]";
        let ticks = if args.is_empty() {
            1
        } else {
            require_arg_count(args, 1, USAGE)?;
            parse_arg(args, 0, "n", "positive integer", USAGE)?
        };
        Ok(DebugCommand::Tick { ticks })
    })?;
    registry.register("save", "Write the save slot", "", |args| {
        require_no_args(args, "save")?;
        Ok(DebugCommand::Save)
    })?;
    registry.register("load", "Restore the save slot", "", |args| {
        require_no_args(args, "load")?;
        Ok(DebugCommand::Load)
    })?;
    registry.register("clear_save", "Delete the save slot", "", |args| {
        require_no_args(args, "clear_save")?;
        Ok(DebugCommand::ClearSave)
    })?;
    registry.register(
        "teleport",
        "Move the player instantly",
        "<x> <y> [force]",
        |args| {
            const USAGE: &str = "teleport <x> <y> [force]";
            let force = match args.get(2).map(String::as_str) {
                None => false,
                Some("force") if args.len() == 3 => true,
                Some(_) => return Err(CommandParseError::new("unexpected arguments", USAGE)),
            };
            let (x, y) = parse_xy(args, USAGE)?;
            Ok(DebugCommand::Teleport { x, y, force })
        },
    )?;
    registry.register("interact", "Click a tile", "<x> <y>", |args| {
        const USAGE: &str = "interact <x> <y>";
        require_arg_count(args, 2, USAGE)?;
        let (x, y) = parse_xy(args, USAGE)?;
        Ok(DebugCommand::Interact { x, y })
    })?;
    registry.register("move", "Walk to a tile", "<x> <y>", |args| {
        const USAGE: &str = "move <x> <y>";
        require_arg_count(args, 2, USAGE)?;
        let (x, y) = parse_xy(args, USAGE)?;
        Ok(DebugCommand::Move { x, y })
    })?;
    registry.register("ladder", "Climb to the other zone", "<up|down>", |args| {
        const USAGE: &str = "ladder <up|down>";
        let raw = parse_single(args, USAGE)?;
        let direction = LadderDirection::from_key(&raw).ok_or_else(|| {
            CommandParseError::new(format!("invalid direction '{raw}'"), USAGE)
        })?;
        Ok(DebugCommand::Ladder { direction })
    })?;
    registry.register("start_quest", "Start a quest", "<quest>", |args| {
        Ok(DebugCommand::StartQuest {
            quest: parse_single(args, "start_quest <quest>")?,
        })
    })?;
    registry.register("give", "Add items to the inventory", "<item> [qty]", |args| {
        let (item, qty) = parse_item_qty(args, "give <item> [qty]")?;
        Ok(DebugCommand::Give { item, qty })
    })?;
    registry.register(
        "quest_event",
        "Raise a quest event",
        "<kind> <subject> <token|-> [qty]",
        parse_quest_event,
    )?;
    registry.register("attack", "Attack a mob by id", "<mob>", |args| {
        Ok(DebugCommand::Attack {
            mob: parse_single(args, "attack <mob>")?,
        })
    })?;
    registry.register("deposit", "Bank items", "<item> [qty]", |args| {
        let (item, qty) = parse_item_qty(args, "deposit <item> [qty]")?;
        Ok(DebugCommand::Deposit { item, qty })
    })?;
    registry.register("withdraw", "Take items from the bank", "<item> [qty]", |args| {
        let (item, qty) = parse_item_qty(args, "withdraw <item> [qty]")?;
        Ok(DebugCommand::Withdraw { item, qty })
    })?;
    registry.register("buy", "Buy from the open store", "<item> [qty]", |args| {
        let (item, qty) = parse_item_qty(args, "buy <item> [qty]")?;
        Ok(DebugCommand::Buy { item, qty })
    })?;
    registry.register("sell", "Sell to the open store", "<item> [qty]", |args| {
        let (item, qty) = parse_item_qty(args, "sell <item> [qty]")?;
        Ok(DebugCommand::Sell { item, qty })
    })?;
    registry.register("equip", "Equip an item", "<item>", |args| {
        Ok(DebugCommand::Equip {
            item: parse_single(args, "equip <item>")?,
        })
    })?;
    registry.register("unequip", "Empty an equipment slot", "<slot>", |args| {
        Ok(DebugCommand::Unequip {
            slot: parse_single(args, "unequip <slot>")?,
        })
    })?;
    registry.register("light_fire", "Light a fire underfoot", "", |args| {
        require_no_args(args, "light_fire")?;
        Ok(DebugCommand::LightFire)
    })?;
    registry.register("eat", "Eat one food item", "<item>", |args| {
        Ok(DebugCommand::Eat {
            item: parse_single(args, "eat <item>")?,
        })
    })?;
    registry.register("smith", "Choose the anvil product", "<item>", |args| {
        Ok(DebugCommand::Smith {
            product: parse_single(args, "smith <item>")?,
        })
    })?;
    registry.register("zoom", "Set the camera zoom", "<value>", |args| {
        const USAGE: &str = "zoom <value>";
        require_arg_count(args, 1, USAGE)?;
        Ok(DebugCommand::Zoom {
            zoom: parse_arg(args, 0, "value", "number", USAGE)?,
        })
    })?;
    registry.register("status", "One-line session summary", "", |args| {
        require_no_args(args, "status")?;
        Ok(DebugCommand::Status)
    })?;
    registry.register("quit", "Stop the simulation", "", |args| {
        require_no_args(args, "quit")?;
        Ok(DebugCommand::Quit)
    })?;
    Ok(registry)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleReply {
    pub lines: Vec<String>,
    pub quit: bool,
}

impl ConsoleReply {
    fn lines(lines: Vec<String>) -> Self {
        Self { lines, quit: false }
    }

    fn line(line: impl Into<String>) -> Self {
        Self::lines(vec![line.into()])
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|error| format!("error: encode json: {error}"))
}

fn ok_or_error<T, E: std::fmt::Display>(result: Result<T, E>, ok: impl FnOnce(T) -> String) -> String {
    match result {
        Ok(value) => ok(value),
        Err(error) => format!("error: {error}"),
    }
}

/// Parses console lines and runs them against a session and a save store.
pub struct DebugConsole {
    registry: ConsoleCommandRegistry<DebugCommand>,
    store: Box<dyn BlobStore + Send>,
    dt_ms: u64,
}

impl DebugConsole {
    pub fn new(
        store: Box<dyn BlobStore + Send>,
        dt_ms: u64,
    ) -> Result<Self, ConsoleRegistryError> {
        Ok(Self {
            registry: debug_command_registry()?,
            store,
            dt_ms: dt_ms.max(1),
        })
    }

    pub fn handle_line(&mut self, session: &mut GameSession, line: &str) -> ConsoleReply {
        match self.registry.parse_line(line) {
            Ok(Some(command)) => {
                debug!(?command, "console_command");
                let mut reply = self.execute(session, command);
                reply.lines.extend(session.drain_messages());
                reply
            }
            Ok(None) => ConsoleReply::default(),
            Err(error) => ConsoleReply::line(error),
        }
    }

    pub fn execute(&mut self, session: &mut GameSession, command: DebugCommand) -> ConsoleReply {
        match command {
            DebugCommand::Help => ConsoleReply::lines(self.registry.help_lines()),
            DebugCommand::Snapshot => ConsoleReply::line(to_json(&state_snapshot(session))),
            DebugCommand::Quests => ConsoleReply::line(to_json(&quest_snapshot(session))),
            DebugCommand::Qty { item } => {
                ConsoleReply::line(format!("{item} {}", inventory_qty(session, &item)))
            }
            DebugCommand::Tick { ticks } => {
                advance_ticks(session, ticks, self.dt_ms);
                ConsoleReply::line(format!("ok: now {}ms", session.now().as_ms()))
            }
            DebugCommand::Save => ConsoleReply::line(ok_or_error(
                session.save(self.store.as_mut()),
                |()| "ok: saved".to_string(),
            )),
            DebugCommand::Load => {
                let report = session
                    .load(self.store.as_ref())
                    .unwrap_or_else(|error| LoadReport::failed(&error));
                info!(ok = report.ok, repaired = report.repaired, "console_load");
                ConsoleReply::line(to_json(&report))
            }
            DebugCommand::ClearSave => ConsoleReply::line(ok_or_error(
                session.clear_save(self.store.as_mut()),
                |existed| format!("ok: cleared {existed}"),
            )),
            DebugCommand::Teleport { x, y, force } => {
                let options = TeleportOptions {
                    require_walkable: !force,
                    ..TeleportOptions::default()
                };
                if session.teleport(x, y, options) {
                    ConsoleReply::line(format!("ok: at {x},{y}"))
                } else {
                    ConsoleReply::line(format!("error: cannot teleport to {x},{y}"))
                }
            }
            DebugCommand::Interact { x, y } => {
                ConsoleReply::line(to_json(&session.interact_tile(x, y)))
            }
            DebugCommand::Move { x, y } => ConsoleReply::line(if session.walk_to(x, y) {
                "ok: walking".to_string()
            } else {
                "error: no path".to_string()
            }),
            DebugCommand::Ladder { direction } => {
                ConsoleReply::line(if session.use_ladder(direction) {
                    format!("ok: {}", session.state().zones.active_zone().key())
                } else {
                    "error: no ladder that way".to_string()
                })
            }
            DebugCommand::StartQuest { quest } => ConsoleReply::line(ok_or_error(
                session.start_quest(&quest),
                |()| format!("ok: started {quest}"),
            )),
            DebugCommand::Give { item, qty } => ConsoleReply::line(ok_or_error(
                session.give_item(&item, qty),
                |()| format!("ok: {item} {}", inventory_qty(session, &item)),
            )),
            DebugCommand::QuestEvent { event } => {
                let update = session.track_quest_event(&event);
                ConsoleReply::line(format!(
                    "ok: advanced {} completed {} duplicates {}",
                    update.advanced.len(),
                    update.completed.len(),
                    update.duplicate_tokens
                ))
            }
            DebugCommand::Attack { mob } => ConsoleReply::line(if session.attack(&mob) {
                format!("ok: attacking {mob}")
            } else {
                format!("error: no live mob '{mob}'")
            }),
            DebugCommand::Deposit { item, qty } => ConsoleReply::line(ok_or_error(
                session.deposit(&item, qty),
                |()| format!("ok: deposited {qty} {item}"),
            )),
            DebugCommand::Withdraw { item, qty } => ConsoleReply::line(ok_or_error(
                session.withdraw(&item, qty),
                |()| format!("ok: withdrew {qty} {item}"),
            )),
            DebugCommand::Buy { item, qty } => ConsoleReply::line(ok_or_error(
                session.buy(&item, qty),
                |cost| format!("ok: bought {qty} {item} for {cost}"),
            )),
            DebugCommand::Sell { item, qty } => ConsoleReply::line(ok_or_error(
                session.sell(&item, qty),
                |proceeds| format!("ok: sold {qty} {item} for {proceeds}"),
            )),
            DebugCommand::Equip { item } => ConsoleReply::line(ok_or_error(
                session.equip(&item),
                |()| format!("ok: equipped {item}"),
            )),
            DebugCommand::Unequip { slot } => ConsoleReply::line(ok_or_error(
                session.unequip(&slot),
                |()| format!("ok: emptied {slot}"),
            )),
            DebugCommand::LightFire => ConsoleReply::line(if session.light_fire() {
                "ok: lighting"
            } else {
                "error: cannot light a fire"
            }),
            DebugCommand::Eat { item } => ConsoleReply::line(ok_or_error(
                session.eat(&item),
                |healed| format!("ok: healed {healed}"),
            )),
            DebugCommand::Smith { product } => {
                ConsoleReply::line(if session.set_smith_choice(&product) {
                    format!("ok: smithing {product}")
                } else {
                    format!("error: no recipe for '{product}'")
                })
            }
            DebugCommand::Zoom { zoom } => {
                ConsoleReply::line(format!("ok: zoom {}", session.set_zoom(zoom)))
            }
            DebugCommand::Status => ConsoleReply::line(status_line(session)),
            DebugCommand::Quit => ConsoleReply {
                lines: vec!["ok: quitting".to_string()],
                quit: true,
            },
        }
    }
}

pub fn status_line(session: &GameSession) -> String {
    let state = session.state();
    format!(
        "t={}ms zone={} pos={},{} hp={}/{} gold={}",
        session.now().as_ms(),
        state.zones.active_zone().key(),
        state.player.pos.x,
        state.player.pos.y,
        state.player.hp,
        state.skills.max_hitpoints(),
        state.wallet.gold()
    )
}
