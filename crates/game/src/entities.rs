use std::collections::BTreeMap;

use engine::{MobDef, SimInstant, TilePos};
use serde::{Deserialize, Serialize};

use crate::skills::{combat_level, Skill};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Tree,
    OakTree,
    CopperRock,
    TinRock,
    IronVein,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Tree,
        ResourceKind::OakTree,
        ResourceKind::CopperRock,
        ResourceKind::TinRock,
        ResourceKind::IronVein,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::OakTree => "oak_tree",
            Self::CopperRock => "copper_rock",
            Self::TinRock => "tin_rock",
            Self::IronVein => "iron_vein",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }

    pub fn yield_item(self) -> &'static str {
        match self {
            Self::Tree => "logs",
            Self::OakTree => "oak_logs",
            Self::CopperRock => "copper_ore",
            Self::TinRock => "tin_ore",
            Self::IronVein => "iron_ore",
        }
    }

    pub fn skill(self) -> Skill {
        match self {
            Self::Tree | Self::OakTree => Skill::Woodcutting,
            Self::CopperRock | Self::TinRock | Self::IronVein => Skill::Mining,
        }
    }

    pub fn level_required(self) -> u32 {
        match self {
            Self::OakTree | Self::IronVein => 15,
            _ => 1,
        }
    }

    pub fn xp(self) -> u32 {
        match self {
            Self::Tree => 25,
            Self::OakTree => 37,
            Self::CopperRock | Self::TinRock => 17,
            Self::IronVein => 35,
        }
    }

    pub fn respawn_ms(self) -> u64 {
        match self {
            Self::Tree => 8_000,
            Self::OakTree => 15_000,
            Self::CopperRock | Self::TinRock => 5_000,
            Self::IronVein => 12_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    pub id: String,
    pub kind: ResourceKind,
    pub pos: TilePos,
    pub alive: bool,
    pub respawn_at: SimInstant,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, kind: ResourceKind, pos: TilePos) -> Self {
        Self {
            id: id.into(),
            kind,
            pos,
            alive: true,
            respawn_at: SimInstant::ZERO,
        }
    }

    pub fn deplete(&mut self, now: SimInstant) {
        self.alive = false;
        self.respawn_at = now.after_ms(self.kind.respawn_ms());
    }
}

/// Transient per-mob behavior state. Cleared on respawn and on disengage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MobAi {
    pub target_player: bool,
    pub provoked_until: SimInstant,
    pub aggro_until: SimInstant,
    pub next_move_at: SimInstant,
    pub next_attack_at: SimInstant,
    pub next_roam_at: SimInstant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mob {
    pub id: String,
    pub def_name: String,
    pub pos: TilePos,
    pub home: TilePos,
    pub hp: u32,
    pub max_hp: u32,
    /// Derived from the def's combat stats when spawned.
    pub combat_level: u32,
    pub alive: bool,
    pub respawn_at: SimInstant,
    pub ai: MobAi,
}

impl Mob {
    pub fn spawn(id: impl Into<String>, def: &MobDef, home: TilePos) -> Self {
        Self {
            id: id.into(),
            def_name: def.def_name.clone(),
            pos: home,
            home,
            hp: def.hitpoints,
            max_hp: def.hitpoints,
            combat_level: mob_combat_level(def),
            alive: true,
            respawn_at: SimInstant::ZERO,
            ai: MobAi::default(),
        }
    }

    pub fn kill(&mut self, now: SimInstant, respawn_ms: u64) {
        self.alive = false;
        self.hp = 0;
        self.respawn_at = now.after_ms(respawn_ms);
        self.ai = MobAi::default();
    }

    pub fn revive(&mut self) {
        self.alive = true;
        self.hp = self.max_hp;
        self.pos = self.home;
        self.ai = MobAi::default();
    }
}

pub fn mob_combat_level(def: &MobDef) -> u32 {
    combat_level(def.attack, def.strength, def.defence, def.hitpoints, 1, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderDirection {
    Up,
    Down,
}

impl LadderDirection {
    pub fn key(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractableKind {
    Bank,
    Vendor,
    Furnace,
    Anvil,
    Ladder(LadderDirection),
    SealedGate,
    /// `token` is the idempotency token raised when this brazier is lit.
    Brazier { token: String },
    QuestNpc { npc: String },
    Decor { label: String },
}

impl InteractableKind {
    pub fn type_key(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Vendor => "vendor",
            Self::Furnace => "furnace",
            Self::Anvil => "anvil",
            Self::Ladder(_) => "ladder",
            Self::SealedGate => "sealed_gate",
            Self::Brazier { .. } => "brazier",
            Self::QuestNpc { .. } => "quest_npc",
            Self::Decor { .. } => "decor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interactable {
    pub id: String,
    pub kind: InteractableKind,
    pub pos: TilePos,
    pub open: bool,
    pub lit: bool,
}

impl Interactable {
    pub fn new(id: impl Into<String>, kind: InteractableKind, pos: TilePos) -> Self {
        Self {
            id: id.into(),
            kind,
            pos,
            open: false,
            lit: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fire {
    pub pos: TilePos,
    pub expires_at: SimInstant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundLootPile {
    pub pos: TilePos,
    pub items: BTreeMap<String, u32>,
    pub created_at: SimInstant,
    pub expires_at: SimInstant,
}

impl GroundLootPile {
    pub fn is_expired(&self, now: SimInstant) -> bool {
        self.expires_at.has_passed(now)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BossState {
    #[default]
    Dormant,
    Spawned,
    Defeated,
}
