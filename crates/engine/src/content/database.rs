use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EquipSlot {
    Weapon,
    Shield,
    Head,
    Body,
    Legs,
}

impl EquipSlot {
    pub const ALL: [EquipSlot; 5] = [
        EquipSlot::Weapon,
        EquipSlot::Shield,
        EquipSlot::Head,
        EquipSlot::Body,
        EquipSlot::Legs,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Weapon => "weapon",
            Self::Shield => "shield",
            Self::Head => "head",
            Self::Body => "body",
            Self::Legs => "legs",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemDef {
    pub def_name: String,
    pub label: String,
    pub stackable: bool,
    /// Base price in gold; vendors sell at this price and buy back at a fraction of it.
    pub value: u32,
    pub equip_slot: Option<EquipSlot>,
    pub ammo: bool,
    pub accuracy_bonus: i32,
    pub strength_bonus: i32,
    pub defence_bonus: i32,
    pub damage_reduction: u32,
    pub heals: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropEntry {
    pub item: String,
    pub min: u32,
    pub max: u32,
    pub chance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MobDef {
    pub def_name: String,
    pub label: String,
    pub attack: u32,
    pub strength: u32,
    pub defence: u32,
    pub hitpoints: u32,
    pub max_hit: u32,
    pub aggressive: bool,
    pub aggro_range: u32,
    pub leash: u32,
    pub attack_range: u32,
    pub attack_cooldown_ms: u64,
    pub move_cooldown_ms: u64,
    pub respawn_ms: u64,
    pub xp: u32,
    pub drops: Vec<DropEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectiveKind {
    GatherItem { item: String },
    CookAny,
    SmeltItem { item: String },
    KillMob { mob: String },
    TalkNpc { npc: String },
    Manual { key: String },
}

impl ObjectiveKind {
    pub fn type_key(&self) -> &'static str {
        match self {
            Self::GatherItem { .. } => "gather_item",
            Self::CookAny => "cook_any",
            Self::SmeltItem { .. } => "smelt_item",
            Self::KillMob { .. } => "kill_mob",
            Self::TalkNpc { .. } => "talk_npc",
            Self::Manual { .. } => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveDef {
    pub id: String,
    pub label: String,
    pub kind: ObjectiveKind,
    pub target: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardDef {
    Item { item: String, qty: u32 },
    Gold { amount: u32 },
    Xp { skill: String, amount: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestDef {
    pub def_name: String,
    pub label: String,
    pub giver: Option<String>,
    pub requires: Vec<String>,
    pub objectives: Vec<ObjectiveDef>,
    pub rewards: Vec<RewardDef>,
}

impl QuestDef {
    pub fn objective(&self, objective_id: &str) -> Option<&ObjectiveDef> {
        self.objectives
            .iter()
            .find(|objective| objective.id == objective_id)
    }
}

/// Compiled definitions keyed by `defName`. Iteration order is sorted by name.
#[derive(Debug, Default, Clone)]
pub struct DefDatabase {
    items: BTreeMap<String, ItemDef>,
    mobs: BTreeMap<String, MobDef>,
    quests: BTreeMap<String, QuestDef>,
}

impl DefDatabase {
    pub(crate) fn from_parts(
        items: BTreeMap<String, ItemDef>,
        mobs: BTreeMap<String, MobDef>,
        quests: BTreeMap<String, QuestDef>,
    ) -> Self {
        Self {
            items,
            mobs,
            quests,
        }
    }

    pub fn item(&self, def_name: &str) -> Option<&ItemDef> {
        self.items.get(def_name)
    }

    pub fn mob(&self, def_name: &str) -> Option<&MobDef> {
        self.mobs.get(def_name)
    }

    pub fn quest(&self, def_name: &str) -> Option<&QuestDef> {
        self.quests.get(def_name)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemDef> {
        self.items.values()
    }

    pub fn mobs(&self) -> impl Iterator<Item = &MobDef> {
        self.mobs.values()
    }

    pub fn quests(&self) -> impl Iterator<Item = &QuestDef> {
        self.quests.values()
    }

    pub fn is_stackable(&self, item: &str) -> bool {
        self.item(item).is_some_and(|def| def.stackable)
    }
}
