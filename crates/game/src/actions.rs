use engine::{SimInstant, TilePos};

pub const GATHER_MS: u64 = 2_400;
pub const SMELT_MS: u64 = 1_800;
pub const COOK_MS: u64 = 1_800;
pub const SMITH_MS: u64 = 2_400;
pub const LIGHT_FIRE_MS: u64 = 1_800;
pub const FIRE_DURATION_MS: u64 = 60_000;
pub const FIREMAKING_XP: u32 = 40;
pub const COOKING_XP: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Gather { resource_id: String },
    Smelt,
    Cook { fire: TilePos },
    Smith { item: String },
    LightFire,
}

impl ActionKind {
    pub fn duration_ms(&self) -> u64 {
        match self {
            Self::Gather { .. } => GATHER_MS,
            Self::Smelt => SMELT_MS,
            Self::Cook { .. } => COOK_MS,
            Self::Smith { .. } => SMITH_MS,
            Self::LightFire => LIGHT_FIRE_MS,
        }
    }

    pub fn type_key(&self) -> &'static str {
        match self {
            Self::Gather { .. } => "gather",
            Self::Smelt => "smelt",
            Self::Cook { .. } => "cook",
            Self::Smith { .. } => "smith",
            Self::LightFire => "light_fire",
        }
    }
}

/// A player action finishing at a fixed instant on the session clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedAction {
    pub kind: ActionKind,
    pub started_at: SimInstant,
    pub deadline: SimInstant,
}

impl TimedAction {
    pub fn start(kind: ActionKind, now: SimInstant) -> Self {
        let deadline = now.after_ms(kind.duration_ms());
        Self {
            kind,
            started_at: now,
            deadline,
        }
    }

    pub fn is_due(&self, now: SimInstant) -> bool {
        self.deadline.has_passed(now)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SmeltRecipe {
    pub bar: &'static str,
    pub inputs: &'static [(&'static str, u32)],
    pub level: u32,
    pub xp: u32,
}

/// Tried in order; the furnace smelts the first recipe whose inputs are carried.
pub static SMELT_RECIPES: [SmeltRecipe; 2] = [
    SmeltRecipe {
        bar: "bronze_bar",
        inputs: &[("copper_ore", 1), ("tin_ore", 1)],
        level: 1,
        xp: 6,
    },
    SmeltRecipe {
        bar: "iron_bar",
        inputs: &[("iron_ore", 1)],
        level: 15,
        xp: 12,
    },
];

#[derive(Debug, Clone, Copy)]
pub struct SmithRecipe {
    pub product: &'static str,
    pub bar: &'static str,
    pub bars: u32,
    pub output_qty: u32,
    pub level: u32,
    pub xp: u32,
}

pub static SMITH_RECIPES: [SmithRecipe; 7] = [
    SmithRecipe {
        product: "bronze_sword",
        bar: "bronze_bar",
        bars: 1,
        output_qty: 1,
        level: 1,
        xp: 12,
    },
    SmithRecipe {
        product: "bronze_helm",
        bar: "bronze_bar",
        bars: 1,
        output_qty: 1,
        level: 1,
        xp: 12,
    },
    SmithRecipe {
        product: "bronze_arrows",
        bar: "bronze_bar",
        bars: 1,
        output_qty: 15,
        level: 1,
        xp: 12,
    },
    SmithRecipe {
        product: "bronze_shield",
        bar: "bronze_bar",
        bars: 2,
        output_qty: 1,
        level: 3,
        xp: 25,
    },
    SmithRecipe {
        product: "bronze_platelegs",
        bar: "bronze_bar",
        bars: 3,
        output_qty: 1,
        level: 4,
        xp: 37,
    },
    SmithRecipe {
        product: "bronze_platebody",
        bar: "bronze_bar",
        bars: 5,
        output_qty: 1,
        level: 5,
        xp: 62,
    },
    SmithRecipe {
        product: "iron_sword",
        bar: "iron_bar",
        bars: 1,
        output_qty: 1,
        level: 15,
        xp: 25,
    },
];

pub fn smith_recipe(product: &str) -> Option<&'static SmithRecipe> {
    SMITH_RECIPES.iter().find(|recipe| recipe.product == product)
}

#[derive(Debug, Clone, Copy)]
pub struct CookRecipe {
    pub raw: &'static str,
    pub cooked: &'static str,
    pub burnt: &'static str,
    pub level: u32,
}

pub static COOK_RECIPES: [CookRecipe; 1] = [CookRecipe {
    raw: "raw_shrimp",
    cooked: "shrimp",
    burnt: "burnt_shrimp",
    level: 1,
}];

/// Chance to burn food; falls two points per cooking level and bottoms out at 5%.
pub fn burn_chance(cooking_level: u32) -> f32 {
    (0.5 - cooking_level as f32 * 0.02).max(0.05)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_derives_from_the_kind() {
        let action = TimedAction::start(ActionKind::Smelt, SimInstant(1_000));
        assert_eq!(action.deadline, SimInstant(1_000 + SMELT_MS));
        assert!(!action.is_due(SimInstant(2_799)));
        assert!(action.is_due(SimInstant(2_800)));
    }

    #[test]
    fn burn_chance_falls_with_level() {
        assert!((burn_chance(1) - 0.48).abs() < 1e-6);
        assert_eq!(burn_chance(99), 0.05);
    }

    #[test]
    fn smith_recipes_are_unique() {
        for recipe in &SMITH_RECIPES {
            assert!(std::ptr::eq(
                smith_recipe(recipe.product).expect("recipe"),
                recipe
            ));
        }
    }
}
