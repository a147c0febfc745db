use engine::{DefDatabase, MobDef};
use rand::Rng;

use crate::inventory::{Equipment, Quiver};
use crate::player::PlayerClass;
use crate::skills::{Skill, Skills};

pub const MIN_HIT_CHANCE: f32 = 0.10;
pub const MAX_HIT_CHANCE: f32 = 0.90;
pub const PLAYER_ATTACK_COOLDOWN_MS: u64 = 2_400;
const BASE_ACCURACY: i32 = 8;
const BASE_DEFENCE: i32 = 8;

/// `accuracy / (accuracy + defence)` clamped to `[0.10, 0.90]`. Both sides floor at 1.
pub fn hit_chance(accuracy: i32, defence: i32) -> f32 {
    let accuracy = accuracy.max(1) as f32;
    let defence = defence.max(1) as f32;
    (accuracy / (accuracy + defence)).clamp(MIN_HIT_CHANCE, MAX_HIT_CHANCE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackRoll {
    pub hit: bool,
    pub damage: u32,
}

/// Rolls one swing: hit check, then uniform damage in `[1, max_hit]` less `reduction`.
pub fn roll_attack<R: Rng>(
    rng: &mut R,
    accuracy: i32,
    defence: i32,
    max_hit: u32,
    reduction: u32,
) -> AttackRoll {
    let chance = hit_chance(accuracy, defence);
    if !rng.gen_bool(chance as f64) {
        return AttackRoll {
            hit: false,
            damage: 0,
        };
    }
    let raw = rng.gen_range(1..=max_hit.max(1));
    AttackRoll {
        hit: true,
        damage: raw.saturating_sub(reduction),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackStyle {
    Melee,
    Ranged,
    Magic,
}

impl AttackStyle {
    pub fn for_class(class: PlayerClass) -> Self {
        match class {
            PlayerClass::Warrior => Self::Melee,
            PlayerClass::Ranger => Self::Ranged,
            PlayerClass::Mage => Self::Magic,
        }
    }

    pub fn range(self) -> u32 {
        match self {
            Self::Melee => 1,
            Self::Ranged => 4,
            Self::Magic => 3,
        }
    }

    pub fn needs_ammo(self) -> bool {
        self == Self::Ranged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerCombatStats {
    pub style: AttackStyle,
    pub accuracy: i32,
    pub max_hit: u32,
    pub defence: i32,
    pub damage_reduction: u32,
}

pub fn player_combat_stats(
    db: &DefDatabase,
    class: PlayerClass,
    skills: &Skills,
    equipment: &Equipment,
    quiver: &Quiver,
) -> PlayerCombatStats {
    let style = AttackStyle::for_class(class);
    let accuracy_bonus = equipment.accuracy_bonus(db);
    let (level, power) = match style {
        AttackStyle::Melee => (
            skills.level(Skill::Attack),
            skills.level(Skill::Strength) as i32 + equipment.strength_bonus(db),
        ),
        AttackStyle::Ranged => {
            let ammo_bonus = quiver
                .stack
                .as_ref()
                .and_then(|stack| db.item(&stack.item))
                .map(|def| def.strength_bonus)
                .unwrap_or(0);
            (
                skills.level(Skill::Ranged),
                skills.level(Skill::Ranged) as i32 + ammo_bonus,
            )
        }
        AttackStyle::Magic => (skills.level(Skill::Magic), skills.level(Skill::Magic) as i32),
    };

    PlayerCombatStats {
        style,
        accuracy: level as i32 + accuracy_bonus + BASE_ACCURACY,
        max_hit: 1 + (power.max(0) as u32) / 6,
        defence: skills.level(Skill::Defence) as i32 + equipment.defence_bonus(db) + BASE_DEFENCE,
        damage_reduction: equipment.damage_reduction(db),
    }
}

pub fn mob_accuracy(def: &MobDef) -> i32 {
    def.attack as i32 + BASE_ACCURACY
}

pub fn mob_defence(def: &MobDef) -> i32 {
    def.defence as i32 + BASE_DEFENCE
}

/// Experience for dealing `damage` with `style`, hitpoints included.
pub fn combat_xp(style: AttackStyle, damage: u32) -> Vec<(Skill, u32)> {
    if damage == 0 {
        return Vec::new();
    }
    let mut grants = match style {
        AttackStyle::Melee => vec![(Skill::Attack, damage * 2), (Skill::Strength, damage * 2)],
        AttackStyle::Ranged => vec![(Skill::Ranged, damage * 4)],
        AttackStyle::Magic => vec![(Skill::Magic, damage * 4)],
    };
    grants.push((Skill::Hitpoints, damage * 4 / 3));
    grants
}

#[cfg(test)]
mod tests {
    use engine::XorShift32;

    use crate::content::builtin_def_database;

    use super::*;

    #[test]
    fn hit_chance_is_clamped() {
        assert_eq!(hit_chance(1, 1_000), MIN_HIT_CHANCE);
        assert_eq!(hit_chance(1_000, 1), MAX_HIT_CHANCE);
        assert!((hit_chance(10, 10) - 0.5).abs() < f32::EPSILON);
        assert_eq!(hit_chance(-5, -5), 0.5);
    }

    #[test]
    fn damage_stays_in_range_and_reduction_applies() {
        let mut rng = XorShift32::new(42);
        for _ in 0..500 {
            let roll = roll_attack(&mut rng, 1_000, 1, 5, 0);
            if roll.hit {
                assert!((1..=5).contains(&roll.damage));
            } else {
                assert_eq!(roll.damage, 0);
            }
            let reduced = roll_attack(&mut rng, 1_000, 1, 2, 5);
            assert_eq!(reduced.damage, 0);
        }
    }

    #[test]
    fn hit_rate_tracks_the_clamp() {
        let mut rng = XorShift32::new(7);
        let hits = (0..10_000)
            .filter(|_| roll_attack(&mut rng, 1, 1_000, 1, 0).hit)
            .count();
        assert!((800..1_200).contains(&hits), "hits = {hits}");
    }

    #[test]
    fn gear_feeds_player_stats() {
        let db = builtin_def_database().expect("defs");
        let skills = Skills::new();
        let mut equipment = Equipment::default();
        let quiver = Quiver::default();
        let bare = player_combat_stats(&db, PlayerClass::Warrior, &skills, &equipment, &quiver);
        assert_eq!(bare.style, AttackStyle::Melee);
        assert_eq!(bare.accuracy, 9);
        assert_eq!(bare.max_hit, 1);

        equipment.set(engine::EquipSlot::Weapon, "bronze_sword");
        equipment.set(engine::EquipSlot::Body, "bronze_platebody");
        let armed = player_combat_stats(&db, PlayerClass::Warrior, &skills, &equipment, &quiver);
        assert_eq!(armed.accuracy, 13);
        assert_eq!(armed.defence, 17);
        assert_eq!(armed.damage_reduction, 1);
    }

    #[test]
    fn melee_xp_splits_attack_and_strength() {
        let grants = combat_xp(AttackStyle::Melee, 3);
        assert_eq!(
            grants,
            vec![
                (Skill::Attack, 6),
                (Skill::Strength, 6),
                (Skill::Hitpoints, 4)
            ]
        );
        assert!(combat_xp(AttackStyle::Ranged, 0).is_empty());
    }
}
