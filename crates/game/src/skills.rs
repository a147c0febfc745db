use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const MAX_LEVEL: u32 = 99;
pub const MAX_XP: u32 = 200_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Attack,
    Strength,
    Defence,
    Hitpoints,
    Ranged,
    Magic,
    Woodcutting,
    Mining,
    Smithing,
    Cooking,
    Firemaking,
}

impl Skill {
    pub const ALL: [Skill; 11] = [
        Skill::Attack,
        Skill::Strength,
        Skill::Defence,
        Skill::Hitpoints,
        Skill::Ranged,
        Skill::Magic,
        Skill::Woodcutting,
        Skill::Mining,
        Skill::Smithing,
        Skill::Cooking,
        Skill::Firemaking,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Attack => "attack",
            Self::Strength => "strength",
            Self::Defence => "defence",
            Self::Hitpoints => "hitpoints",
            Self::Ranged => "ranged",
            Self::Magic => "magic",
            Self::Woodcutting => "woodcutting",
            Self::Mining => "mining",
            Self::Smithing => "smithing",
            Self::Cooking => "cooking",
            Self::Firemaking => "firemaking",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|skill| skill.key() == key)
    }
}

/// Total xp needed to reach `level` on the classic curve.
pub fn xp_for_level(level: u32) -> u32 {
    let level = level.clamp(1, MAX_LEVEL);
    let mut points = 0.0f64;
    for lvl in 1..level {
        let lvl = lvl as f64;
        points += (lvl + 300.0 * 2f64.powf(lvl / 7.0)).floor();
    }
    (points / 4.0).floor() as u32
}

pub fn level_for_xp(xp: u32) -> u32 {
    let mut level = 1;
    while level < MAX_LEVEL && xp >= xp_for_level(level + 1) {
        level += 1;
    }
    level
}

/// Classic combat level from the four melee sub-skills plus ranged and magic.
pub fn combat_level(
    attack: u32,
    strength: u32,
    defence: u32,
    hitpoints: u32,
    ranged: u32,
    magic: u32,
) -> u32 {
    let base = 0.25 * (defence + hitpoints) as f64;
    let melee = 0.325 * (attack + strength) as f64;
    let range = 0.325 * (ranged as f64 * 1.5).floor();
    let mage = 0.325 * (magic as f64 * 1.5).floor();
    (base + melee.max(range).max(mage)).floor() as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skills {
    xp: BTreeMap<Skill, u32>,
}

impl Default for Skills {
    fn default() -> Self {
        Self::new()
    }
}

impl Skills {
    /// Every skill at level 1 except hitpoints, which starts at 10.
    pub fn new() -> Self {
        let mut xp = BTreeMap::new();
        for skill in Skill::ALL {
            xp.insert(skill, 0);
        }
        xp.insert(Skill::Hitpoints, xp_for_level(10));
        Self { xp }
    }

    pub fn xp(&self, skill: Skill) -> u32 {
        self.xp.get(&skill).copied().unwrap_or(0)
    }

    pub fn level(&self, skill: Skill) -> u32 {
        level_for_xp(self.xp(skill))
    }

    /// Returns the new level when the grant crossed a level boundary.
    pub fn add_xp(&mut self, skill: Skill, amount: u32) -> Option<u32> {
        let before = self.level(skill);
        let entry = self.xp.entry(skill).or_insert(0);
        *entry = entry.saturating_add(amount).min(MAX_XP);
        let after = level_for_xp(*entry);
        (after > before).then_some(after)
    }

    pub fn set_xp(&mut self, skill: Skill, xp: u32) {
        self.xp.insert(skill, xp.min(MAX_XP));
    }

    pub fn iter(&self) -> impl Iterator<Item = (Skill, u32)> + '_ {
        self.xp.iter().map(|(skill, xp)| (*skill, *xp))
    }

    pub fn combat_level(&self) -> u32 {
        combat_level(
            self.level(Skill::Attack),
            self.level(Skill::Strength),
            self.level(Skill::Defence),
            self.level(Skill::Hitpoints),
            self.level(Skill::Ranged),
            self.level(Skill::Magic),
        )
    }

    pub fn max_hitpoints(&self) -> u32 {
        self.level(Skill::Hitpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_matches_known_thresholds() {
        assert_eq!(xp_for_level(1), 0);
        assert_eq!(xp_for_level(2), 83);
        assert_eq!(xp_for_level(10), 1154);
        assert_eq!(xp_for_level(99), 13_034_431);
    }

    #[test]
    fn level_lookup_is_inverse_of_curve() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(82), 1);
        assert_eq!(level_for_xp(83), 2);
        assert_eq!(level_for_xp(MAX_XP), MAX_LEVEL);
    }

    #[test]
    fn fresh_skills_start_at_ten_hitpoints() {
        let skills = Skills::new();
        assert_eq!(skills.level(Skill::Hitpoints), 10);
        assert_eq!(skills.max_hitpoints(), 10);
        assert_eq!(skills.level(Skill::Attack), 1);
        assert_eq!(skills.combat_level(), 3);
    }

    #[test]
    fn add_xp_reports_level_ups_and_caps() {
        let mut skills = Skills::new();
        assert_eq!(skills.add_xp(Skill::Mining, 50), None);
        assert_eq!(skills.add_xp(Skill::Mining, 40), Some(2));
        skills.add_xp(Skill::Mining, u32::MAX);
        assert_eq!(skills.xp(Skill::Mining), MAX_XP);
    }

    #[test]
    fn skill_keys_round_trip() {
        for skill in Skill::ALL {
            assert_eq!(Skill::from_key(skill.key()), Some(skill));
        }
        assert_eq!(Skill::from_key("prayer"), None);
    }
}
