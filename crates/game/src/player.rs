use std::collections::VecDeque;

use engine::{SimInstant, TilePos};
use serde::{Deserialize, Serialize};

use crate::actions::TimedAction;

/// Milliseconds per tile of player movement.
pub const PLAYER_STEP_MS: u64 = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerClass {
    #[default]
    Warrior,
    Ranger,
    Mage,
}

impl PlayerClass {
    pub const ALL: [PlayerClass; 3] = [PlayerClass::Warrior, PlayerClass::Ranger, PlayerClass::Mage];

    pub fn key(self) -> &'static str {
        match self {
            Self::Warrior => "warrior",
            Self::Ranger => "ranger",
            Self::Mage => "mage",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub pos: TilePos,
    pub class: PlayerClass,
    pub hp: u32,
    pub invulnerable_until: SimInstant,
    pub path: VecDeque<TilePos>,
    /// Tile to interact with once `path` runs out.
    pub pending_interaction: Option<TilePos>,
    pub next_step_at: SimInstant,
    pub attack_target: Option<String>,
    pub next_attack_at: SimInstant,
    pub action: Option<TimedAction>,
}

impl Player {
    pub fn new(pos: TilePos, class: PlayerClass, hp: u32) -> Self {
        Self {
            pos,
            class,
            hp,
            invulnerable_until: SimInstant::ZERO,
            path: VecDeque::new(),
            pending_interaction: None,
            next_step_at: SimInstant::ZERO,
            attack_target: None,
            next_attack_at: SimInstant::ZERO,
            action: None,
        }
    }

    pub fn is_invulnerable(&self, now: SimInstant) -> bool {
        !self.invulnerable_until.has_passed(now)
    }

    /// Drops movement, pending interaction, timed action and attack target.
    pub fn stop(&mut self) {
        self.path.clear();
        self.pending_interaction = None;
        self.action = None;
        self.attack_target = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invulnerability_ends_at_its_deadline() {
        let mut player = Player::new(TilePos::new(1, 1), PlayerClass::Warrior, 10);
        player.invulnerable_until = SimInstant(3_000);
        assert!(player.is_invulnerable(SimInstant(2_999)));
        assert!(!player.is_invulnerable(SimInstant(3_000)));
    }

    #[test]
    fn class_keys_round_trip() {
        for class in PlayerClass::ALL {
            assert_eq!(PlayerClass::from_key(class.key()), Some(class));
        }
    }
}
