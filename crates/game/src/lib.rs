//! Headless simulation core for a small tile RPG: zones, mobs, skills, quests and saves.

pub mod actions;
pub mod ai;
pub mod app;
pub mod combat;
pub mod content;
pub mod debug;
pub mod entities;
pub mod inventory;
pub mod maps;
pub mod persistence;
pub mod player;
pub mod quests;
pub mod seeding;
pub mod session;
pub mod skills;
pub mod zone_flow;
pub mod zones;

pub use debug::{DebugCommand, DebugConsole};
pub use persistence::{LoadError, LoadReport, SaveError};
pub use player::PlayerClass;
pub use quests::QuestEvent;
pub use session::{GameSession, InteractOutcome, SessionState, TeleportOptions};
pub use zones::ZoneKey;
