use std::sync::Arc;

use engine::{
    compile_def_database, resolve_app_paths, ContentRequest, DefDatabase, FileBlobStore,
    LoopConfig,
};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::dev_thruport::DevThruport;
use super::runtime::{GameRuntime, LineSource};
use crate::content::builtin_def_database;
use crate::debug::DebugConsole;
use crate::player::PlayerClass;
use crate::seeding::DEFAULT_WORLD_SEED;
use crate::session::{GameSession, SessionError};

const ENABLED_MODS_ENV_VAR: &str = "WARDEN_ENABLED_MODS";
const SEED_ENV_VAR: &str = "WARDEN_SEED";
const CLASS_ENV_VAR: &str = "WARDEN_CLASS";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Startup(#[from] engine::StartupError),
    #[error("content compile failed: {0}")]
    Content(#[from] engine::ContentCompileError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Console(#[from] engine::ConsoleRegistryError),
}

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) runtime: GameRuntime<DevThruport>,
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    init_tracing();
    info!("=== Wardenhold Startup ===");

    let paths = resolve_app_paths()?;
    info!(root = %paths.root.display(), save_dir = %paths.save_dir.display(), "app_paths_resolved");

    let db = Arc::new(load_content(&paths)?);
    let config = LoopConfig::default();
    let seed = parse_seed(std::env::var(SEED_ENV_VAR).ok().as_deref());
    let class = parse_class(std::env::var(CLASS_ENV_VAR).ok().as_deref());
    let session = GameSession::new(db, seed, class)?;

    let store = FileBlobStore::new(paths.save_dir.clone());
    let console = DebugConsole::new(Box::new(store), config.fixed_dt_ms())?;
    let thruport = DevThruport::from_env();
    let remote_enabled = thruport.is_enabled();
    let runtime = GameRuntime::new(
        session,
        console,
        LineSource::spawn_stdin(),
        thruport,
        remote_enabled,
    );

    Ok(AppWiring { config, runtime })
}

fn load_content(paths: &engine::AppPaths) -> Result<DefDatabase, BootstrapError> {
    if !paths.base_content_dir.is_dir() {
        warn!(
            dir = %paths.base_content_dir.display(),
            "base_content_missing_using_builtin"
        );
        return Ok(builtin_def_database()?);
    }
    let request = ContentRequest {
        enabled_mods: parse_enabled_mods(std::env::var(ENABLED_MODS_ENV_VAR).ok().as_deref()),
    };
    let db = compile_def_database(paths, &request)?;
    info!(
        items = db.items().count(),
        mobs = db.mobs().count(),
        quests = db.quests().count(),
        mods = request.enabled_mods.len(),
        "content_loaded"
    );
    Ok(db)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn parse_enabled_mods(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    })
    .unwrap_or_default()
}

fn parse_seed(raw: Option<&str>) -> u32 {
    let Some(value) = raw else {
        return DEFAULT_WORLD_SEED;
    };
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };
    match parsed {
        Ok(seed) => seed,
        Err(_) => {
            warn!(
                var = SEED_ENV_VAR,
                value = value,
                fallback = DEFAULT_WORLD_SEED,
                "seed_invalid"
            );
            DEFAULT_WORLD_SEED
        }
    }
}

fn parse_class(raw: Option<&str>) -> PlayerClass {
    let Some(value) = raw else {
        return PlayerClass::default();
    };
    PlayerClass::from_key(value.trim()).unwrap_or_else(|| {
        warn!(var = CLASS_ENV_VAR, value = value, "class_invalid");
        PlayerClass::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_mods_split_on_commas_and_skip_blanks() {
        assert_eq!(
            parse_enabled_mods(Some(" hardmode , ,extra_quests")),
            vec!["hardmode".to_string(), "extra_quests".to_string()]
        );
        assert!(parse_enabled_mods(None).is_empty());
    }

    #[test]
    fn seed_accepts_decimal_and_hex_and_falls_back() {
        assert_eq!(parse_seed(Some("42")), 42);
        assert_eq!(parse_seed(Some("0xff")), 255);
        assert_eq!(parse_seed(Some("soup")), DEFAULT_WORLD_SEED);
        assert_eq!(parse_seed(None), DEFAULT_WORLD_SEED);
    }

    #[test]
    fn class_falls_back_to_default() {
        assert_eq!(parse_class(Some("mage")), PlayerClass::Mage);
        assert_eq!(parse_class(Some("bard")), PlayerClass::Warrior);
        assert_eq!(parse_class(None), PlayerClass::Warrior);
    }
}
