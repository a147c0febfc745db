use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::AppPaths;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentRequest {
    pub enabled_mods: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ContentDiscoveryError {
    #[error("enabled mod id cannot be empty")]
    EmptyEnabledMod,
    #[error("duplicate enabled mod id in request: {mod_id}")]
    DuplicateEnabledMod { mod_id: String },
    #[error("enabled mod does not exist on disk: {mod_id} at {expected_dir}")]
    EnabledModMissing {
        mod_id: String,
        expected_dir: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct ModSource {
    pub mod_id: String,
    pub mod_load_index: u32,
    pub source_dir: PathBuf,
}

/// Base content first, then enabled mods in request order. Later sources override earlier
/// ones on `defName` collisions.
pub(crate) fn discover_mod_sources(
    app_paths: &AppPaths,
    request: &ContentRequest,
) -> Result<Vec<ModSource>, ContentDiscoveryError> {
    let mut seen = HashSet::<String>::new();
    let mut sources = vec![ModSource {
        mod_id: "base".to_string(),
        mod_load_index: 0,
        source_dir: app_paths.base_content_dir.clone(),
    }];

    for (idx, mod_id) in request.enabled_mods.iter().enumerate() {
        let trimmed = mod_id.trim();
        if trimmed.is_empty() {
            return Err(ContentDiscoveryError::EmptyEnabledMod);
        }
        if !seen.insert(trimmed.to_string()) {
            return Err(ContentDiscoveryError::DuplicateEnabledMod {
                mod_id: trimmed.to_string(),
            });
        }
        let mod_dir = app_paths.mods_dir.join(trimmed);
        ensure_dir_exists(trimmed, &mod_dir)?;
        sources.push(ModSource {
            mod_id: trimmed.to_string(),
            mod_load_index: (idx + 1) as u32,
            source_dir: mod_dir,
        });
    }

    Ok(sources)
}

fn ensure_dir_exists(mod_id: &str, path: &Path) -> Result<(), ContentDiscoveryError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ContentDiscoveryError::EnabledModMissing {
            mod_id: mod_id.to_string(),
            expected_dir: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn app_paths(root: &Path) -> AppPaths {
        AppPaths {
            root: root.to_path_buf(),
            base_content_dir: root.join("assets").join("base"),
            mods_dir: root.join("mods"),
            save_dir: root.join("saves"),
        }
    }

    #[test]
    fn base_is_first_then_enabled_order() {
        let temp = TempDir::new().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("assets").join("base")).expect("create base");
        fs::create_dir_all(root.join("mods").join("b")).expect("create mod b");
        fs::create_dir_all(root.join("mods").join("a")).expect("create mod a");
        let request = ContentRequest {
            enabled_mods: vec!["b".to_string(), " a ".to_string()],
        };

        let sources = discover_mod_sources(&app_paths(root), &request).expect("discover");
        let ids = sources
            .iter()
            .map(|source| (source.mod_id.as_str(), source.mod_load_index))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![("base", 0), ("b", 1), ("a", 2)]);
    }

    #[test]
    fn missing_duplicate_and_blank_mods_are_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("mods").join("a")).expect("create mod a");
        let paths = app_paths(root);

        let missing = ContentRequest {
            enabled_mods: vec!["ghost".to_string()],
        };
        assert!(matches!(
            discover_mod_sources(&paths, &missing),
            Err(ContentDiscoveryError::EnabledModMissing { .. })
        ));

        let duplicate = ContentRequest {
            enabled_mods: vec!["a".to_string(), "a".to_string()],
        };
        assert!(matches!(
            discover_mod_sources(&paths, &duplicate),
            Err(ContentDiscoveryError::DuplicateEnabledMod { .. })
        ));

        let blank = ContentRequest {
            enabled_mods: vec!["  ".to_string()],
        };
        assert!(matches!(
            discover_mod_sources(&paths, &blank),
            Err(ContentDiscoveryError::EmptyEnabledMod)
        ));
    }
}
