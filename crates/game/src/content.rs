use engine::{compile_embedded_defs, ContentCompileError, DefDatabase, EmbeddedDefs};

pub const ITEM_LOGS: &str = "logs";
pub const ITEM_TINDERBOX: &str = "tinderbox";
pub const ITEM_KEY_FRAGMENT: &str = "warden_key_fragment";
pub const ITEM_BONES: &str = "bones";

pub const QUEST_FIRST_WATCH: &str = "first_watch";
pub const QUEST_SEALED_DEPTHS: &str = "sealed_depths";

pub const MOB_WARDEN_BOSS: &str = "warden_boss";

pub const OBJECTIVE_UNSEAL_GATE: &str = "unseal_gate";
pub const OBJECTIVE_LIGHT_BRAZIERS: &str = "light_braziers";

/// What the general store sells, at each item's def value.
pub const VENDOR_STOCK: [&str; 6] = [
    "tinderbox",
    "bronze_arrows",
    "shrimp",
    "raw_shrimp",
    "bronze_sword",
    "shortbow",
];

const BUILTIN_DEFS: [EmbeddedDefs<'static>; 3] = [
    EmbeddedDefs {
        name: "items.xml",
        text: include_str!("../../../assets/base/items.xml"),
    },
    EmbeddedDefs {
        name: "mobs.xml",
        text: include_str!("../../../assets/base/mobs.xml"),
    },
    EmbeddedDefs {
        name: "quests.xml",
        text: include_str!("../../../assets/base/quests.xml"),
    },
];

/// Base definitions compiled from the copies baked into the binary.
pub fn builtin_def_database() -> Result<DefDatabase, ContentCompileError> {
    compile_embedded_defs("base", &BUILTIN_DEFS)
}

#[cfg(test)]
mod tests {
    use engine::ObjectiveKind;

    use super::*;

    #[test]
    fn builtin_content_compiles_and_has_the_story_quests() {
        let db = builtin_def_database().expect("builtin defs");
        let first = db.quest(QUEST_FIRST_WATCH).expect("first_watch");
        assert_eq!(first.giver.as_deref(), Some("quartermaster"));
        assert!(first.requires.is_empty());

        let sealed = db.quest(QUEST_SEALED_DEPTHS).expect("sealed_depths");
        assert_eq!(sealed.requires, vec![QUEST_FIRST_WATCH.to_string()]);
        let braziers = sealed
            .objective(OBJECTIVE_LIGHT_BRAZIERS)
            .expect("brazier objective");
        assert_eq!(braziers.target, 2);
        assert_eq!(
            braziers.kind,
            ObjectiveKind::Manual {
                key: OBJECTIVE_LIGHT_BRAZIERS.to_string()
            }
        );
    }

    #[test]
    fn referenced_items_exist() {
        let db = builtin_def_database().expect("builtin defs");
        let named = [ITEM_LOGS, ITEM_TINDERBOX, ITEM_KEY_FRAGMENT, ITEM_BONES];
        for item in named.into_iter().chain(VENDOR_STOCK) {
            assert!(db.item(item).is_some(), "missing {item}");
        }
        assert!(db.mob(MOB_WARDEN_BOSS).is_some());
        assert!(db.is_stackable("bronze_arrows"));
        assert!(!db.is_stackable(ITEM_LOGS));
    }
}
