mod compiler;
mod database;
mod discovery;

pub use compiler::{
    compile_def_database, compile_embedded_defs, ContentCompileError, ContentErrorCode,
    EmbeddedDefs, SourceLocation,
};
pub use database::{
    DefDatabase, DropEntry, EquipSlot, ItemDef, MobDef, ObjectiveDef, ObjectiveKind, QuestDef,
    RewardDef,
};
pub use discovery::{ContentDiscoveryError, ContentRequest};
