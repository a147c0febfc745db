use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use roxmltree::{Document, Node};
use tracing::debug;

use crate::AppPaths;

use super::database::{
    DefDatabase, DropEntry, EquipSlot, ItemDef, MobDef, ObjectiveDef, ObjectiveKind, QuestDef,
    RewardDef,
};
use super::discovery::{discover_mod_sources, ContentDiscoveryError, ContentRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorCode {
    Discovery,
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownDefType,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
    DuplicateDefInMod,
    UnresolvedReference,
    DependencyCycle,
}

#[derive(Debug, Clone)]
pub struct ContentCompileError {
    pub code: ContentErrorCode,
    pub message: String,
    pub mod_id: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ContentCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (mod={}, file={}, line={}, column={})",
                self.code,
                self.message,
                self.mod_id,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (mod={}, file={})",
                self.code,
                self.message,
                self.mod_id,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for ContentCompileError {}

/// An XML definitions file compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedDefs<'a> {
    pub name: &'a str,
    pub text: &'a str,
}

/// Compiles base content plus every enabled mod from disk. Cross-mod `defName` collisions are
/// override points (last mod wins); collisions inside one mod are errors.
pub fn compile_def_database(
    app_paths: &AppPaths,
    request: &ContentRequest,
) -> Result<DefDatabase, ContentCompileError> {
    let sources = discover_mod_sources(app_paths, request)
        .map_err(|error| map_discovery_error(error, &app_paths.root))?;

    let mut merged = DefMerger::default();
    for source in sources {
        let xml_files = collect_xml_files_sorted(&source.source_dir)
            .map_err(|error| read_error(&source.mod_id, error.path, error.source))?;
        let mut seen_in_mod = HashSet::<(DefKind, String)>::new();
        debug!(
            mod_id = %source.mod_id,
            mod_load_index = source.mod_load_index,
            xml_files = xml_files.len(),
            "content_source_discovered"
        );

        for xml_file in xml_files {
            let raw = fs::read_to_string(&xml_file)
                .map_err(|source_err| read_error(&source.mod_id, xml_file.clone(), source_err))?;
            let ctx = ParseCtx::new(&source.mod_id, &xml_file);
            let defs = parse_defs_document(&ctx, &raw)?;
            merged.absorb(&ctx, defs, &mut seen_in_mod)?;
        }
    }

    merged.finish()
}

/// Compiles definitions that ship inside the binary as one mod.
pub fn compile_embedded_defs(
    mod_id: &str,
    files: &[EmbeddedDefs<'_>],
) -> Result<DefDatabase, ContentCompileError> {
    let mut merged = DefMerger::default();
    let mut seen_in_mod = HashSet::<(DefKind, String)>::new();
    for file in files {
        let path = PathBuf::from(format!("<embedded>/{}", file.name));
        let ctx = ParseCtx::new(mod_id, &path);
        let defs = parse_defs_document(&ctx, file.text)?;
        merged.absorb(&ctx, defs, &mut seen_in_mod)?;
    }
    merged.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DefKind {
    Item,
    Mob,
    Quest,
}

impl DefKind {
    fn element_name(self) -> &'static str {
        match self {
            Self::Item => "ItemDef",
            Self::Mob => "MobDef",
            Self::Quest => "QuestDef",
        }
    }
}

#[derive(Debug, Clone)]
enum PendingDef {
    Item(ItemDef),
    Mob(MobDef),
    Quest(QuestDef),
}

impl PendingDef {
    fn key(&self) -> (DefKind, String) {
        match self {
            Self::Item(def) => (DefKind::Item, def.def_name.clone()),
            Self::Mob(def) => (DefKind::Mob, def.def_name.clone()),
            Self::Quest(def) => (DefKind::Quest, def.def_name.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct DefOrigin {
    mod_id: String,
    file_path: PathBuf,
    location: Option<SourceLocation>,
}

#[derive(Debug, Default)]
struct DefMerger {
    items: BTreeMap<String, ItemDef>,
    mobs: BTreeMap<String, MobDef>,
    quests: BTreeMap<String, QuestDef>,
    origins: HashMap<(DefKind, String), DefOrigin>,
}

impl DefMerger {
    fn absorb(
        &mut self,
        ctx: &ParseCtx<'_>,
        defs: Vec<(PendingDef, Option<SourceLocation>)>,
        seen_in_mod: &mut HashSet<(DefKind, String)>,
    ) -> Result<(), ContentCompileError> {
        for (def, location) in defs {
            let key = def.key();
            if !seen_in_mod.insert(key.clone()) {
                return Err(ContentCompileError {
                    code: ContentErrorCode::DuplicateDefInMod,
                    message: format!(
                        "duplicate {} '{}' in mod '{}'; each mod may define a defName only once",
                        key.0.element_name(),
                        key.1,
                        ctx.mod_id
                    ),
                    mod_id: ctx.mod_id.to_string(),
                    file_path: ctx.file_path.to_path_buf(),
                    location,
                });
            }
            self.origins.insert(
                key,
                DefOrigin {
                    mod_id: ctx.mod_id.to_string(),
                    file_path: ctx.file_path.to_path_buf(),
                    location,
                },
            );
            match def {
                PendingDef::Item(item) => {
                    self.items.insert(item.def_name.clone(), item);
                }
                PendingDef::Mob(mob) => {
                    self.mobs.insert(mob.def_name.clone(), mob);
                }
                PendingDef::Quest(quest) => {
                    self.quests.insert(quest.def_name.clone(), quest);
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<DefDatabase, ContentCompileError> {
        self.validate_references()?;
        self.validate_quest_graph()?;
        debug!(
            items = self.items.len(),
            mobs = self.mobs.len(),
            quests = self.quests.len(),
            "content_compiled"
        );
        Ok(DefDatabase::from_parts(self.items, self.mobs, self.quests))
    }

    fn unresolved(&self, owner: (DefKind, &str), message: String) -> ContentCompileError {
        self.error_for(owner, ContentErrorCode::UnresolvedReference, message)
    }

    fn error_for(
        &self,
        owner: (DefKind, &str),
        code: ContentErrorCode,
        message: String,
    ) -> ContentCompileError {
        let origin = self.origins.get(&(owner.0, owner.1.to_string()));
        ContentCompileError {
            code,
            message,
            mod_id: origin
                .map(|origin| origin.mod_id.clone())
                .unwrap_or_else(|| "<merged>".to_string()),
            file_path: origin
                .map(|origin| origin.file_path.clone())
                .unwrap_or_default(),
            location: origin.and_then(|origin| origin.location),
        }
    }

    fn validate_references(&self) -> Result<(), ContentCompileError> {
        for mob in self.mobs.values() {
            for drop in &mob.drops {
                if !self.items.contains_key(&drop.item) {
                    return Err(self.unresolved(
                        (DefKind::Mob, &mob.def_name),
                        format!(
                            "MobDef '{}' drops unknown item '{}'",
                            mob.def_name, drop.item
                        ),
                    ));
                }
            }
        }

        for quest in self.quests.values() {
            let owner = (DefKind::Quest, quest.def_name.as_str());
            for required in &quest.requires {
                if !self.quests.contains_key(required) {
                    return Err(self.unresolved(
                        owner,
                        format!(
                            "QuestDef '{}' requires unknown quest '{}'",
                            quest.def_name, required
                        ),
                    ));
                }
            }
            for objective in &quest.objectives {
                let missing = match &objective.kind {
                    ObjectiveKind::GatherItem { item } | ObjectiveKind::SmeltItem { item } => {
                        (!self.items.contains_key(item)).then(|| format!("item '{item}'"))
                    }
                    ObjectiveKind::KillMob { mob } => {
                        (!self.mobs.contains_key(mob)).then(|| format!("mob '{mob}'"))
                    }
                    _ => None,
                };
                if let Some(missing) = missing {
                    return Err(self.unresolved(
                        owner,
                        format!(
                            "objective '{}' of QuestDef '{}' references unknown {}",
                            objective.id, quest.def_name, missing
                        ),
                    ));
                }
            }
            for reward in &quest.rewards {
                if let RewardDef::Item { item, .. } = reward {
                    if !self.items.contains_key(item) {
                        return Err(self.unresolved(
                            owner,
                            format!(
                                "QuestDef '{}' rewards unknown item '{}'",
                                quest.def_name, item
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_quest_graph(&self) -> Result<(), ContentCompileError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            merger: &'a DefMerger,
            quest_id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            trail: &mut Vec<&'a str>,
        ) -> Result<(), ContentCompileError> {
            match marks.get(quest_id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    trail.push(quest_id);
                    return Err(merger.error_for(
                        (DefKind::Quest, quest_id),
                        ContentErrorCode::DependencyCycle,
                        format!("quest requirements form a cycle: {}", trail.join(" -> ")),
                    ));
                }
                None => {}
            }
            marks.insert(quest_id, Mark::Visiting);
            trail.push(quest_id);
            if let Some(quest) = merger.quests.get(quest_id) {
                for required in &quest.requires {
                    visit(merger, required, marks, trail)?;
                }
            }
            trail.pop();
            marks.insert(quest_id, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for quest_id in self.quests.keys() {
            let mut trail = Vec::new();
            visit(self, quest_id, &mut marks, &mut trail)?;
        }
        Ok(())
    }
}

struct ParseCtx<'a> {
    mod_id: &'a str,
    file_path: &'a Path,
}

impl<'a> ParseCtx<'a> {
    fn new(mod_id: &'a str, file_path: &'a Path) -> Self {
        Self { mod_id, file_path }
    }

    fn error_at(
        &self,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        code: ContentErrorCode,
        message: String,
    ) -> ContentCompileError {
        ContentCompileError {
            code,
            message,
            mod_id: self.mod_id.to_string(),
            file_path: self.file_path.to_path_buf(),
            location: Some(location_of(doc, node)),
        }
    }

    fn required_text(
        &self,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<String, ContentCompileError> {
        let value = node.text().map(str::trim).unwrap_or_default().to_string();
        if value.is_empty() {
            return Err(self.error_at(
                doc,
                node,
                ContentErrorCode::MissingField,
                format!("field <{field_name}> must not be empty"),
            ));
        }
        Ok(value)
    }

    fn number<T: FromStr>(
        &self,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<T, ContentCompileError> {
        let value = self.required_text(doc, node, field_name)?;
        value.parse::<T>().map_err(|_| {
            self.error_at(
                doc,
                node,
                ContentErrorCode::InvalidValue,
                format!("{field_name} '{value}' is not a valid number"),
            )
        })
    }

    fn flag(
        &self,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<bool, ContentCompileError> {
        let value = self.required_text(doc, node, field_name)?;
        match value.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(self.error_at(
                doc,
                node,
                ContentErrorCode::InvalidValue,
                format!("{field_name} '{value}' must be true or false"),
            )),
        }
    }

    fn missing(
        &self,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        field_name: &str,
        owner: &str,
    ) -> ContentCompileError {
        self.error_at(
            doc,
            node,
            ContentErrorCode::MissingField,
            format!("missing required field <{field_name}> in <{owner}>"),
        )
    }

    fn unknown_field(
        &self,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        owner: &str,
    ) -> ContentCompileError {
        self.error_at(
            doc,
            node,
            ContentErrorCode::UnknownField,
            format!("unknown field <{}> in <{owner}>", node.tag_name().name()),
        )
    }
}

fn element_children<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

/// Element children with a duplicate-name check, in document order.
fn unique_fields<'a, 'input>(
    ctx: &ParseCtx<'_>,
    doc: &Document<'_>,
    node: Node<'a, 'input>,
    owner: &str,
) -> Result<Vec<Node<'a, 'input>>, ContentCompileError> {
    let mut seen = HashSet::<&str>::new();
    let mut fields = Vec::new();
    for field in element_children(node) {
        if !seen.insert(field.tag_name().name()) {
            return Err(ctx.error_at(
                doc,
                field,
                ContentErrorCode::DuplicateField,
                format!("duplicate field <{}> in <{owner}>", field.tag_name().name()),
            ));
        }
        fields.push(field);
    }
    Ok(fields)
}

/// Children of a list field; every child must be `<li>`.
fn list_items<'a, 'input>(
    ctx: &ParseCtx<'_>,
    doc: &Document<'_>,
    node: Node<'a, 'input>,
) -> Result<Vec<Node<'a, 'input>>, ContentCompileError> {
    let mut items = Vec::new();
    for child in element_children(node) {
        if child.tag_name().name() != "li" {
            return Err(ctx.error_at(
                doc,
                child,
                ContentErrorCode::UnknownField,
                format!(
                    "list <{}> may only contain <li>, found <{}>",
                    node.tag_name().name(),
                    child.tag_name().name()
                ),
            ));
        }
        items.push(child);
    }
    Ok(items)
}

fn parse_defs_document(
    ctx: &ParseCtx<'_>,
    raw: &str,
) -> Result<Vec<(PendingDef, Option<SourceLocation>)>, ContentCompileError> {
    let doc = Document::parse(raw).map_err(|error| ContentCompileError {
        code: ContentErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        mod_id: ctx.mod_id.to_string(),
        file_path: ctx.file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "Defs" {
        return Err(ctx.error_at(
            &doc,
            root,
            ContentErrorCode::InvalidRoot,
            "root element must be <Defs>".to_string(),
        ));
    }

    let mut defs = Vec::new();
    for child in element_children(root) {
        let location = Some(location_of(&doc, child));
        let def = match child.tag_name().name() {
            "ItemDef" => PendingDef::Item(parse_item_def(ctx, &doc, child)?),
            "MobDef" => PendingDef::Mob(parse_mob_def(ctx, &doc, child)?),
            "QuestDef" => PendingDef::Quest(parse_quest_def(ctx, &doc, child)?),
            other => {
                return Err(ctx.error_at(
                    &doc,
                    child,
                    ContentErrorCode::UnknownDefType,
                    format!(
                        "unsupported def type <{other}>; expected <ItemDef>, <MobDef> or <QuestDef>"
                    ),
                ))
            }
        };
        defs.push((def, location));
    }
    Ok(defs)
}

fn parse_item_def(
    ctx: &ParseCtx<'_>,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<ItemDef, ContentCompileError> {
    const OWNER: &str = "ItemDef";
    let mut def_name = None;
    let mut label = None;
    let mut item = ItemDef {
        def_name: String::new(),
        label: String::new(),
        stackable: false,
        value: 0,
        equip_slot: None,
        ammo: false,
        accuracy_bonus: 0,
        strength_bonus: 0,
        defence_bonus: 0,
        damage_reduction: 0,
        heals: 0,
    };

    for field in unique_fields(ctx, doc, node, OWNER)? {
        match field.tag_name().name() {
            "defName" => def_name = Some(ctx.required_text(doc, field, "defName")?),
            "label" => label = Some(ctx.required_text(doc, field, "label")?),
            "stackable" => item.stackable = ctx.flag(doc, field, "stackable")?,
            "value" => item.value = ctx.number(doc, field, "value")?,
            "equipSlot" => {
                let value = ctx.required_text(doc, field, "equipSlot")?;
                let slot = EquipSlot::from_key(&value).ok_or_else(|| {
                    ctx.error_at(
                        doc,
                        field,
                        ContentErrorCode::InvalidValue,
                        format!(
                            "invalid equipSlot '{value}'; allowed values: weapon, shield, head, body, legs"
                        ),
                    )
                })?;
                item.equip_slot = Some(slot);
            }
            "ammo" => item.ammo = ctx.flag(doc, field, "ammo")?,
            "accuracyBonus" => item.accuracy_bonus = ctx.number(doc, field, "accuracyBonus")?,
            "strengthBonus" => item.strength_bonus = ctx.number(doc, field, "strengthBonus")?,
            "defenceBonus" => item.defence_bonus = ctx.number(doc, field, "defenceBonus")?,
            "damageReduction" => {
                item.damage_reduction = ctx.number(doc, field, "damageReduction")?
            }
            "heals" => item.heals = ctx.number(doc, field, "heals")?,
            _ => return Err(ctx.unknown_field(doc, field, OWNER)),
        }
    }

    item.def_name = def_name.ok_or_else(|| ctx.missing(doc, node, "defName", OWNER))?;
    item.label = label.ok_or_else(|| ctx.missing(doc, node, "label", OWNER))?;
    if item.ammo && item.equip_slot.is_some() {
        return Err(ctx.error_at(
            doc,
            node,
            ContentErrorCode::InvalidValue,
            format!(
                "ItemDef '{}' cannot be both ammo and equippable",
                item.def_name
            ),
        ));
    }
    Ok(item)
}

fn parse_mob_def(
    ctx: &ParseCtx<'_>,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<MobDef, ContentCompileError> {
    const OWNER: &str = "MobDef";
    let mut def_name = None;
    let mut label = None;
    let mut xp = None;
    let mut mob = MobDef {
        def_name: String::new(),
        label: String::new(),
        attack: 1,
        strength: 1,
        defence: 1,
        hitpoints: 1,
        max_hit: 1,
        aggressive: false,
        aggro_range: 4,
        leash: 8,
        attack_range: 1,
        attack_cooldown_ms: 2400,
        move_cooldown_ms: 600,
        respawn_ms: 20_000,
        xp: 0,
        drops: Vec::new(),
    };

    for field in unique_fields(ctx, doc, node, OWNER)? {
        match field.tag_name().name() {
            "defName" => def_name = Some(ctx.required_text(doc, field, "defName")?),
            "label" => label = Some(ctx.required_text(doc, field, "label")?),
            "attack" => mob.attack = ctx.number(doc, field, "attack")?,
            "strength" => mob.strength = ctx.number(doc, field, "strength")?,
            "defence" => mob.defence = ctx.number(doc, field, "defence")?,
            "hitpoints" => mob.hitpoints = ctx.number(doc, field, "hitpoints")?,
            "maxHit" => mob.max_hit = ctx.number(doc, field, "maxHit")?,
            "aggressive" => mob.aggressive = ctx.flag(doc, field, "aggressive")?,
            "aggroRange" => mob.aggro_range = ctx.number(doc, field, "aggroRange")?,
            "leash" => mob.leash = ctx.number(doc, field, "leash")?,
            "attackRange" => mob.attack_range = ctx.number(doc, field, "attackRange")?,
            "attackCooldownMs" => {
                mob.attack_cooldown_ms = ctx.number(doc, field, "attackCooldownMs")?
            }
            "moveCooldownMs" => mob.move_cooldown_ms = ctx.number(doc, field, "moveCooldownMs")?,
            "respawnMs" => mob.respawn_ms = ctx.number(doc, field, "respawnMs")?,
            "xp" => xp = Some(ctx.number(doc, field, "xp")?),
            "drops" => mob.drops = parse_drops(ctx, doc, field)?,
            _ => return Err(ctx.unknown_field(doc, field, OWNER)),
        }
    }

    mob.def_name = def_name.ok_or_else(|| ctx.missing(doc, node, "defName", OWNER))?;
    mob.label = label.ok_or_else(|| ctx.missing(doc, node, "label", OWNER))?;
    if mob.hitpoints == 0 || mob.max_hit == 0 || mob.attack_range == 0 {
        return Err(ctx.error_at(
            doc,
            node,
            ContentErrorCode::InvalidValue,
            format!(
                "MobDef '{}' needs hitpoints, maxHit and attackRange >= 1",
                mob.def_name
            ),
        ));
    }
    mob.xp = xp.unwrap_or(mob.hitpoints.saturating_mul(4));
    Ok(mob)
}

fn parse_drops(
    ctx: &ParseCtx<'_>,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<Vec<DropEntry>, ContentCompileError> {
    const OWNER: &str = "drops/li";
    let mut drops = Vec::new();
    for li in list_items(ctx, doc, node)? {
        let mut item = None;
        let mut min = 1u32;
        let mut max = None;
        let mut chance = 1.0f32;
        for field in unique_fields(ctx, doc, li, OWNER)? {
            match field.tag_name().name() {
                "item" => item = Some(ctx.required_text(doc, field, "item")?),
                "min" => min = ctx.number(doc, field, "min")?,
                "max" => max = Some(ctx.number(doc, field, "max")?),
                "chance" => chance = ctx.number(doc, field, "chance")?,
                _ => return Err(ctx.unknown_field(doc, field, OWNER)),
            }
        }
        let item = item.ok_or_else(|| ctx.missing(doc, li, "item", OWNER))?;
        let max = max.unwrap_or(min);
        if min == 0 || max < min || !chance.is_finite() || !(0.0..=1.0).contains(&chance) {
            return Err(ctx.error_at(
                doc,
                li,
                ContentErrorCode::InvalidValue,
                format!("drop '{item}' needs 1 <= min <= max and chance in [0, 1]"),
            ));
        }
        drops.push(DropEntry {
            item,
            min,
            max,
            chance,
        });
    }
    Ok(drops)
}

fn parse_quest_def(
    ctx: &ParseCtx<'_>,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<QuestDef, ContentCompileError> {
    const OWNER: &str = "QuestDef";
    let mut def_name = None;
    let mut label = None;
    let mut giver = None;
    let mut requires = Vec::new();
    let mut objectives = None;
    let mut rewards = Vec::new();

    for field in unique_fields(ctx, doc, node, OWNER)? {
        match field.tag_name().name() {
            "defName" => def_name = Some(ctx.required_text(doc, field, "defName")?),
            "label" => label = Some(ctx.required_text(doc, field, "label")?),
            "giver" => giver = Some(ctx.required_text(doc, field, "giver")?),
            "requires" => {
                for li in list_items(ctx, doc, field)? {
                    requires.push(ctx.required_text(doc, li, "requires/li")?);
                }
            }
            "objectives" => objectives = Some(parse_objectives(ctx, doc, field)?),
            "rewards" => rewards = parse_rewards(ctx, doc, field)?,
            _ => return Err(ctx.unknown_field(doc, field, OWNER)),
        }
    }

    let def_name = def_name.ok_or_else(|| ctx.missing(doc, node, "defName", OWNER))?;
    let label = label.ok_or_else(|| ctx.missing(doc, node, "label", OWNER))?;
    let objectives = objectives.ok_or_else(|| ctx.missing(doc, node, "objectives", OWNER))?;
    if objectives.is_empty() {
        return Err(ctx.error_at(
            doc,
            node,
            ContentErrorCode::InvalidValue,
            format!("QuestDef '{def_name}' must declare at least one objective"),
        ));
    }
    Ok(QuestDef {
        def_name,
        label,
        giver,
        requires,
        objectives,
        rewards,
    })
}

fn parse_objectives(
    ctx: &ParseCtx<'_>,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<Vec<ObjectiveDef>, ContentCompileError> {
    const OWNER: &str = "objectives/li";
    let mut objectives: Vec<ObjectiveDef> = Vec::new();
    for li in list_items(ctx, doc, node)? {
        let mut id = None;
        let mut label = None;
        let mut kind = None;
        let mut reference = None;
        let mut target = None;
        for field in unique_fields(ctx, doc, li, OWNER)? {
            match field.tag_name().name() {
                "id" => id = Some(ctx.required_text(doc, field, "id")?),
                "label" => label = Some(ctx.required_text(doc, field, "label")?),
                "kind" => kind = Some((ctx.required_text(doc, field, "kind")?, field)),
                "item" | "mob" | "npc" | "key" => {
                    if reference.is_some() {
                        return Err(ctx.error_at(
                            doc,
                            field,
                            ContentErrorCode::DuplicateField,
                            "objective may name only one of <item>, <mob>, <npc>, <key>"
                                .to_string(),
                        ));
                    }
                    let value = ctx.required_text(doc, field, field.tag_name().name())?;
                    reference = Some((field.tag_name().name(), value));
                }
                "target" => target = Some(ctx.number::<u32>(doc, field, "target")?),
                _ => return Err(ctx.unknown_field(doc, field, OWNER)),
            }
        }

        let id = id.ok_or_else(|| ctx.missing(doc, li, "id", OWNER))?;
        let (kind_text, kind_node) = kind.ok_or_else(|| ctx.missing(doc, li, "kind", OWNER))?;
        let target = target.unwrap_or(1);
        if target == 0 {
            return Err(ctx.error_at(
                doc,
                li,
                ContentErrorCode::InvalidValue,
                format!("objective '{id}' target must be >= 1"),
            ));
        }
        if objectives.iter().any(|existing| existing.id == id) {
            return Err(ctx.error_at(
                doc,
                li,
                ContentErrorCode::InvalidValue,
                format!("duplicate objective id '{id}'"),
            ));
        }

        let reference_for = |expected: &str| -> Result<String, ContentCompileError> {
            match &reference {
                Some((name, value)) if *name == expected => Ok(value.clone()),
                _ => Err(ctx.missing(doc, li, expected, OWNER)),
            }
        };
        let kind = match kind_text.as_str() {
            "gather_item" => ObjectiveKind::GatherItem {
                item: reference_for("item")?,
            },
            "cook_any" => ObjectiveKind::CookAny,
            "smelt_item" => ObjectiveKind::SmeltItem {
                item: reference_for("item")?,
            },
            "kill_mob" => ObjectiveKind::KillMob {
                mob: reference_for("mob")?,
            },
            "talk_npc" => ObjectiveKind::TalkNpc {
                npc: reference_for("npc")?,
            },
            "manual" => ObjectiveKind::Manual {
                key: reference
                    .as_ref()
                    .filter(|(name, _)| *name == "key")
                    .map(|(_, value)| value.clone())
                    .unwrap_or_else(|| id.clone()),
            },
            other => {
                return Err(ctx.error_at(
                    doc,
                    kind_node,
                    ContentErrorCode::InvalidValue,
                    format!(
                        "invalid objective kind '{other}'; allowed values: gather_item, cook_any, smelt_item, kill_mob, talk_npc, manual"
                    ),
                ))
            }
        };

        objectives.push(ObjectiveDef {
            label: label.unwrap_or_else(|| id.clone()),
            id,
            kind,
            target,
        });
    }
    Ok(objectives)
}

fn parse_rewards(
    ctx: &ParseCtx<'_>,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<Vec<RewardDef>, ContentCompileError> {
    const OWNER: &str = "rewards/li";
    let mut rewards = Vec::new();
    for li in list_items(ctx, doc, node)? {
        let mut kind = None;
        let mut item = None;
        let mut skill = None;
        let mut amount = None;
        for field in unique_fields(ctx, doc, li, OWNER)? {
            match field.tag_name().name() {
                "kind" => kind = Some(ctx.required_text(doc, field, "kind")?),
                "item" => item = Some(ctx.required_text(doc, field, "item")?),
                "skill" => skill = Some(ctx.required_text(doc, field, "skill")?),
                "qty" | "amount" => {
                    amount = Some(ctx.number::<u32>(doc, field, field.tag_name().name())?)
                }
                _ => return Err(ctx.unknown_field(doc, field, OWNER)),
            }
        }
        let kind = kind.ok_or_else(|| ctx.missing(doc, li, "kind", OWNER))?;
        let amount = amount.unwrap_or(1);
        let reward = match kind.as_str() {
            "item" => RewardDef::Item {
                item: item.ok_or_else(|| ctx.missing(doc, li, "item", OWNER))?,
                qty: amount,
            },
            "gold" => RewardDef::Gold { amount },
            "xp" => RewardDef::Xp {
                skill: skill.ok_or_else(|| ctx.missing(doc, li, "skill", OWNER))?,
                amount,
            },
            other => {
                return Err(ctx.error_at(
                    doc,
                    li,
                    ContentErrorCode::InvalidValue,
                    format!("invalid reward kind '{other}'; allowed values: item, gold, xp"),
                ))
            }
        };
        rewards.push(reward);
    }
    Ok(rewards)
}

fn location_of(doc: &Document<'_>, node: Node<'_, '_>) -> SourceLocation {
    let pos = doc.text_pos_at(node.range().start);
    SourceLocation {
        line: pos.row as usize,
        column: pos.col as usize,
    }
}

struct ReadError {
    path: PathBuf,
    source: std::io::Error,
}

fn collect_xml_files_sorted(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut files = Vec::<PathBuf>::new();
    collect_recursive(root, &mut files)?;
    files.sort_by_key(|path| normalize_rel_path(path.strip_prefix(root).unwrap_or(path)));
    Ok(files)
}

fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), ReadError> {
    let entries = fs::read_dir(current).map_err(|source| ReadError {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_error(mod_id: &str, path: PathBuf, source: std::io::Error) -> ContentCompileError {
    ContentCompileError {
        code: ContentErrorCode::ReadFile,
        message: format!("failed to read XML content: {source}"),
        mod_id: mod_id.to_string(),
        file_path: path,
        location: None,
    }
}

fn map_discovery_error(error: ContentDiscoveryError, root: &Path) -> ContentCompileError {
    match error {
        ContentDiscoveryError::EnabledModMissing {
            mod_id,
            expected_dir,
        } => ContentCompileError {
            code: ContentErrorCode::Discovery,
            message: format!(
                "enabled mod '{}' not found at {}; check enabled mod list",
                mod_id,
                expected_dir.display()
            ),
            mod_id,
            file_path: expected_dir,
            location: None,
        },
        other => ContentCompileError {
            code: ContentErrorCode::Discovery,
            message: other.to_string(),
            mod_id: "<discovery>".to_string(),
            file_path: root.to_path_buf(),
            location: None,
        },
    }
}
