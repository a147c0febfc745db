//! Quest progression: prerequisites form a DAG, objectives advance through
//! [`QuestBook::track_quest_event`] only. An event with a token is applied at most once per
//! objective; a tokenless event counts every time it is raised.

mod rules;

use std::collections::{BTreeMap, BTreeSet};

use engine::{DefDatabase, ObjectiveKind, QuestDef, RewardDef, SimInstant};
use thiserror::Error;
use tracing::info;

pub use rules::objective_cap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestEvent {
    GatherItem { item: String, qty: u32, token: Option<String> },
    CookAny { item: String, qty: u32, token: Option<String> },
    SmeltItem { item: String, qty: u32, token: Option<String> },
    KillMob { mob: String, qty: u32, token: Option<String> },
    TalkNpc { npc: String, qty: u32, token: Option<String> },
    Manual { key: String, qty: u32, token: Option<String> },
}

impl QuestEvent {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::GatherItem { token, .. }
            | Self::CookAny { token, .. }
            | Self::SmeltItem { token, .. }
            | Self::KillMob { token, .. }
            | Self::TalkNpc { token, .. }
            | Self::Manual { token, .. } => token.as_deref(),
        }
    }

    pub fn type_key(&self) -> &'static str {
        match self {
            Self::GatherItem { .. } => "gather_item",
            Self::CookAny { .. } => "cook_any",
            Self::SmeltItem { .. } => "smelt_item",
            Self::KillMob { .. } => "kill_mob",
            Self::TalkNpc { .. } => "talk_npc",
            Self::Manual { .. } => "manual",
        }
    }

    /// Zero quantities still count as one.
    fn amount(&self) -> u32 {
        match self {
            Self::GatherItem { qty, .. }
            | Self::CookAny { qty, .. }
            | Self::SmeltItem { qty, .. }
            | Self::KillMob { qty, .. }
            | Self::TalkNpc { qty, .. }
            | Self::Manual { qty, .. } => (*qty).max(1),
        }
    }

    fn matches(&self, kind: &ObjectiveKind) -> bool {
        match (self, kind) {
            (Self::GatherItem { item, .. }, ObjectiveKind::GatherItem { item: wanted }) => {
                item == wanted
            }
            (Self::CookAny { .. }, ObjectiveKind::CookAny) => true,
            (Self::SmeltItem { item, .. }, ObjectiveKind::SmeltItem { item: wanted }) => {
                item == wanted
            }
            (Self::KillMob { mob, .. }, ObjectiveKind::KillMob { mob: wanted }) => mob == wanted,
            (Self::TalkNpc { npc, .. }, ObjectiveKind::TalkNpc { npc: wanted }) => npc == wanted,
            (Self::Manual { key, .. }, ObjectiveKind::Manual { key: wanted }) => key == wanted,
            _ => false,
        }
    }
}

/// Consumed `(objective id, token)` pairs for one quest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedTokens {
    applied: BTreeSet<(String, String)>,
}

impl AppliedTokens {
    pub fn contains(&self, objective: &str, token: &str) -> bool {
        self.applied
            .contains(&(objective.to_string(), token.to_string()))
    }

    /// Returns false when the pair was already present.
    pub fn insert(&mut self, objective: impl Into<String>, token: impl Into<String>) -> bool {
        self.applied.insert((objective.into(), token.into()))
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.applied
            .iter()
            .map(|(objective, token)| (objective.as_str(), token.as_str()))
    }

    pub fn retain_objectives(&mut self, keep: impl Fn(&str) -> bool) -> usize {
        let before = self.applied.len();
        self.applied.retain(|(objective, _)| keep(objective));
        before - self.applied.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestProgress {
    pub started_at: SimInstant,
    pub completed_at: Option<SimInstant>,
    pub counters: BTreeMap<String, u32>,
    pub tokens: AppliedTokens,
    /// Reward token: flips once, when rewards are handed out.
    pub rewards_granted: bool,
}

impl QuestProgress {
    pub fn started(def: &QuestDef, now: SimInstant) -> Self {
        Self {
            started_at: now,
            completed_at: None,
            counters: def
                .objectives
                .iter()
                .map(|objective| (objective.id.clone(), 0))
                .collect(),
            tokens: AppliedTokens::default(),
            rewards_granted: false,
        }
    }

    pub fn count(&self, objective: &str) -> u32 {
        self.counters.get(objective).copied().unwrap_or(0)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn all_objectives_met(&self, def: &QuestDef) -> bool {
        def.objectives
            .iter()
            .all(|objective| self.count(&objective.id) >= objective.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestStatus {
    Locked,
    Available,
    Active,
    Completed,
}

impl QuestStatus {
    pub fn key(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveAdvance {
    pub quest: String,
    pub objective: String,
    pub count: u32,
    pub target: u32,
}

/// What one call into the quest book changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestUpdate {
    pub advanced: Vec<ObjectiveAdvance>,
    pub completed: Vec<String>,
    pub unlocked: Vec<String>,
    /// Rewards the caller must hand out, tagged with the quest id. Each quest contributes
    /// at most once over its lifetime.
    pub rewards: Vec<(String, RewardDef)>,
    pub duplicate_tokens: usize,
}

impl QuestUpdate {
    pub fn is_empty(&self) -> bool {
        self.advanced.is_empty()
            && self.completed.is_empty()
            && self.unlocked.is_empty()
            && self.rewards.is_empty()
    }

    pub fn merge(&mut self, other: QuestUpdate) {
        self.advanced.extend(other.advanced);
        self.completed.extend(other.completed);
        self.unlocked.extend(other.unlocked);
        self.rewards.extend(other.rewards);
        self.duplicate_tokens += other.duplicate_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestError {
    #[error("unknown quest '{quest}'")]
    UnknownQuest { quest: String },
    #[error("quest '{quest}' is locked; complete first: {missing:?}")]
    Locked { quest: String, missing: Vec<String> },
    #[error("quest '{quest}' already started")]
    AlreadyStarted { quest: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestBook {
    progress: BTreeMap<String, QuestProgress>,
}

impl QuestBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_progress(progress: BTreeMap<String, QuestProgress>) -> Self {
        Self { progress }
    }

    pub fn progress(&self, quest: &str) -> Option<&QuestProgress> {
        self.progress.get(quest)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QuestProgress)> {
        self.progress
            .iter()
            .map(|(quest, progress)| (quest.as_str(), progress))
    }

    pub fn is_started(&self, quest: &str) -> bool {
        self.progress.contains_key(quest)
    }

    pub fn is_completed(&self, quest: &str) -> bool {
        self.progress
            .get(quest)
            .is_some_and(QuestProgress::is_complete)
    }

    pub fn objective_count(&self, quest: &str, objective: &str) -> u32 {
        self.progress
            .get(quest)
            .map(|progress| progress.count(objective))
            .unwrap_or(0)
    }

    pub fn is_objective_complete(&self, db: &DefDatabase, quest: &str, objective: &str) -> bool {
        db.quest(quest)
            .and_then(|def| def.objective(objective))
            .is_some_and(|def| self.objective_count(quest, objective) >= def.target)
    }

    pub fn missing_prerequisites(&self, def: &QuestDef) -> Vec<String> {
        def.requires
            .iter()
            .filter(|required| !self.is_completed(required))
            .cloned()
            .collect()
    }

    pub fn is_unlocked(&self, def: &QuestDef) -> bool {
        def.requires
            .iter()
            .all(|required| self.is_completed(required))
    }

    pub fn status(&self, db: &DefDatabase, quest: &str) -> Option<QuestStatus> {
        let def = db.quest(quest)?;
        Some(match self.progress.get(quest) {
            Some(progress) if progress.is_complete() => QuestStatus::Completed,
            Some(_) => QuestStatus::Active,
            None if self.is_unlocked(def) => QuestStatus::Available,
            None => QuestStatus::Locked,
        })
    }

    pub fn start_quest(
        &mut self,
        db: &DefDatabase,
        quest: &str,
        now: SimInstant,
    ) -> Result<(), QuestError> {
        let def = db.quest(quest).ok_or_else(|| QuestError::UnknownQuest {
            quest: quest.to_string(),
        })?;
        if self.progress.contains_key(quest) {
            return Err(QuestError::AlreadyStarted {
                quest: quest.to_string(),
            });
        }
        let missing = self.missing_prerequisites(def);
        if !missing.is_empty() {
            return Err(QuestError::Locked {
                quest: quest.to_string(),
                missing,
            });
        }
        self.progress
            .insert(quest.to_string(), QuestProgress::started(def, now));
        info!(quest, at_ms = now.as_ms(), "quest_started");
        Ok(())
    }

    /// First unlocked, not yet started quest handed out by `npc`, in id order.
    pub fn next_quest_from(&self, db: &DefDatabase, npc: &str) -> Option<String> {
        db.quests()
            .filter(|def| def.giver.as_deref() == Some(npc))
            .find(|def| !self.is_started(&def.def_name) && self.is_unlocked(def))
            .map(|def| def.def_name.clone())
    }

    /// Single entry point for gameplay progress.
    pub fn track_quest_event(
        &mut self,
        db: &DefDatabase,
        event: &QuestEvent,
        now: SimInstant,
    ) -> QuestUpdate {
        let mut update = QuestUpdate::default();
        let token = event.token();
        let started = self.progress.keys().cloned().collect::<Vec<_>>();

        for quest_id in started {
            let Some(def) = db.quest(&quest_id) else {
                continue;
            };
            if !self.is_unlocked(def) {
                continue;
            }
            let Some(progress) = self.progress.get_mut(&quest_id) else {
                continue;
            };
            if progress.is_complete() {
                continue;
            }

            for objective in &def.objectives {
                if !event.matches(&objective.kind) {
                    continue;
                }
                if token.is_some_and(|token| progress.tokens.contains(&objective.id, token)) {
                    update.duplicate_tokens += 1;
                    continue;
                }
                let cap = objective_cap(def, objective, progress);
                let current = progress.count(&objective.id);
                if current >= cap {
                    continue;
                }
                let next = current.saturating_add(event.amount()).min(cap);
                progress.counters.insert(objective.id.clone(), next);
                if let Some(token) = token {
                    progress.tokens.insert(objective.id.clone(), token);
                }
                update.advanced.push(ObjectiveAdvance {
                    quest: quest_id.clone(),
                    objective: objective.id.clone(),
                    count: next,
                    target: objective.target,
                });
            }

            if progress.all_objectives_met(def) {
                self.complete(db, def, now, &mut update);
            }
        }

        update
    }

    /// Completes quests whose objectives are all at target and hands out rewards still owed.
    /// Run after restoring progress from a save.
    pub fn reconcile_completions(&mut self, db: &DefDatabase, now: SimInstant) -> QuestUpdate {
        let mut update = QuestUpdate::default();
        let started = self.progress.keys().cloned().collect::<Vec<_>>();
        for quest_id in started {
            let Some(def) = db.quest(&quest_id) else {
                continue;
            };
            let Some(progress) = self.progress.get(&quest_id) else {
                continue;
            };
            let owed = progress.is_complete() && !progress.rewards_granted;
            let finished = !progress.is_complete() && progress.all_objectives_met(def);
            if owed || finished {
                self.complete(db, def, now, &mut update);
            }
        }
        update
    }

    fn complete(
        &mut self,
        db: &DefDatabase,
        def: &QuestDef,
        now: SimInstant,
        update: &mut QuestUpdate,
    ) {
        let Some(progress) = self.progress.get_mut(&def.def_name) else {
            return;
        };
        let newly_completed = progress.completed_at.is_none();
        if newly_completed {
            progress.completed_at = Some(now);
            update.completed.push(def.def_name.clone());
            info!(quest = %def.def_name, at_ms = now.as_ms(), "quest_completed");
        }
        if !progress.rewards_granted {
            progress.rewards_granted = true;
            update.rewards.extend(
                def.rewards
                    .iter()
                    .cloned()
                    .map(|reward| (def.def_name.clone(), reward)),
            );
        }
        if !newly_completed {
            return;
        }
        for candidate in db.quests() {
            if candidate.requires.iter().any(|required| *required == def.def_name)
                && !self.is_started(&candidate.def_name)
                && self.is_unlocked(candidate)
            {
                info!(quest = %candidate.def_name, "quest_unlocked");
                update.unlocked.push(candidate.def_name.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::content::builtin_def_database;

    use super::*;

    fn gather(token: &str) -> QuestEvent {
        QuestEvent::GatherItem {
            item: "logs".to_string(),
            qty: 1,
            token: Some(token.to_string()),
        }
    }

    fn kill(token: Option<&str>) -> QuestEvent {
        QuestEvent::KillMob {
            mob: "rat".to_string(),
            qty: 1,
            token: token.map(str::to_string),
        }
    }

    fn talk(token: &str) -> QuestEvent {
        QuestEvent::TalkNpc {
            npc: "quartermaster".to_string(),
            qty: 1,
            token: Some(token.to_string()),
        }
    }

    #[test]
    fn events_before_start_do_nothing() {
        let db = builtin_def_database().expect("defs");
        let mut book = QuestBook::new();
        let update = book.track_quest_event(&db, &gather("g1"), SimInstant(0));
        assert!(update.is_empty());
        assert_eq!(book.objective_count("first_watch", "gather_logs"), 0);
    }

    #[test]
    fn same_token_counts_once() {
        let db = builtin_def_database().expect("defs");
        let mut book = QuestBook::new();
        book.start_quest(&db, "first_watch", SimInstant(0))
            .expect("start");
        book.track_quest_event(&db, &gather("g1"), SimInstant(1));
        let repeat = book.track_quest_event(&db, &gather("g1"), SimInstant(2));
        assert!(repeat.advanced.is_empty());
        assert_eq!(repeat.duplicate_tokens, 1);
        assert_eq!(book.objective_count("first_watch", "gather_logs"), 1);
        book.track_quest_event(&db, &gather("g2"), SimInstant(3));
        assert_eq!(book.objective_count("first_watch", "gather_logs"), 2);
    }

    #[test]
    fn tokenless_events_count_every_time() {
        let db = builtin_def_database().expect("defs");
        let mut book = QuestBook::new();
        book.start_quest(&db, "first_watch", SimInstant(0))
            .expect("start");
        book.track_quest_event(&db, &kill(None), SimInstant(1));
        let second = book.track_quest_event(&db, &kill(None), SimInstant(2));
        assert_eq!(second.advanced.len(), 1);
        assert_eq!(second.duplicate_tokens, 0);
        assert_eq!(book.objective_count("first_watch", "kill_rats"), 2);
        assert!(book
            .progress("first_watch")
            .expect("progress")
            .tokens
            .is_empty());
    }

    #[test]
    fn kill_quantity_advances_by_the_amount() {
        let db = builtin_def_database().expect("defs");
        let mut book = QuestBook::new();
        book.start_quest(&db, "first_watch", SimInstant(0))
            .expect("start");
        let update = book.track_quest_event(
            &db,
            &QuestEvent::KillMob {
                mob: "rat".to_string(),
                qty: 2,
                token: Some("pack".to_string()),
            },
            SimInstant(1),
        );
        assert_eq!(update.advanced[0].count, 2);
    }

    #[test]
    fn counters_never_pass_target() {
        let db = builtin_def_database().expect("defs");
        let mut book = QuestBook::new();
        book.start_quest(&db, "first_watch", SimInstant(0))
            .expect("start");
        let update = book.track_quest_event(
            &db,
            &QuestEvent::GatherItem {
                item: "logs".to_string(),
                qty: 50,
                token: Some("bulk".to_string()),
            },
            SimInstant(1),
        );
        assert_eq!(update.advanced[0].count, 3);
        assert_eq!(book.objective_count("first_watch", "gather_logs"), 3);
    }

    #[test]
    fn report_back_waits_for_siblings() {
        let db = builtin_def_database().expect("defs");
        let mut book = QuestBook::new();
        book.start_quest(&db, "first_watch", SimInstant(0))
            .expect("start");
        book.track_quest_event(&db, &talk("t1"), SimInstant(1));
        book.track_quest_event(&db, &talk("t2"), SimInstant(2));
        assert_eq!(book.objective_count("first_watch", "report_back"), 1);

        for token in ["g1", "g2", "g3"] {
            book.track_quest_event(&db, &gather(token), SimInstant(3));
        }
        book.track_quest_event(&db, &kill(Some("k1")), SimInstant(4));
        book.track_quest_event(&db, &kill(Some("k2")), SimInstant(5));
        assert!(!book.is_completed("first_watch"));

        let update = book.track_quest_event(&db, &talk("t3"), SimInstant(6));
        assert_eq!(update.completed, vec!["first_watch".to_string()]);
        assert_eq!(update.unlocked, vec!["sealed_depths".to_string()]);
        assert_eq!(update.rewards.len(), 3);
        assert_eq!(
            book.progress("first_watch").expect("progress").completed_at,
            Some(SimInstant(6))
        );
    }

    #[test]
    fn completion_and_rewards_happen_once() {
        let db = builtin_def_database().expect("defs");
        let mut book = QuestBook::new();
        book.start_quest(&db, "hearth_and_forge", SimInstant(0))
            .expect("start");
        let mut rewards = 0;
        for n in 0..4 {
            let update = book.track_quest_event(
                &db,
                &QuestEvent::CookAny {
                    item: "shrimp".to_string(),
                    qty: 1,
                    token: Some(format!("c{n}")),
                },
                SimInstant(n),
            );
            rewards += update.rewards.len();
            let update = book.track_quest_event(
                &db,
                &QuestEvent::SmeltItem {
                    item: "bronze_bar".to_string(),
                    qty: 1,
                    token: Some(format!("s{n}")),
                },
                SimInstant(n),
            );
            rewards += update.rewards.len();
        }
        assert_eq!(rewards, 3);
        assert!(book.reconcile_completions(&db, SimInstant(10)).is_empty());
    }

    #[test]
    fn locked_quests_refuse_to_start() {
        let db = builtin_def_database().expect("defs");
        let mut book = QuestBook::new();
        assert_eq!(
            book.status(&db, "sealed_depths"),
            Some(QuestStatus::Locked)
        );
        assert!(matches!(
            book.start_quest(&db, "sealed_depths", SimInstant(0)),
            Err(QuestError::Locked { .. })
        ));
        assert!(matches!(
            book.start_quest(&db, "nope", SimInstant(0)),
            Err(QuestError::UnknownQuest { .. })
        ));
        book.start_quest(&db, "first_watch", SimInstant(0))
            .expect("start");
        assert!(matches!(
            book.start_quest(&db, "first_watch", SimInstant(0)),
            Err(QuestError::AlreadyStarted { .. })
        ));
        assert_eq!(
            book.next_quest_from(&db, "quartermaster"),
            None,
            "sealed_depths stays locked while first_watch is open"
        );
    }

    #[test]
    fn reconcile_completes_quests_restored_at_target() {
        let db = builtin_def_database().expect("defs");
        let def = db.quest("first_watch").expect("def");
        let mut progress = QuestProgress::started(def, SimInstant(0));
        for objective in &def.objectives {
            progress
                .counters
                .insert(objective.id.clone(), objective.target);
        }
        let mut book = QuestBook::from_progress(BTreeMap::from([(
            "first_watch".to_string(),
            progress,
        )]));
        let update = book.reconcile_completions(&db, SimInstant(50));
        assert_eq!(update.completed, vec!["first_watch".to_string()]);
        assert_eq!(update.rewards.len(), 3);
        assert!(book.reconcile_completions(&db, SimInstant(60)).is_empty());
    }
}
