use engine::{ObjectiveDef, QuestDef};

use crate::content::QUEST_FIRST_WATCH;

use super::QuestProgress;

const REPORT_BACK: &str = "report_back";

/// Highest value an objective's counter may reach right now.
///
/// Normally the objective's target. In `first_watch` the quartermaster's report-back
/// objective stops at 1 (the briefing) until every other objective is done.
pub fn objective_cap(quest: &QuestDef, objective: &ObjectiveDef, progress: &QuestProgress) -> u32 {
    if quest.def_name == QUEST_FIRST_WATCH && objective.id == REPORT_BACK {
        let siblings_done = quest
            .objectives
            .iter()
            .filter(|other| other.id != objective.id)
            .all(|other| progress.count(&other.id) >= other.target);
        if !siblings_done {
            return objective.target.min(1);
        }
    }
    objective.target
}

#[cfg(test)]
mod tests {
    use engine::SimInstant;

    use crate::content::builtin_def_database;

    use super::*;

    #[test]
    fn only_first_watch_report_back_is_capped() {
        let db = builtin_def_database().expect("defs");
        let first = db.quest(QUEST_FIRST_WATCH).expect("first_watch");
        let progress = QuestProgress::started(first, SimInstant(0));
        let report = first.objective(REPORT_BACK).expect("report_back");
        assert_eq!(objective_cap(first, report, &progress), 1);
        let logs = first.objective("gather_logs").expect("gather_logs");
        assert_eq!(objective_cap(first, logs, &progress), 3);

        let sealed = db.quest("sealed_depths").expect("sealed_depths");
        let sealed_progress = QuestProgress::started(sealed, SimInstant(0));
        let braziers = sealed.objective("light_braziers").expect("braziers");
        assert_eq!(objective_cap(sealed, braziers, &sealed_progress), 2);
    }
}
