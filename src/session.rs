use crate::ledger::MarksLedger;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    Viewing,
    Editing,
}

/// Edit/rollback state for one ledger.
///
/// The snapshot is a deep copy taken when editing starts and is the only
/// source `cancel` restores from.
#[derive(Debug, Clone)]
pub struct EditSession {
    mode: EditMode,
    snapshot: Option<MarksLedger>,
    dirty: bool,
}

impl Default for EditSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EditSession {
    pub fn new() -> Self {
        Self {
            mode: EditMode::Viewing,
            snapshot: None,
            dirty: false,
        }
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn is_editing(&self) -> bool {
        self.mode == EditMode::Editing
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Starts editing if `can_edit`; returns whether the session is editing
    /// afterwards. Re-entering keeps the original snapshot.
    pub fn enter(&mut self, ledger: &MarksLedger, can_edit: bool) -> bool {
        if self.is_editing() {
            return true;
        }
        if !can_edit {
            return false;
        }
        self.snapshot = Some(ledger.clone());
        self.mode = EditMode::Editing;
        self.dirty = false;
        true
    }

    /// Records as they were when editing started.
    pub fn snapshot(&self) -> Option<&MarksLedger> {
        self.snapshot.as_ref()
    }

    pub fn snapshot_mut(&mut self) -> Option<&mut MarksLedger> {
        self.snapshot.as_mut()
    }

    pub fn mark_dirty(&mut self) {
        if self.is_editing() {
            self.dirty = true;
        }
    }

    pub fn cancel(&mut self, ledger: &mut MarksLedger) {
        if let Some(snapshot) = self.snapshot.take() {
            *ledger = snapshot;
        }
        self.mode = EditMode::Viewing;
        self.dirty = false;
    }

    /// Leaves editing after the caller has persisted. Performs no I/O.
    pub fn commit(&mut self) {
        self.snapshot = None;
        self.mode = EditMode::Viewing;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Language;
    use crate::ledger::{LanguageScores, RecordStatus, StudentMarksRecord};
    use serde_json::json;

    fn ledger() -> MarksLedger {
        let mut l = MarksLedger::empty("b1", Language::French);
        l.records.push(StudentMarksRecord {
            student_id: "s1".into(),
            student_name: "Ana".into(),
            scores: LanguageScores::empty(Language::French),
            status: RecordStatus::Draft,
        });
        l
    }

    #[test]
    fn cancel_restores_pre_enter_state_exactly() {
        let mut l = ledger();
        l.set_score(0, "production_orale", &json!(11)).expect("seed");
        let before = l.clone();

        let mut session = EditSession::new();
        assert!(session.enter(&l, true));
        l.set_score(0, "production_orale", &json!(24)).expect("edit");
        l.set_assessment_date(Some("2026-05-02")).expect("date");
        session.mark_dirty();
        assert!(session.is_dirty());

        session.cancel(&mut l);
        assert_eq!(l, before);
        assert_eq!(session.mode(), EditMode::Viewing);
        assert!(!session.is_dirty());
    }

    #[test]
    fn enter_is_refused_when_gate_closed() {
        let l = ledger();
        let mut session = EditSession::new();
        assert!(!session.enter(&l, false));
        assert_eq!(session.mode(), EditMode::Viewing);
    }

    #[test]
    fn enter_twice_keeps_first_snapshot() {
        let mut l = ledger();
        let before = l.clone();
        let mut session = EditSession::new();
        session.enter(&l, true);
        l.set_score(0, "production_ecrite", &json!(3)).expect("edit");
        session.enter(&l, true);
        session.cancel(&mut l);
        assert_eq!(l, before);
    }

    #[test]
    fn commit_clears_dirty_without_touching_ledger() {
        let mut l = ledger();
        let mut session = EditSession::new();
        session.enter(&l, true);
        l.set_score(0, "comprehension_orale", &json!(20)).expect("edit");
        session.mark_dirty();
        let edited = l.clone();
        session.commit();
        assert_eq!(l, edited);
        assert!(!session.is_dirty());
        assert!(!session.is_editing());
    }

    #[test]
    fn mark_dirty_ignored_while_viewing() {
        let mut session = EditSession::new();
        session.mark_dirty();
        assert!(!session.is_dirty());
    }
}
