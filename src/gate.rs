use crate::batch::BatchStatus;
use crate::ledger::MarksLedger;
use crate::session::EditSession;
use serde::Serialize;

/// Decides which marks actions are legal right now. Every check is total.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionGate<'a> {
    status: &'a BatchStatus,
    ledger: &'a MarksLedger,
    session: &'a EditSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateFlags {
    pub can_edit: bool,
    pub can_save: bool,
    pub can_submit: bool,
    pub all_submitted: bool,
}

impl<'a> SubmissionGate<'a> {
    pub fn new(status: &'a BatchStatus, ledger: &'a MarksLedger, session: &'a EditSession) -> Self {
        Self {
            status,
            ledger,
            session,
        }
    }

    /// False for an empty ledger.
    pub fn all_submitted(&self) -> bool {
        self.ledger.all_submitted()
    }

    pub fn can_edit(&self) -> bool {
        *self.status != BatchStatus::Completed && !self.all_submitted()
    }

    pub fn can_save(&self) -> bool {
        self.can_edit() && self.session.is_dirty()
    }

    pub fn can_submit(&self) -> bool {
        self.can_edit()
    }

    pub fn flags(&self) -> GateFlags {
        GateFlags {
            can_edit: self.can_edit(),
            can_save: self.can_save(),
            can_submit: self.can_submit(),
            all_submitted: self.all_submitted(),
        }
    }
}
