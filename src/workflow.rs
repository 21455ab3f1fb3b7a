use crate::backend::AssessmentBackend;
use crate::batch::{Batch, BatchStatus, Language};
use crate::certificates::{
    CertificateRecord, CertificateRegistry, GenerateAllReport, GenerateFailure,
};
use crate::context::{Action, SessionContext};
use crate::error::WorkflowError;
use crate::gate::{GateFlags, SubmissionGate};
use crate::ledger::{total_for, LanguageColumn, LanguageScores, MarksLedger, RecordStatus};
use crate::session::{EditMode, EditSession};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Loading,
    Ready,
    Saving,
    Submitting,
}

pub struct AssessmentWorkflow {
    context: SessionContext,
    batch: Batch,
    phase: Phase,
    ledger: MarksLedger,
    session: EditSession,
    registry: CertificateRegistry,
    notice: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    pub id: String,
    pub name: String,
    pub language: Language,
    pub status: BatchStatus,
    pub status_label: String,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub index: usize,
    pub student_id: String,
    pub student_name: String,
    pub scores: LanguageScores,
    pub total: u64,
    pub status: RecordStatus,
    pub certificate: Option<CertificateRecord>,
    pub can_generate_certificate: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentView {
    pub batch: BatchView,
    pub actor: SessionContext,
    pub phase: Phase,
    pub mode: EditMode,
    pub dirty: bool,
    pub assessment_date: Option<String>,
    pub columns: Vec<LanguageColumn>,
    pub max_total: u64,
    pub rows: Vec<RowView>,
    pub certificate_count: usize,
    pub submitted: bool,
    pub gate: GateFlags,
    pub notice: Option<String>,
}

impl AssessmentWorkflow {
    pub fn new(context: SessionContext, batch: Batch) -> Self {
        let ledger = MarksLedger::empty(&batch.id, batch.language);
        Self {
            context,
            batch,
            phase: Phase::Loading,
            ledger,
            session: EditSession::new(),
            registry: CertificateRegistry::new(),
            notice: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ledger(&self) -> &MarksLedger {
        &self.ledger
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn registry(&self) -> &CertificateRegistry {
        &self.registry
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn gate(&self) -> SubmissionGate<'_> {
        SubmissionGate::new(&self.batch.status, &self.ledger, &self.session)
    }

    /// Loads marks and certificates. A load failure leaves an empty ledger
    /// in `Ready` so the view renders an empty state.
    pub fn load(&mut self, backend: &dyn AssessmentBackend) -> Result<(), WorkflowError> {
        self.phase = Phase::Loading;
        self.session = EditSession::new();
        match MarksLedger::load(backend, &self.batch.id) {
            Ok(loaded) => {
                if loaded.ledger.language != self.batch.language {
                    warn!(
                        target: "batchcertd::workflow",
                        batch_id = %self.batch.id,
                        batch_language = self.batch.language.as_str(),
                        course_language = loaded.ledger.language.as_str(),
                        "course language differs from batch language; using course language"
                    );
                }
                self.ledger = loaded.ledger;
                self.registry = CertificateRegistry::from_records(loaded.certificates);
                self.notice = None;
                self.phase = Phase::Ready;
                info!(
                    target: "batchcertd::workflow",
                    batch_id = %self.batch.id,
                    students = self.ledger.records.len(),
                    certificates = self.registry.len(),
                    "assessment loaded"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: "batchcertd::workflow",
                    batch_id = %self.batch.id,
                    error = %e,
                    "assessment load failed"
                );
                self.ledger = MarksLedger::empty(&self.batch.id, self.batch.language);
                self.registry = CertificateRegistry::new();
                self.notice = Some(e.to_string());
                self.phase = Phase::Ready;
                Err(e.into())
            }
        }
    }

    /// Applies a fresh copy of the externally owned batch. Unsaved edits are
    /// discarded if the batch became locked meanwhile.
    pub fn refresh_batch(&mut self, batch: Batch) {
        let newly_locked = batch.is_locked() && !self.batch.is_locked();
        self.batch = batch;
        if newly_locked && self.session.is_editing() {
            self.session.cancel(&mut self.ledger);
            self.notice = Some("Batch was completed; unsaved marks were discarded.".to_string());
        }
    }

    fn authorize(&self, action: Action) -> Result<(), WorkflowError> {
        if self.context.may(action) {
            return Ok(());
        }
        Err(WorkflowError::Forbidden {
            action,
            role: self.context.role.as_str().to_string(),
        })
    }

    fn refuse(&self, action: Action) -> WorkflowError {
        debug!(
            target: "batchcertd::workflow",
            batch_id = %self.batch.id,
            action = action.as_str(),
            "action refused by gate"
        );
        WorkflowError::Refused { action }
    }

    fn ensure_mutable(&self) -> Result<(), WorkflowError> {
        if self.phase != Phase::Ready || !self.session.is_editing() || !self.gate().can_edit() {
            return Err(self.refuse(Action::EditMarks));
        }
        Ok(())
    }

    pub fn begin_edit(&mut self) -> Result<(), WorkflowError> {
        self.authorize(Action::EditMarks)?;
        if self.phase != Phase::Ready {
            return Err(self.refuse(Action::EditMarks));
        }
        let can_edit = self.gate().can_edit();
        if !self.session.enter(&self.ledger, can_edit) {
            return Err(self.refuse(Action::EditMarks));
        }
        Ok(())
    }

    pub fn set_score(
        &mut self,
        student_index: usize,
        column_key: &str,
        raw_value: &serde_json::Value,
    ) -> Result<u32, WorkflowError> {
        self.authorize(Action::EditMarks)?;
        self.ensure_mutable()?;
        let stored = self.ledger.set_score(student_index, column_key, raw_value)?;
        self.session.mark_dirty();
        Ok(stored)
    }

    pub fn set_assessment_date(&mut self, raw: Option<&str>) -> Result<(), WorkflowError> {
        self.authorize(Action::EditMarks)?;
        self.ensure_mutable()?;
        self.ledger.set_assessment_date(raw)?;
        self.session.mark_dirty();
        Ok(())
    }

    /// Rolls back to the snapshot taken by `begin_edit`. No-op while viewing.
    pub fn cancel_edit(&mut self) {
        if self.session.is_editing() {
            self.session.cancel(&mut self.ledger);
        }
    }

    pub fn save(&mut self, backend: &dyn AssessmentBackend) -> Result<(), WorkflowError> {
        self.authorize(Action::SaveMarks)?;
        if self.phase != Phase::Ready || !self.gate().can_save() {
            return Err(self.refuse(Action::SaveMarks));
        }

        self.phase = Phase::Saving;
        let result = backend
            .persist_marks(&self.batch.id, &self.ledger.records, self.ledger.assessment_date)
            .into_result();
        self.phase = Phase::Ready;

        match result {
            Ok(persisted) => {
                self.ledger.records = persisted.records;
                self.session.commit();
                self.notice = None;
                info!(target: "batchcertd::workflow", batch_id = %self.batch.id, "marks saved");
                Ok(())
            }
            Err(message) => Err(self.persistence_failed(message)),
        }
    }

    /// Flushes unsaved edits, then locks the marks. Any failure leaves mode,
    /// dirty flag and records exactly as they were before the call.
    pub fn submit(&mut self, backend: &dyn AssessmentBackend) -> Result<(), WorkflowError> {
        self.authorize(Action::SubmitMarks)?;
        if self.phase != Phase::Ready || !self.gate().can_submit() {
            return Err(self.refuse(Action::SubmitMarks));
        }

        self.phase = Phase::Submitting;
        let mut flushed = None;
        if self.session.is_editing() && self.session.is_dirty() {
            match backend
                .persist_marks(&self.batch.id, &self.ledger.records, self.ledger.assessment_date)
                .into_result()
            {
                Ok(persisted) => flushed = Some(persisted.records),
                Err(message) => {
                    self.phase = Phase::Ready;
                    return Err(self.persistence_failed(message));
                }
            }
        }

        if let Err(message) = backend.submit_marks(&self.batch.id).into_result() {
            self.phase = Phase::Ready;
            return Err(self.persistence_failed(message));
        }

        if let Some(records) = flushed {
            self.ledger.records = records;
        }
        for record in &mut self.ledger.records {
            if !record.status.is_submitted() {
                record.status = RecordStatus::Submitted;
            }
        }
        self.session.commit();
        self.phase = Phase::Ready;
        self.notice = None;
        info!(
            target: "batchcertd::workflow",
            batch_id = %self.batch.id,
            students = self.ledger.records.len(),
            "marks submitted"
        );
        Ok(())
    }

    fn persistence_failed(&mut self, message: String) -> WorkflowError {
        warn!(
            target: "batchcertd::workflow",
            batch_id = %self.batch.id,
            error = %message,
            "marks not persisted"
        );
        let e = WorkflowError::Persistence(message);
        self.notice = Some(e.to_string());
        e
    }

    /// Last saved marks. Unsaved edits never gate certificates.
    fn committed(&self) -> &MarksLedger {
        self.session.snapshot().unwrap_or(&self.ledger)
    }

    /// Applies a certificate-driven status change to the live ledger and to
    /// the edit snapshot, so a later cancel keeps it.
    fn move_status(&mut self, student_id: &str, from: RecordStatus, to: RecordStatus) {
        let snapshot = self.session.snapshot_mut().into_iter();
        for ledger in std::iter::once(&mut self.ledger).chain(snapshot) {
            if let Some(record) = ledger.find_mut(student_id) {
                if record.status == from {
                    record.status = to.clone();
                }
            }
        }
    }

    // Certificate calls take `&mut self`, so generation is already one at a time.
    fn ensure_certificate_ready(&self, action: Action) -> Result<(), WorkflowError> {
        self.authorize(action)?;
        if self.phase != Phase::Ready {
            return Err(self.refuse(action));
        }
        Ok(())
    }

    pub fn generate_certificate(
        &mut self,
        backend: &dyn AssessmentBackend,
        student_id: &str,
    ) -> Result<CertificateRecord, WorkflowError> {
        self.ensure_certificate_ready(Action::GenerateCertificate)?;
        let total = self
            .committed()
            .find(student_id)
            .map(total_for)
            .ok_or_else(|| WorkflowError::UnknownStudentId {
                student_id: student_id.to_string(),
            })?;

        let result = self
            .registry
            .generate(backend, &self.batch.id, student_id, total);

        result.map_err(|e| {
            self.notice = Some(e.to_string());
            e.into()
        })
    }

    /// Generates certificates one student at a time. `None` means every
    /// enrolled student that has no certificate yet.
    pub fn generate_all(
        &mut self,
        backend: &dyn AssessmentBackend,
        student_ids: Option<&[String]>,
    ) -> Result<GenerateAllReport, WorkflowError> {
        self.ensure_certificate_ready(Action::GenerateCertificate)?;

        let requested: Vec<String> = match student_ids {
            Some(ids) => ids.to_vec(),
            None => self
                .committed()
                .records
                .iter()
                .filter(|r| self.registry.get(&r.student_id).is_none())
                .map(|r| r.student_id.clone())
                .collect(),
        };

        let mut candidates = Vec::with_capacity(requested.len());
        let mut unknown = Vec::new();
        for id in &requested {
            match self.committed().find(id) {
                Some(record) => candidates.push((id.clone(), total_for(record))),
                None => unknown.push(id.clone()),
            }
        }

        let mut report = self
            .registry
            .generate_all(backend, &self.batch.id, &candidates);

        report.requested = requested.len();
        for student_id in unknown {
            let e = WorkflowError::UnknownStudentId {
                student_id: student_id.clone(),
            };
            report.failed.push(GenerateFailure {
                student_id,
                code: e.code().to_string(),
                message: e.to_string(),
            });
        }
        self.notice = if report.failed.is_empty() {
            None
        } else {
            Some(format!(
                "Generated {} of {} certificates; {} failed.",
                report.success_count(),
                report.requested,
                report.failed.len()
            ))
        };
        Ok(report)
    }

    pub fn approve_certificate(
        &mut self,
        backend: &dyn AssessmentBackend,
        certificate_id: &str,
    ) -> Result<CertificateRecord, WorkflowError> {
        self.ensure_certificate_ready(Action::ApproveCertificate)?;
        let approved = self
            .registry
            .approve(backend, certificate_id)
            .map_err(|e| {
                self.notice = Some(e.to_string());
                WorkflowError::from(e)
            })?;
        self.move_status(&approved.student_id, RecordStatus::Submitted, RecordStatus::Approved);
        Ok(approved)
    }

    pub fn delete_certificate(
        &mut self,
        backend: &dyn AssessmentBackend,
        certificate_id: &str,
    ) -> Result<CertificateRecord, WorkflowError> {
        self.ensure_certificate_ready(Action::DeleteCertificate)?;
        let removed = self
            .registry
            .delete(backend, certificate_id)
            .map_err(|e| {
                self.notice = Some(e.to_string());
                WorkflowError::from(e)
            })?;
        self.move_status(&removed.student_id, RecordStatus::Approved, RecordStatus::Submitted);
        Ok(removed)
    }

    pub fn view(&self) -> AssessmentView {
        let may_generate = self.context.may(Action::GenerateCertificate);
        let committed = self.committed();
        let rows = self
            .ledger
            .records
            .iter()
            .enumerate()
            .map(|(index, r)| {
                let total = total_for(r);
                let saved_total = committed.find(&r.student_id).map_or(0, total_for);
                let certificate = self.registry.get(&r.student_id).cloned();
                RowView {
                    index,
                    student_id: r.student_id.clone(),
                    student_name: r.student_name.clone(),
                    scores: r.scores,
                    total,
                    status: r.status.clone(),
                    can_generate_certificate: may_generate
                        && saved_total > 0
                        && certificate.is_none(),
                    certificate,
                }
            })
            .collect();
        let gate = self.gate().flags();

        AssessmentView {
            batch: BatchView {
                id: self.batch.id.clone(),
                name: self.batch.name.clone(),
                language: self.batch.language,
                status: self.batch.status.clone(),
                status_label: self.batch.status.label().to_string(),
                locked: self.batch.is_locked(),
            },
            actor: self.context.clone(),
            phase: self.phase,
            mode: self.session.mode(),
            dirty: self.session.is_dirty(),
            assessment_date: self
                .ledger
                .assessment_date
                .map(|d| d.format("%Y-%m-%d").to_string()),
            columns: self.ledger.columns().to_vec(),
            max_total: self.ledger.max_total(),
            rows,
            certificate_count: self.registry.len(),
            submitted: gate.all_submitted,
            gate,
            notice: self.notice.clone(),
        }
    }
}
