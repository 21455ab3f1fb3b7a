use crate::batch::Language;
use crate::context::Action;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("marks unavailable: {0}")]
    Backend(String),
    #[error("backend returned no student list for batch {batch_id}")]
    MissingStudents { batch_id: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("no student at row {index}")]
    UnknownStudent { index: usize },
    #[error("column '{key}' is not assessed for {}", .language.as_str())]
    UnknownColumn { key: String, language: Language },
    #[error("assessment date must be YYYY-MM-DD, got '{raw}'")]
    InvalidDate { raw: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CertificateError {
    #[error("student {student_id} already has a certificate; delete it before generating again")]
    AlreadyExists { student_id: String },
    #[error("student {student_id} has a total score of 0")]
    ZeroTotal { student_id: String },
    #[error("certificate {certificate_id} not found")]
    NotFound { certificate_id: String },
    #[error("certificate {certificate_id} is already approved")]
    AlreadyApproved { certificate_id: String },
    #[error("certificate {certificate_id} has status '{status}' and cannot be approved")]
    NotApprovable {
        certificate_id: String,
        status: String,
    },
    #[error("certificate service failed: {0}")]
    Backend(String),
}

impl CertificateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists { .. } => "certificate_exists",
            Self::ZeroTotal { .. } => "certificate_zero_total",
            Self::NotFound { .. } => "certificate_not_found",
            Self::AlreadyApproved { .. } => "certificate_already_approved",
            Self::NotApprovable { .. } => "certificate_not_approvable",
            Self::Backend(_) => "certificate_backend_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error("{} is not available in the current state", .action.as_str())]
    Refused { action: Action },
    #[error("role '{role}' may not {}", .action.as_str())]
    Forbidden { action: Action, role: String },
    #[error("could not save marks: {0}")]
    Persistence(String),
    #[error("student {student_id} is not enrolled in this batch")]
    UnknownStudentId { student_id: String },
}

impl WorkflowError {
    /// Stable machine code surfaced in the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Load(_) => "load_failed",
            Self::Ledger(LedgerError::UnknownStudent { .. }) => "unknown_student",
            Self::Ledger(LedgerError::UnknownColumn { .. }) => "unknown_column",
            Self::Ledger(LedgerError::InvalidDate { .. }) => "invalid_date",
            Self::Certificate(e) => e.code(),
            Self::Refused { .. } => "action_refused",
            Self::Forbidden { .. } => "forbidden",
            Self::Persistence(_) => "persistence_failed",
            Self::UnknownStudentId { .. } => "unknown_student",
        }
    }
}
