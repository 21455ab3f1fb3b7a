use crate::certificates::CertificateRecord;
use crate::config::CertificateSetup;
use crate::db;
use crate::ledger::{LanguageColumn, StudentMarksRecord};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReply<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiReply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        if !self.success {
            return Err(self
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "request failed".to_string()));
        }
        self.data
            .ok_or_else(|| "response carried no payload".to_string())
    }
}

impl<T> From<anyhow::Result<T>> for ApiReply<T> {
    fn from(r: anyhow::Result<T>) -> Self {
        match r {
            Ok(v) => Self::ok(v),
            Err(e) => Self::failed(format!("{e:#}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireColumn {
    pub key: String,
    pub label: String,
    pub max_marks: u32,
}

impl From<&LanguageColumn> for WireColumn {
    fn from(c: &LanguageColumn) -> Self {
        Self {
            key: c.key.as_str().to_string(),
            label: c.label.to_string(),
            max_marks: c.max_marks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedStudent {
    pub student_id: String,
    pub student_name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scores: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub certificate: Option<CertificateRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksPayload {
    #[serde(default)]
    pub students: Option<Vec<FetchedStudent>>,
    #[serde(default)]
    pub course_language: Option<String>,
    #[serde(default)]
    pub language_columns: Vec<WireColumn>,
    #[serde(default)]
    pub assessment_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMarks {
    pub records: Vec<StudentMarksRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedCertificate {
    pub certificate_id: String,
    pub certificate_url: String,
}

/// `success == false` is treated like a transport failure.
pub trait AssessmentBackend {
    fn fetch_marks(&self, batch_id: &str) -> ApiReply<MarksPayload>;

    /// All records persist or none do.
    fn persist_marks(
        &self,
        batch_id: &str,
        records: &[StudentMarksRecord],
        assessment_date: Option<NaiveDate>,
    ) -> ApiReply<PersistedMarks>;

    fn submit_marks(&self, batch_id: &str) -> ApiReply<()>;

    fn render_certificate(
        &self,
        student_id: &str,
        batch_id: &str,
    ) -> ApiReply<RenderedCertificate>;

    fn approve_certificate(&self, certificate_id: &str) -> ApiReply<()>;

    fn delete_certificate(&self, certificate_id: &str) -> ApiReply<()>;
}

/// Backend over the sidecar's workspace database.
pub struct SqliteBackend<'a> {
    conn: &'a Connection,
    setup: CertificateSetup,
}

impl<'a> SqliteBackend<'a> {
    pub fn new(conn: &'a Connection, setup: CertificateSetup) -> Self {
        Self { conn, setup }
    }
}

fn logged<T>(op: &str, r: anyhow::Result<T>) -> ApiReply<T> {
    if let Err(e) = &r {
        warn!(target: "batchcertd::backend", op, error = %e, "backend call failed");
    }
    r.into()
}

impl AssessmentBackend for SqliteBackend<'_> {
    fn fetch_marks(&self, batch_id: &str) -> ApiReply<MarksPayload> {
        logged("fetch_marks", db::marks_fetch(self.conn, batch_id))
    }

    fn persist_marks(
        &self,
        batch_id: &str,
        records: &[StudentMarksRecord],
        assessment_date: Option<NaiveDate>,
    ) -> ApiReply<PersistedMarks> {
        logged(
            "persist_marks",
            db::marks_persist(self.conn, batch_id, records, assessment_date)
                .map(|records| PersistedMarks { records }),
        )
    }

    fn submit_marks(&self, batch_id: &str) -> ApiReply<()> {
        logged("submit_marks", db::marks_submit(self.conn, batch_id).map(|_| ()))
    }

    fn render_certificate(
        &self,
        student_id: &str,
        batch_id: &str,
    ) -> ApiReply<RenderedCertificate> {
        logged(
            "render_certificate",
            db::certificate_insert(self.conn, batch_id, student_id, &self.setup.base_url).map(
                |(certificate_id, certificate_url)| RenderedCertificate {
                    certificate_id,
                    certificate_url,
                },
            ),
        )
    }

    fn approve_certificate(&self, certificate_id: &str) -> ApiReply<()> {
        logged("approve_certificate", db::certificate_approve(self.conn, certificate_id))
    }

    fn delete_certificate(&self, certificate_id: &str) -> ApiReply<()> {
        logged("delete_certificate", db::certificate_delete(self.conn, certificate_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falsy_success_is_an_error_even_with_payload() {
        let reply: ApiReply<RenderedCertificate> = serde_json::from_value(json!({
            "success": false,
            "data": { "certificateId": "c1", "certificateUrl": "https://x/c1.pdf" }
        }))
        .expect("decode");
        assert_eq!(reply.into_result(), Err("request failed".to_string()));
    }

    #[test]
    fn success_without_payload_is_an_error() {
        let reply: ApiReply<MarksPayload> =
            serde_json::from_value(json!({ "success": true })).expect("decode");
        assert!(reply.into_result().is_err());
    }

    #[test]
    fn message_is_surfaced_on_failure() {
        let reply: ApiReply<()> = ApiReply::failed("renderer offline");
        assert_eq!(reply.into_result(), Err("renderer offline".to_string()));
    }

    #[test]
    fn marks_payload_decodes_wire_shape() {
        let payload: MarksPayload = serde_json::from_value(json!({
            "students": [{
                "studentId": "s1",
                "studentName": "Mia",
                "status": "submitted",
                "scores": { "lesen": 20, "hoeren": "18" }
            }],
            "courseLanguage": "German",
            "languageColumns": [{ "key": "lesen", "label": "Lesen", "maxMarks": 25 }],
            "assessmentDate": "2026-02-01"
        }))
        .expect("decode");
        let students = payload.students.expect("students");
        assert_eq!(students[0].scores.len(), 2);
        assert_eq!(payload.language_columns[0].max_marks, 25);
    }
}
