use crate::backend::AssessmentBackend;
use crate::error::CertificateError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    Pending,
    Completed,
    /// Unrecognised stored value, kept verbatim. Never approvable.
    Other(String),
}

impl CertificateStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "completed" | "approved" => Self::Completed,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Other(raw) => raw,
        }
    }
}

impl Serialize for CertificateStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CertificateStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub certificate_id: String,
    pub student_id: String,
    pub url: String,
    pub status: CertificateStatus,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateFailure {
    pub student_id: String,
    pub code: String,
    pub message: String,
}

/// Outcome of a "generate all" pass. Not transactional: successes stay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAllReport {
    pub requested: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<GenerateFailure>,
}

impl GenerateAllReport {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }
}

/// Certificates of one batch, keyed by student.
#[derive(Debug, Clone, Default)]
pub struct CertificateRegistry {
    by_student: BTreeMap<String, CertificateRecord>,
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = CertificateRecord>) -> Self {
        let mut registry = Self::new();
        for record in records {
            registry.by_student.insert(record.student_id.clone(), record);
        }
        registry
    }

    pub fn get(&self, student_id: &str) -> Option<&CertificateRecord> {
        self.by_student.get(student_id)
    }

    pub fn find_by_id(&self, certificate_id: &str) -> Option<&CertificateRecord> {
        self.by_student
            .values()
            .find(|c| c.certificate_id == certificate_id)
    }

    pub fn len(&self) -> usize {
        self.by_student.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_student.is_empty()
    }

    /// Renders and records a pending certificate for one student.
    pub fn generate(
        &mut self,
        backend: &dyn AssessmentBackend,
        batch_id: &str,
        student_id: &str,
        total: u64,
    ) -> Result<CertificateRecord, CertificateError> {
        if self.by_student.contains_key(student_id) {
            return Err(CertificateError::AlreadyExists {
                student_id: student_id.to_string(),
            });
        }
        if total == 0 {
            return Err(CertificateError::ZeroTotal {
                student_id: student_id.to_string(),
            });
        }

        let rendered = backend
            .render_certificate(student_id, batch_id)
            .into_result()
            .map_err(CertificateError::Backend)?;
        let record = CertificateRecord {
            certificate_id: rendered.certificate_id,
            student_id: student_id.to_string(),
            url: rendered.certificate_url,
            status: CertificateStatus::Pending,
            generated_at: Utc::now().to_rfc3339(),
        };
        info!(
            target: "batchcertd::certificates",
            batch_id,
            student_id,
            certificate_id = %record.certificate_id,
            "certificate generated"
        );
        self.by_student
            .insert(student_id.to_string(), record.clone());
        Ok(record)
    }

    /// Pending to Completed. Approving twice, or an unknown status, is an error.
    pub fn approve(
        &mut self,
        backend: &dyn AssessmentBackend,
        certificate_id: &str,
    ) -> Result<CertificateRecord, CertificateError> {
        let student_id = self.student_for(certificate_id)?;
        if let Some(existing) = self.by_student.get(&student_id) {
            match &existing.status {
                CertificateStatus::Pending => {}
                CertificateStatus::Completed => {
                    return Err(CertificateError::AlreadyApproved {
                        certificate_id: certificate_id.to_string(),
                    });
                }
                CertificateStatus::Other(status) => {
                    return Err(CertificateError::NotApprovable {
                        certificate_id: certificate_id.to_string(),
                        status: status.clone(),
                    });
                }
            }
        }

        backend
            .approve_certificate(certificate_id)
            .into_result()
            .map_err(CertificateError::Backend)?;

        let record = self
            .by_student
            .get_mut(&student_id)
            .ok_or_else(|| CertificateError::NotFound {
                certificate_id: certificate_id.to_string(),
            })?;
        record.status = CertificateStatus::Completed;
        info!(target: "batchcertd::certificates", certificate_id, "certificate approved");
        Ok(record.clone())
    }

    /// Removes a certificate in any status, allowing one new `generate`.
    pub fn delete(
        &mut self,
        backend: &dyn AssessmentBackend,
        certificate_id: &str,
    ) -> Result<CertificateRecord, CertificateError> {
        let student_id = self.student_for(certificate_id)?;
        backend
            .delete_certificate(certificate_id)
            .into_result()
            .map_err(CertificateError::Backend)?;
        let removed = self
            .by_student
            .remove(&student_id)
            .ok_or_else(|| CertificateError::NotFound {
                certificate_id: certificate_id.to_string(),
            })?;
        info!(target: "batchcertd::certificates", certificate_id, "certificate deleted");
        Ok(removed)
    }

    /// Generates sequentially for `(student_id, total)` candidates, carrying
    /// on past individual failures.
    pub fn generate_all(
        &mut self,
        backend: &dyn AssessmentBackend,
        batch_id: &str,
        candidates: &[(String, u64)],
    ) -> GenerateAllReport {
        let mut report = GenerateAllReport {
            requested: candidates.len(),
            ..GenerateAllReport::default()
        };
        for (student_id, total) in candidates {
            match self.generate(backend, batch_id, student_id, *total) {
                Ok(_) => report.succeeded.push(student_id.clone()),
                Err(e) => {
                    debug!(
                        target: "batchcertd::certificates",
                        %student_id,
                        error = %e,
                        "skipped in generate-all"
                    );
                    report.failed.push(GenerateFailure {
                        student_id: student_id.clone(),
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        if !report.failed.is_empty() {
            warn!(
                target: "batchcertd::certificates",
                batch_id,
                succeeded = report.success_count(),
                failed = report.failed.len(),
                "generate-all finished with failures"
            );
        }
        report
    }

    fn student_for(&self, certificate_id: &str) -> Result<String, CertificateError> {
        self.find_by_id(certificate_id)
            .map(|c| c.student_id.clone())
            .ok_or_else(|| CertificateError::NotFound {
                certificate_id: certificate_id.to_string(),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeBackend;
    use super::*;

    #[test]
    fn second_generate_without_delete_is_rejected() {
        let backend = FakeBackend::default();
        let mut registry = CertificateRegistry::new();
        registry.generate(&backend, "b1", "s1", 70).expect("first");
        let e = registry.generate(&backend, "b1", "s1", 70).expect_err("second");
        assert_eq!(
            e,
            CertificateError::AlreadyExists {
                student_id: "s1".into()
            }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.renders.get(), 1);
    }

    #[test]
    fn zero_total_never_reaches_renderer() {
        let backend = FakeBackend::default();
        let mut registry = CertificateRegistry::new();
        let e = registry.generate(&backend, "b1", "s3", 0).expect_err("zero");
        assert_eq!(e.code(), "certificate_zero_total");
        assert!(registry.is_empty());
        assert_eq!(backend.renders.get(), 0);
    }

    #[test]
    fn approve_is_not_idempotent() {
        let backend = FakeBackend::default();
        let mut registry = CertificateRegistry::new();
        let cert = registry.generate(&backend, "b1", "s1", 50).expect("generate");
        assert_eq!(cert.status, CertificateStatus::Pending);

        let approved = registry.approve(&backend, &cert.certificate_id).expect("approve");
        assert_eq!(approved.status, CertificateStatus::Completed);
        let e = registry
            .approve(&backend, &cert.certificate_id)
            .expect_err("approve again");
        assert!(matches!(e, CertificateError::AlreadyApproved { .. }));
    }

    #[test]
    fn failed_approval_leaves_pending() {
        let backend = FakeBackend::default();
        let mut registry = CertificateRegistry::new();
        let cert = registry.generate(&backend, "b1", "s1", 50).expect("generate");
        backend.fail_approve.set(true);
        assert!(registry.approve(&backend, &cert.certificate_id).is_err());
        assert_eq!(
            registry.get("s1").map(|c| c.status.clone()),
            Some(CertificateStatus::Pending)
        );
    }

    #[test]
    fn unknown_stored_status_is_not_approvable() {
        let backend = FakeBackend::default();
        backend.fail_approve.set(true);
        let mut registry = CertificateRegistry::from_records([CertificateRecord {
            certificate_id: "c1".to_string(),
            student_id: "s1".to_string(),
            url: "https://certs.example/c1".to_string(),
            status: CertificateStatus::parse("revoked"),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
        }]);
        assert_eq!(registry.get("s1").map(|c| c.status.as_str()), Some("revoked"));

        let e = registry.approve(&backend, "c1").expect_err("revoked");
        assert_eq!(e.code(), "certificate_not_approvable");
        assert_eq!(
            registry.get("s1").map(|c| c.status.clone()),
            Some(CertificateStatus::Other("revoked".to_string()))
        );
    }

    #[test]
    fn delete_allows_exactly_one_regenerate() {
        let backend = FakeBackend::default();
        let mut registry = CertificateRegistry::new();
        let cert = registry.generate(&backend, "b1", "s1", 50).expect("generate");
        registry.approve(&backend, &cert.certificate_id).expect("approve");
        registry.delete(&backend, &cert.certificate_id).expect("delete completed");
        assert!(registry.get("s1").is_none());

        let again = registry.generate(&backend, "b1", "s1", 50).expect("regenerate");
        assert_ne!(again.certificate_id, cert.certificate_id);
        assert!(registry.generate(&backend, "b1", "s1", 50).is_err());
        assert!(matches!(
            registry.delete(&backend, &cert.certificate_id),
            Err(CertificateError::NotFound { .. })
        ));
    }

    #[test]
    fn generate_all_continues_past_failures() {
        let backend = FakeBackend::default();
        backend.fail_render_for.borrow_mut().insert("s2".to_string());
        let mut registry = CertificateRegistry::new();
        registry.generate(&backend, "b1", "s4", 10).expect("pre-existing");

        let candidates = vec![
            ("s1".to_string(), 80),
            ("s2".to_string(), 60),
            ("s3".to_string(), 0),
            ("s4".to_string(), 10),
            ("s5".to_string(), 35),
        ];
        let report = registry.generate_all(&backend, "b1", &candidates);
        assert_eq!(report.requested, 5);
        assert_eq!(report.succeeded, vec!["s1".to_string(), "s5".to_string()]);
        let failed: Vec<(&str, &str)> = report
            .failed
            .iter()
            .map(|f| (f.student_id.as_str(), f.code.as_str()))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("s2", "certificate_backend_failed"),
                ("s3", "certificate_zero_total"),
                ("s4", "certificate_exists"),
            ]
        );
        assert_eq!(registry.len(), 3);
    }
}
