use crate::backend::{AssessmentBackend, FetchedStudent};
use crate::batch::Language;
use crate::certificates::CertificateRecord;
use crate::error::{LedgerError, LoadError};
use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies one scored skill of a language assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnKey {
    Lesen,
    Hoeren,
    Schreiben,
    Sprechen,
    ComprehensionOrale,
    ComprehensionEcrite,
    ProductionEcrite,
    ProductionOrale,
    LanguageKnowledge,
    Reading,
    Listening,
}

impl ColumnKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lesen => "lesen",
            Self::Hoeren => "hoeren",
            Self::Schreiben => "schreiben",
            Self::Sprechen => "sprechen",
            Self::ComprehensionOrale => "comprehension_orale",
            Self::ComprehensionEcrite => "comprehension_ecrite",
            Self::ProductionEcrite => "production_ecrite",
            Self::ProductionOrale => "production_orale",
            Self::LanguageKnowledge => "language_knowledge",
            Self::Reading => "reading",
            Self::Listening => "listening",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = match raw.trim() {
            "lesen" => Self::Lesen,
            "hoeren" => Self::Hoeren,
            "schreiben" => Self::Schreiben,
            "sprechen" => Self::Sprechen,
            "comprehension_orale" => Self::ComprehensionOrale,
            "comprehension_ecrite" => Self::ComprehensionEcrite,
            "production_ecrite" => Self::ProductionEcrite,
            "production_orale" => Self::ProductionOrale,
            "language_knowledge" => Self::LanguageKnowledge,
            "reading" => Self::Reading,
            "listening" => Self::Listening,
            _ => return None,
        };
        Some(key)
    }
}

impl Serialize for ColumnKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageColumn {
    pub key: ColumnKey,
    pub label: &'static str,
    pub max_marks: u32,
}

const GERMAN_COLUMNS: [LanguageColumn; 4] = [
    LanguageColumn { key: ColumnKey::Lesen, label: "Lesen", max_marks: 25 },
    LanguageColumn { key: ColumnKey::Hoeren, label: "Hören", max_marks: 25 },
    LanguageColumn { key: ColumnKey::Schreiben, label: "Schreiben", max_marks: 25 },
    LanguageColumn { key: ColumnKey::Sprechen, label: "Sprechen", max_marks: 25 },
];

const FRENCH_COLUMNS: [LanguageColumn; 4] = [
    LanguageColumn {
        key: ColumnKey::ComprehensionOrale,
        label: "Compréhension orale",
        max_marks: 25,
    },
    LanguageColumn {
        key: ColumnKey::ComprehensionEcrite,
        label: "Compréhension écrite",
        max_marks: 25,
    },
    LanguageColumn { key: ColumnKey::ProductionEcrite, label: "Production écrite", max_marks: 25 },
    LanguageColumn { key: ColumnKey::ProductionOrale, label: "Production orale", max_marks: 25 },
];

const JAPANESE_COLUMNS: [LanguageColumn; 3] = [
    LanguageColumn {
        key: ColumnKey::LanguageKnowledge,
        label: "Language Knowledge",
        max_marks: 60,
    },
    LanguageColumn { key: ColumnKey::Reading, label: "Reading", max_marks: 60 },
    LanguageColumn { key: ColumnKey::Listening, label: "Listening", max_marks: 60 },
];

pub fn columns_for(language: Language) -> &'static [LanguageColumn] {
    match language {
        Language::German => &GERMAN_COLUMNS,
        Language::French => &FRENCH_COLUMNS,
        Language::Japanese => &JAPANESE_COLUMNS,
        Language::Unspecified => &[],
    }
}

pub fn max_total_for(language: Language) -> u64 {
    columns_for(language)
        .iter()
        .map(|c| u64::from(c.max_marks))
        .sum()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GermanScores {
    pub lesen: u32,
    pub hoeren: u32,
    pub schreiben: u32,
    pub sprechen: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrenchScores {
    pub comprehension_orale: u32,
    pub comprehension_ecrite: u32,
    pub production_ecrite: u32,
    pub production_orale: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JapaneseScores {
    pub language_knowledge: u32,
    pub reading: u32,
    pub listening: u32,
}

/// Per-student scores, shaped by the batch language once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageScores {
    German(GermanScores),
    French(FrenchScores),
    Japanese(JapaneseScores),
    Unspecified,
}

impl LanguageScores {
    pub fn empty(language: Language) -> Self {
        match language {
            Language::German => Self::German(GermanScores::default()),
            Language::French => Self::French(FrenchScores::default()),
            Language::Japanese => Self::Japanese(JapaneseScores::default()),
            Language::Unspecified => Self::Unspecified,
        }
    }

    pub fn language(&self) -> Language {
        match self {
            Self::German(_) => Language::German,
            Self::French(_) => Language::French,
            Self::Japanese(_) => Language::Japanese,
            Self::Unspecified => Language::Unspecified,
        }
    }

    fn slot_mut(&mut self, key: ColumnKey) -> Option<&mut u32> {
        match (self, key) {
            (Self::German(s), ColumnKey::Lesen) => Some(&mut s.lesen),
            (Self::German(s), ColumnKey::Hoeren) => Some(&mut s.hoeren),
            (Self::German(s), ColumnKey::Schreiben) => Some(&mut s.schreiben),
            (Self::German(s), ColumnKey::Sprechen) => Some(&mut s.sprechen),
            (Self::French(s), ColumnKey::ComprehensionOrale) => Some(&mut s.comprehension_orale),
            (Self::French(s), ColumnKey::ComprehensionEcrite) => Some(&mut s.comprehension_ecrite),
            (Self::French(s), ColumnKey::ProductionEcrite) => Some(&mut s.production_ecrite),
            (Self::French(s), ColumnKey::ProductionOrale) => Some(&mut s.production_orale),
            (Self::Japanese(s), ColumnKey::LanguageKnowledge) => Some(&mut s.language_knowledge),
            (Self::Japanese(s), ColumnKey::Reading) => Some(&mut s.reading),
            (Self::Japanese(s), ColumnKey::Listening) => Some(&mut s.listening),
            _ => None,
        }
    }

    pub fn get(&self, key: ColumnKey) -> Option<u32> {
        let mut copy = *self;
        copy.slot_mut(key).map(|v| *v)
    }

    /// Returns false when `key` is not a column of this language.
    pub fn set(&mut self, key: ColumnKey, value: u32) -> bool {
        match self.slot_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn values(&self) -> Vec<(ColumnKey, u32)> {
        columns_for(self.language())
            .iter()
            .filter_map(|c| self.get(c.key).map(|v| (c.key, v)))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.values().iter().map(|(_, v)| u64::from(*v)).sum()
    }

    /// Builds scores from a loosely typed backend map. Missing or foreign
    /// keys are ignored; values go through the same coercion as user input.
    pub fn from_wire(language: Language, raw: &BTreeMap<String, serde_json::Value>) -> Self {
        let mut scores = Self::empty(language);
        for column in columns_for(language) {
            if let Some(v) = raw.get(column.key.as_str()) {
                scores.set(column.key, coerce_score(v));
            }
        }
        scores
    }
}

impl Serialize for LanguageScores {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let values = self.values();
        let mut map = serializer.serialize_map(Some(values.len()))?;
        for (key, value) in values {
            map.serialize_entry(key.as_str(), &value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Draft,
    Submitted,
    Approved,
    Other(String),
}

impl RecordStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "draft" => Self::Draft,
            "submitted" => Self::Submitted,
            "approved" => Self::Approved,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted | Self::Approved)
    }
}

impl Serialize for RecordStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMarksRecord {
    pub student_id: String,
    pub student_name: String,
    pub scores: LanguageScores,
    pub status: RecordStatus,
}

impl StudentMarksRecord {
    pub fn from_fetched(language: Language, s: &FetchedStudent) -> Self {
        Self {
            student_id: s.student_id.clone(),
            student_name: s.student_name.clone(),
            scores: LanguageScores::from_wire(language, &s.scores),
            status: RecordStatus::parse(s.status.as_deref().unwrap_or("draft")),
        }
    }
}

pub fn total_for(record: &StudentMarksRecord) -> u64 {
    record.scores.total()
}

/// Coerces UI input into a non-negative score. Non-numeric input is 0.
///
/// Not clamped to `max_marks`; the store range-checks on persist.
pub fn coerce_score(raw: &serde_json::Value) -> u32 {
    match raw {
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                u32::try_from(v).unwrap_or(u32::MAX)
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() && f > 0.0 {
                    f.trunc() as u32
                } else {
                    0
                }
            } else {
                0
            }
        }
        serde_json::Value::String(s) => parse_leading_int(s),
        _ => 0,
    }
}

fn parse_leading_int(s: &str) -> u32 {
    let t = s.trim_start();
    let (negative, rest) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if negative || digits.is_empty() {
        return 0;
    }
    digits.parse::<u64>().map_or(u32::MAX, |v| u32::try_from(v).unwrap_or(u32::MAX))
}

/// One batch's assessment marks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarksLedger {
    pub batch_id: String,
    pub language: Language,
    pub assessment_date: Option<NaiveDate>,
    pub records: Vec<StudentMarksRecord>,
}

pub struct LoadedLedger {
    pub ledger: MarksLedger,
    pub certificates: Vec<CertificateRecord>,
}

impl MarksLedger {
    pub fn empty(batch_id: &str, language: Language) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            language,
            assessment_date: None,
            records: Vec::new(),
        }
    }

    pub fn load(
        backend: &dyn AssessmentBackend,
        batch_id: &str,
    ) -> Result<LoadedLedger, LoadError> {
        let payload = backend
            .fetch_marks(batch_id)
            .into_result()
            .map_err(LoadError::Backend)?;
        let Some(students) = payload.students else {
            return Err(LoadError::MissingStudents {
                batch_id: batch_id.to_string(),
            });
        };
        let language = Language::parse(payload.course_language.as_deref().unwrap_or(""));
        let assessment_date = payload
            .assessment_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

        let records = students
            .iter()
            .map(|s| StudentMarksRecord::from_fetched(language, s))
            .collect();
        let certificates = students
            .iter()
            .filter_map(|s| s.certificate.clone())
            .collect();

        Ok(LoadedLedger {
            ledger: Self {
                batch_id: batch_id.to_string(),
                language,
                assessment_date,
                records,
            },
            certificates,
        })
    }

    pub fn columns(&self) -> &'static [LanguageColumn] {
        columns_for(self.language)
    }

    pub fn max_total(&self) -> u64 {
        max_total_for(self.language)
    }

    pub fn find(&self, student_id: &str) -> Option<&StudentMarksRecord> {
        self.records.iter().find(|r| r.student_id == student_id)
    }

    pub fn find_mut(&mut self, student_id: &str) -> Option<&mut StudentMarksRecord> {
        self.records.iter_mut().find(|r| r.student_id == student_id)
    }

    pub fn all_submitted(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.status.is_submitted())
    }

    /// Writes one coerced score and returns the stored value.
    pub fn set_score(
        &mut self,
        student_index: usize,
        column_key: &str,
        raw_value: &serde_json::Value,
    ) -> Result<u32, LedgerError> {
        let language = self.language;
        let key = ColumnKey::parse(column_key)
            .filter(|k| columns_for(language).iter().any(|c| c.key == *k))
            .ok_or_else(|| LedgerError::UnknownColumn {
                key: column_key.to_string(),
                language,
            })?;
        let record = self
            .records
            .get_mut(student_index)
            .ok_or(LedgerError::UnknownStudent {
                index: student_index,
            })?;
        let value = coerce_score(raw_value);
        record.scores.set(key, value);
        Ok(value)
    }

    pub fn set_assessment_date(&mut self, raw: Option<&str>) -> Result<(), LedgerError> {
        self.assessment_date = match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(s) => Some(
                NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| LedgerError::InvalidDate {
                    raw: s.to_string(),
                })?,
            ),
        };
        Ok(())
    }
}
