use serde::{Deserialize, Serialize};
use std::fmt;

/// Instructional language of a batch. Drives the assessment column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    German,
    French,
    Japanese,
    Unspecified,
}

impl Language {
    /// Lenient parse used for stored/wire values; anything unrecognised is
    /// `Unspecified` (which yields an empty column set).
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "german" | "de" => Self::German,
            "french" | "fr" => Self::French,
            "japanese" | "ja" | "jp" => Self::Japanese,
            _ => Self::Unspecified,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::German => "german",
            Self::French => "french",
            Self::Japanese => "japanese",
            Self::Unspecified => "unspecified",
        }
    }
}

/// Lifecycle status of a batch as reported by the hosting platform.
///
/// Statuses this crate does not know about are carried verbatim in `Other`
/// so that display code can fall back to the raw string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Approved,
    Started,
    Completed,
    Cancelled,
    Other(String),
}

impl BatchStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "started" => Self::Started,
            "completed" => Self::Completed,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Other(raw) => raw,
        }
    }

    /// Human label shown in history/detail views.
    pub fn label(&self) -> &str {
        match self {
            Self::Pending => "Pending Approval",
            Self::Approved => "Approved",
            Self::Started => "In Progress",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BatchStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BatchStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Read-only batch context handed to the assessment workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub language: Language,
    pub status: BatchStatus,
}

impl Batch {
    /// A completed batch is permanently locked for marks editing.
    pub fn is_locked(&self) -> bool {
        self.status == BatchStatus::Completed
    }
}
