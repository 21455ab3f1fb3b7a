use serde::{Deserialize, Serialize};

/// Platform role of the acting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Admin,
    CenterAdmin,
    Trainer,
    Other(String),
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "super_admin" | "superadmin" => Self::Admin,
            "center_admin" | "centeradmin" | "center" => Self::CenterAdmin,
            "trainer" | "teacher" | "instructor" => Self::Trainer,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::CenterAdmin => "center_admin",
            Self::Trainer => "trainer",
            Self::Other(raw) => raw,
        }
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Every user-triggered transition of the assessment workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    EditMarks,
    SaveMarks,
    SubmitMarks,
    GenerateCertificate,
    ApproveCertificate,
    DeleteCertificate,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EditMarks => "edit marks",
            Self::SaveMarks => "save marks",
            Self::SubmitMarks => "submit marks",
            Self::GenerateCertificate => "generate certificates",
            Self::ApproveCertificate => "approve certificates",
            Self::DeleteCertificate => "delete certificates",
        }
    }
}

/// Who is driving the workflow. Passed in explicitly; never read from
/// process-global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: Role,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            role,
        }
    }

    pub fn may(&self, action: Action) -> bool {
        match action {
            Action::EditMarks | Action::SaveMarks | Action::SubmitMarks => matches!(
                self.role,
                Role::Admin | Role::CenterAdmin | Role::Trainer
            ),
            Action::GenerateCertificate | Action::DeleteCertificate => {
                matches!(self.role, Role::Admin | Role::CenterAdmin)
            }
            Action::ApproveCertificate => self.role == Role::Admin,
        }
    }
}
