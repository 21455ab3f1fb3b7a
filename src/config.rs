use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const CERTIFICATES_KEY: &str = "setup.certificates";

pub const DEFAULT_CERTIFICATE_BASE_URL: &str = "https://certificates.local";
pub const DEFAULT_GENERATE_ALL_LIMIT: u64 = 500;

/// Workspace-level certificate settings, defaults merged with saved patches.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateSetup {
    pub base_url: String,
    pub generate_all_limit: u64,
}

impl Default for CertificateSetup {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CERTIFICATE_BASE_URL.to_string(),
            generate_all_limit: DEFAULT_GENERATE_ALL_LIMIT,
        }
    }
}

impl CertificateSetup {
    pub fn to_json(&self) -> Value {
        json!({
            "baseUrl": self.base_url,
            "generateAllLimit": self.generate_all_limit,
        })
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut current = Self::default();
        if let Some(saved) = db::settings_get_json(conn, CERTIFICATES_KEY)? {
            if let Some(obj) = saved.as_object() {
                // Malformed historical values fall back to defaults.
                let _ = current.apply_patch(obj);
            }
        }
        Ok(current)
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, CERTIFICATES_KEY, &self.to_json())
    }

    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        for (k, v) in patch {
            match k.as_str() {
                "baseUrl" => {
                    let Some(s) = v.as_str().map(str::trim) else {
                        return Err("baseUrl must be a string".to_string());
                    };
                    if !(s.starts_with("https://") || s.starts_with("http://")) {
                        return Err("baseUrl must start with http:// or https://".to_string());
                    }
                    if s.len() > 300 {
                        return Err("baseUrl must be at most 300 characters".to_string());
                    }
                    self.base_url = s.trim_end_matches('/').to_string();
                }
                "generateAllLimit" => {
                    let Some(n) = v.as_u64() else {
                        return Err("generateAllLimit must be a positive integer".to_string());
                    };
                    if n == 0 || n > 5000 {
                        return Err("generateAllLimit must be between 1 and 5000".to_string());
                    }
                    self.generate_all_limit = n;
                }
                _ => return Err(format!("unknown certificates field: {}", k)),
            }
        }
        Ok(())
    }
}
