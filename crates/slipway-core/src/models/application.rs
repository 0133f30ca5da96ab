use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Inactive,
    Active,
    Error,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppStatus::Inactive => write!(f, "inactive"),
            AppStatus::Active => write!(f, "active"),
            AppStatus::Error => write!(f, "error"),
        }
    }
}

/// One templated configuration file: `path` is relative to the application's
/// working directory and may contain subdirectories.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConfigMapEntry {
    pub path: String,
    pub template: String,
}

/// A registered application. The working directory is intentionally not a
/// field: it is always recomputed from `hostname` through
/// [`crate::Settings::directory_for_hostname`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub repository: String,
    pub hostname: String,

    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(default)]
    pub git_credential_id: Option<String>,
    /// Per-app override token, encrypted at rest. Beats `git_credential_id`.
    #[serde(default)]
    pub custom_git_token: Option<String>,

    /// Insertion order is render order.
    #[serde(default)]
    pub config_maps: Vec<ConfigMapEntry>,

    #[serde(default)]
    pub status: AppStatus,
    #[serde(default)]
    pub last_deployment: Option<DateTime<Utc>>,
}

impl Application {
    /// Required fields for a deployment attempt to make sense at all.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("name", &self.name),
            ("repository", &self.repository),
            ("hostname", &self.hostname),
        ] {
            if value.trim().is_empty() {
                return Err(format!("application field '{}' is empty", field));
            }
        }

        Ok(())
    }
}
