use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AppStatus, Application, DatabaseRecord, DeploymentLog, GitCredential};

pub mod memory;

pub use memory::{MemoryAppStore, ScriptedProvisioner};

/// Outcome of a provisioning run against the external database subsystem.
#[derive(Clone, Debug)]
pub struct ProvisionReport {
    pub ok: bool,
    pub log: String,
}

/// Record storage, owned by the excluded CRUD layer. The pipeline reads
/// application/credential/database records, updates deployment status, and
/// appends log rows; it never creates or edits records.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn get_application(&self, id: &str) -> anyhow::Result<Option<Application>>;

    async fn get_credential(&self, id: &str) -> anyhow::Result<Option<GitCredential>>;

    async fn get_database(&self, id: &str) -> anyhow::Result<Option<DatabaseRecord>>;

    async fn update_application_status(
        &self,
        id: &str,
        status: AppStatus,
        last_deployment: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Append-only; one row per deployment attempt.
    async fn append_deployment_log(&self, app_id: &str, content: &str) -> anyhow::Result<()>;

    async fn list_deployment_logs(&self, app_id: &str) -> anyhow::Result<Vec<DeploymentLog>>;
}

/// Database provisioning, owned by the excluded backup/restore subsystem.
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    async fn test_connection(&self, database: &DatabaseRecord) -> anyhow::Result<bool>;

    /// Create database + user + grants.
    async fn provision(&self, database: &DatabaseRecord) -> anyhow::Result<ProvisionReport>;
}
