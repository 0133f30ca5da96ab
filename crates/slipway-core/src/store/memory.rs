use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AppStatus, Application, DatabaseRecord, DeploymentLog, GitCredential};
use crate::store::{AppStore, DatabaseProvisioner, ProvisionReport};

#[derive(Debug, Default)]
struct Records {
    applications: HashMap<String, Application>,
    credentials: HashMap<String, GitCredential>,
    databases: HashMap<String, DatabaseRecord>,
    logs: Vec<DeploymentLog>,
}

/// In-memory [`AppStore`] used by tests and the one-shot CLI.
#[derive(Debug, Default)]
pub struct MemoryAppStore {
    records: Mutex<Records>,
}

impl MemoryAppStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))
    }

    pub fn insert_application(&self, application: Application) -> anyhow::Result<()> {
        let mut records = self.locked()?;
        records
            .applications
            .insert(application.id.clone(), application);
        Ok(())
    }

    pub fn insert_credential(&self, credential: GitCredential) -> anyhow::Result<()> {
        let mut records = self.locked()?;
        records.credentials.insert(credential.id.clone(), credential);
        Ok(())
    }

    pub fn insert_database(&self, database: DatabaseRecord) -> anyhow::Result<()> {
        let mut records = self.locked()?;
        records.databases.insert(database.id.clone(), database);
        Ok(())
    }
}

#[async_trait]
impl AppStore for MemoryAppStore {
    async fn get_application(&self, id: &str) -> anyhow::Result<Option<Application>> {
        Ok(self.locked()?.applications.get(id).cloned())
    }

    async fn get_credential(&self, id: &str) -> anyhow::Result<Option<GitCredential>> {
        Ok(self.locked()?.credentials.get(id).cloned())
    }

    async fn get_database(&self, id: &str) -> anyhow::Result<Option<DatabaseRecord>> {
        Ok(self.locked()?.databases.get(id).cloned())
    }

    async fn update_application_status(
        &self,
        id: &str,
        status: AppStatus,
        last_deployment: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut records = self.locked()?;

        let application = records
            .applications
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("application {} not found", id))?;

        application.status = status;
        application.last_deployment = Some(last_deployment);

        Ok(())
    }

    async fn append_deployment_log(&self, app_id: &str, content: &str) -> anyhow::Result<()> {
        let mut records = self.locked()?;

        records.logs.push(DeploymentLog {
            app_id: app_id.to_owned(),
            content: content.to_owned(),
            recorded_at: Utc::now(),
        });

        Ok(())
    }

    async fn list_deployment_logs(&self, app_id: &str) -> anyhow::Result<Vec<DeploymentLog>> {
        Ok(self
            .locked()?
            .logs
            .iter()
            .filter(|log| log.app_id == app_id)
            .cloned()
            .collect())
    }
}

/// Provisioner with scripted outcomes, standing in for the external
/// database subsystem.
#[derive(Debug)]
pub struct ScriptedProvisioner {
    pub connection_ok: bool,
    pub provision_ok: bool,
    pub provision_log: String,
}

impl ScriptedProvisioner {
    /// Connectivity checks succeed immediately.
    pub fn healthy() -> Self {
        Self {
            connection_ok: true,
            provision_ok: true,
            provision_log: String::new(),
        }
    }

    /// Connectivity fails and provisioning recovers it.
    pub fn recovering(log: &str) -> Self {
        Self {
            connection_ok: false,
            provision_ok: true,
            provision_log: log.to_owned(),
        }
    }

    /// No provisioning backend at all; connectivity and setup both fail.
    pub fn unavailable() -> Self {
        Self {
            connection_ok: false,
            provision_ok: false,
            provision_log: "no provisioning backend configured\n".to_owned(),
        }
    }
}

#[async_trait]
impl DatabaseProvisioner for ScriptedProvisioner {
    async fn test_connection(&self, _database: &DatabaseRecord) -> anyhow::Result<bool> {
        Ok(self.connection_ok)
    }

    async fn provision(&self, database: &DatabaseRecord) -> anyhow::Result<ProvisionReport> {
        let mut log = self.provision_log.clone();
        if self.provision_ok {
            log.push_str(&format!(
                "created database {} and user {}\n",
                database.db_name, database.username
            ));
        }

        Ok(ProvisionReport {
            ok: self.provision_ok,
            log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseKind;

    fn application_fixture(id: &str) -> Application {
        Application {
            id: id.to_owned(),
            name: "demo".to_owned(),
            repository: "https://example.com/demo.git".to_owned(),
            hostname: "demo.example.com".to_owned(),
            database_id: None,
            git_credential_id: None,
            custom_git_token: None,
            config_maps: vec![],
            status: AppStatus::Inactive,
            last_deployment: None,
        }
    }

    #[tokio::test]
    async fn status_update_stamps_last_deployment() {
        let store = MemoryAppStore::new();
        store.insert_application(application_fixture("app-1")).unwrap();

        let now = Utc::now();
        store
            .update_application_status("app-1", AppStatus::Active, now)
            .await
            .unwrap();

        let fetched = store.get_application("app-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, AppStatus::Active);
        assert_eq!(fetched.last_deployment, Some(now));
    }

    #[tokio::test]
    async fn logs_are_append_only_and_scoped_per_app() {
        let store = MemoryAppStore::new();

        store.append_deployment_log("app-1", "first attempt").await.unwrap();
        store.append_deployment_log("app-2", "other app").await.unwrap();
        store.append_deployment_log("app-1", "second attempt").await.unwrap();

        let logs = store.list_deployment_logs("app-1").await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].content, "first attempt");
        assert_eq!(logs[1].content, "second attempt");
    }

    #[tokio::test]
    async fn scripted_provisioner_reports_outcomes() {
        let database = DatabaseRecord {
            id: "db-1".to_owned(),
            name: "demo db".to_owned(),
            kind: DatabaseKind::Postgres,
            host: "db1".to_owned(),
            port: 5432,
            db_name: "app_db".to_owned(),
            username: "app_user".to_owned(),
            password: "irrelevant".to_owned(),
            status: "active".to_owned(),
        };

        let provisioner = ScriptedProvisioner::recovering("retrying setup\n");
        assert!(!provisioner.test_connection(&database).await.unwrap());

        let report = provisioner.provision(&database).await.unwrap();
        assert!(report.ok);
        assert!(report.log.contains("retrying setup"));
        assert!(report.log.contains("created database app_db"));
    }
}
