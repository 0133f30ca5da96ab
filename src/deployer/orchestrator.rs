use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;

use slipway_core::models::{AppStatus, Application, DatabaseRecord, EffectiveCredential};
use slipway_core::secrets::SecretCodec;
use slipway_core::store::{AppStore, DatabaseProvisioner};
use slipway_core::{DeployError, Settings};

use super::build::BuildDispatcher;
use super::credentials::{AuthContext, CredentialResolver};
use super::render::TemplateRenderer;
use super::sync::RepoSynchronizer;

/// Pipeline steps in execution order. `is_fatal` is the one place the
/// failure policy lives: a failing step either aborts the attempt or is
/// recorded and skipped over, never anything in between.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Step {
    DatabaseCheck,
    CredentialResolution,
    RepositorySync,
    ConfigRender,
    BuildDispatch,
}

impl Step {
    fn is_fatal(self) -> bool {
        matches!(self, Step::RepositorySync)
    }
}

/// What every caller gets back, success or not: `logs` always carries the
/// full step-by-step trace.
#[derive(Clone, Debug)]
pub struct DeploymentOutcome {
    pub success: bool,
    pub message: String,
    pub logs: String,
}

impl DeploymentOutcome {
    fn failure(message: impl Into<String>, logs: String) -> Self {
        Self {
            success: false,
            message: message.into(),
            logs,
        }
    }
}

/// Sequences credential resolution, repository synchronization, config
/// rendering and build dispatch for one application, with one durable log
/// row per attempt.
pub struct DeploymentOrchestrator {
    pub store: Arc<dyn AppStore>,
    pub provisioner: Arc<dyn DatabaseProvisioner>,
    pub settings: Arc<Settings>,

    codec: SecretCodec,
    // Two concurrent deployments of one application would race on its
    // working directory; attempts for the same app are serialized here.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DeploymentOrchestrator {
    pub fn new(
        store: Arc<dyn AppStore>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        settings: Settings,
    ) -> Self {
        let codec = SecretCodec::new(&settings.secret_passphrase);

        Self {
            store,
            provisioner,
            settings: Arc::new(settings),
            codec,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn app_lock(&self, app_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| {
            // A panicked holder left no state behind worth preserving.
            poisoned.into_inner()
        });

        Arc::clone(
            locks
                .entry(app_id.to_owned())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    #[tracing::instrument(skip(self))]
    pub async fn deploy(&self, app_id: &str) -> DeploymentOutcome {
        let app = match self.store.get_application(app_id).await {
            Ok(Some(app)) => app,
            Ok(None) => {
                return DeploymentOutcome::failure(
                    format!("application {} not found", app_id),
                    String::new(),
                )
            }
            Err(err) => {
                return DeploymentOutcome::failure(
                    format!("could not load application {}: {:#}", app_id, err),
                    String::new(),
                )
            }
        };

        let lock = self.app_lock(&app.id);
        let _serialized = lock.lock().await;

        let mut log = format!("Starting deployment for {}\n", app.name);

        let result = self.run_pipeline(&app, &mut log).await;

        let outcome = match result {
            Ok(()) => {
                if let Err(err) = self
                    .store
                    .update_application_status(&app.id, AppStatus::Active, Utc::now())
                    .await
                {
                    log.push_str(&format!("warning: could not update status: {:#}\n", err));
                }

                log.push_str("Deployment completed successfully\n");
                tracing::info!(app_id = %app.id, "deployment completed");

                DeploymentOutcome {
                    success: true,
                    message: "deployment completed successfully".to_owned(),
                    logs: String::new(),
                }
            }
            Err(err) => {
                // Status stays untouched on a fatal error.
                log.push_str(&format!("Error during deployment: {:#}\n", err));
                tracing::error!(app_id = %app.id, "deployment failed: {:#}", err);

                DeploymentOutcome::failure(format!("deployment failed: {:#}", err), String::new())
            }
        };

        // The single flush of the attempt's audit trail.
        if let Err(err) = self.store.append_deployment_log(&app.id, &log).await {
            tracing::error!(app_id = %app.id, "could not persist deployment log: {:#}", err);
        }

        DeploymentOutcome {
            logs: log,
            ..outcome
        }
    }

    async fn run_pipeline(&self, app: &Application, log: &mut String) -> anyhow::Result<()> {
        if let Err(message) = app.validate() {
            // Nothing sensible can run without the required fields.
            return Err(DeployError::Configuration(message).into());
        }

        let database = match self.step_database(app, log).await {
            Ok(database) => database,
            Err(err) => {
                self.absorb(Step::DatabaseCheck, err, log)?;
                None
            }
        };

        let credential = match self.step_credentials(app, log).await {
            Ok(credential) => credential,
            Err(err) => {
                self.absorb(Step::CredentialResolution, err, log)?;
                None
            }
        };

        if let Err(err) = self.step_sync(app, credential.as_ref(), log) {
            self.absorb(Step::RepositorySync, err, log)?;
        }

        if let Err(err) = self.step_render(app, database.as_ref(), log) {
            self.absorb(Step::ConfigRender, err, log)?;
        }

        if let Err(err) = self.step_build(app, log).await {
            self.absorb(Step::BuildDispatch, err, log)?;
        }

        Ok(())
    }

    /// Apply the policy table: fatal steps propagate, the rest are logged
    /// and the pipeline moves on.
    fn absorb(
        &self,
        step: Step,
        err: DeployError,
        log: &mut String,
    ) -> anyhow::Result<()> {
        if step.is_fatal() {
            return Err(err.into());
        }

        tracing::warn!(?step, "step failed, continuing: {}", err);
        log.push_str(&format!("warning: {}\n", err));

        Ok(())
    }

    /// Verify connectivity of the linked database, provisioning it on
    /// demand. The record is still handed to the renderer when setup fails;
    /// the deployment proceeds without a verified database.
    async fn step_database(
        &self,
        app: &Application,
        log: &mut String,
    ) -> Result<Option<DatabaseRecord>, DeployError> {
        let Some(database_id) = &app.database_id else {
            return Ok(None);
        };

        let database = self
            .store
            .get_database(database_id)
            .await
            .map_err(|err| DeployError::Provision(format!("{:#}", err)))?
            .ok_or_else(|| {
                DeployError::Provision(format!("database {} not found", database_id))
            })?;

        log.push_str(&format!(
            "Linked database: {} ({})\n",
            database.name, database.kind
        ));

        let connected = self
            .provisioner
            .test_connection(&database)
            .await
            .unwrap_or(false);

        if connected {
            log.push_str("Database connection verified\n");
        } else {
            log.push_str("Connection failed, attempting to provision database...\n");

            match self.provisioner.provision(&database).await {
                Ok(report) => {
                    log.push_str(&report.log);
                    if report.ok {
                        log.push_str("Database provisioned successfully\n");
                    } else {
                        log.push_str(
                            "warning: database setup failed, continuing without a verified database\n",
                        );
                    }
                }
                Err(err) => {
                    log.push_str(&format!(
                        "warning: database setup failed ({:#}), continuing without a verified database\n",
                        err
                    ));
                }
            }
        }

        Ok(Some(database))
    }

    async fn step_credentials(
        &self,
        app: &Application,
        log: &mut String,
    ) -> Result<Option<EffectiveCredential>, DeployError> {
        let resolver = CredentialResolver {
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
        };

        let credential = resolver
            .resolve(app)
            .await
            .map_err(|err| DeployError::Credential(format!("{:#}", err)))?;

        if let Some(credential) = &credential {
            log.push_str(&format!(
                "Using {} credential for private repository\n",
                credential.provenance
            ));
        }

        Ok(credential)
    }

    fn step_sync(
        &self,
        app: &Application,
        credential: Option<&EffectiveCredential>,
        log: &mut String,
    ) -> Result<(), DeployError> {
        let directory = self.settings.directory_for_hostname(&app.hostname);

        let auth = AuthContext::materialize(credential, &app.repository)
            .map_err(|err| DeployError::Sync(format!("auth context: {:#}", err)))?;

        let synchronizer = RepoSynchronizer {
            settings: &self.settings,
        };
        let outcome = synchronizer.sync(&directory, &app.repository, auth.env_overlay());

        log.push_str(&outcome.transcript);

        // Disposed here, before any build tool runs, success or failure.
        if let Err(err) = auth.dispose() {
            log.push_str(&format!("warning: auth cleanup failed: {:#}\n", err));
        }

        if !outcome.ok {
            return Err(DeployError::Sync(
                "repository could not be synchronized, see log for detail".to_owned(),
            ));
        }

        Ok(())
    }

    fn step_render(
        &self,
        app: &Application,
        database: Option<&DatabaseRecord>,
        log: &mut String,
    ) -> Result<(), DeployError> {
        let directory = self.settings.directory_for_hostname(&app.hostname);

        let renderer = TemplateRenderer {
            settings: &self.settings,
            codec: &self.codec,
        };

        renderer.render_config_maps(app, database, &directory, log)
    }

    async fn step_build(&self, app: &Application, log: &mut String) -> Result<(), DeployError> {
        let directory = self.settings.directory_for_hostname(&app.hostname);

        let dispatcher = BuildDispatcher {
            settings: &self.settings,
        };

        log.push_str(&dispatcher.run(&directory).await);

        Ok(())
    }

    /// Remove an application's working directory. Mirrors deployment
    /// logging but is not an audited attempt, so no log row is appended.
    #[tracing::instrument(skip(self))]
    pub async fn clean(&self, app_id: &str) -> DeploymentOutcome {
        let app = match self.store.get_application(app_id).await {
            Ok(Some(app)) => app,
            Ok(None) => {
                return DeploymentOutcome::failure(
                    format!("application {} not found", app_id),
                    String::new(),
                )
            }
            Err(err) => {
                return DeploymentOutcome::failure(
                    format!("could not load application {}: {:#}", app_id, err),
                    String::new(),
                )
            }
        };

        let lock = self.app_lock(&app.id);
        let _serialized = lock.lock().await;

        let directory = self.settings.directory_for_hostname(&app.hostname);
        let mut log = format!("Starting cleanup for {}\n", app.name);

        if directory.exists() {
            match fs::remove_dir_all(&directory) {
                Ok(()) => log.push_str(&format!("Directory removed: {}\n", directory.display())),
                Err(err) => log.push_str(&format!(
                    "warning: could not remove {}: {}\n",
                    directory.display(),
                    err
                )),
            }
        } else {
            log.push_str("Nothing to remove\n");
        }

        DeploymentOutcome {
            success: true,
            message: "cleanup completed".to_owned(),
            logs: log,
        }
    }
}

#[cfg(test)]
mod tests {
    use slipway_core::store::{MemoryAppStore, ScriptedProvisioner};
    use tempfile::TempDir;

    use super::*;

    fn orchestrator_with(
        store: MemoryAppStore,
        root: &TempDir,
    ) -> DeploymentOrchestrator {
        let settings = Settings {
            public_root: root.path().join("sites"),
            cache_dir: root.path().join("cache"),
            ..Settings::default()
        };

        DeploymentOrchestrator::new(
            Arc::new(store),
            Arc::new(ScriptedProvisioner::unavailable()),
            settings,
        )
    }

    #[test]
    fn only_repository_sync_is_fatal() {
        assert!(Step::RepositorySync.is_fatal());

        for step in [
            Step::DatabaseCheck,
            Step::CredentialResolution,
            Step::ConfigRender,
            Step::BuildDispatch,
        ] {
            assert!(!step.is_fatal(), "{:?} must not abort the attempt", step);
        }
    }

    #[tokio::test]
    async fn unknown_application_fails_without_a_log_row() {
        let root = TempDir::new().unwrap();
        let orchestrator = orchestrator_with(MemoryAppStore::new(), &root);

        let outcome = orchestrator.deploy("missing").await;

        assert!(!outcome.success);
        assert!(outcome.message.contains("not found"));
        assert!(orchestrator
            .store
            .list_deployment_logs("missing")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn invalid_record_is_a_configuration_error_with_audit_row() {
        let store = MemoryAppStore::new();
        store
            .insert_application(Application {
                id: "app-1".to_owned(),
                name: "demo".to_owned(),
                repository: String::new(),
                hostname: "demo.example.com".to_owned(),
                database_id: None,
                git_credential_id: None,
                custom_git_token: None,
                config_maps: vec![],
                status: AppStatus::Inactive,
                last_deployment: None,
            })
            .unwrap();

        let root = TempDir::new().unwrap();
        let orchestrator = orchestrator_with(store, &root);

        let outcome = orchestrator.deploy("app-1").await;

        assert!(!outcome.success);
        assert!(outcome.message.contains("invalid application record"));

        let logs = orchestrator
            .store
            .list_deployment_logs("app-1")
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].content.contains("invalid application record"));

        let app = orchestrator
            .store
            .get_application("app-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(app.status, AppStatus::Inactive);
    }

    #[tokio::test]
    async fn cleaning_a_missing_directory_is_harmless() {
        let store = MemoryAppStore::new();
        store
            .insert_application(Application {
                id: "app-1".to_owned(),
                name: "demo".to_owned(),
                repository: "https://example.com/demo.git".to_owned(),
                hostname: "demo.example.com".to_owned(),
                database_id: None,
                git_credential_id: None,
                custom_git_token: None,
                config_maps: vec![],
                status: AppStatus::Inactive,
                last_deployment: None,
            })
            .unwrap();

        let root = TempDir::new().unwrap();
        let orchestrator = orchestrator_with(store, &root);

        let outcome = orchestrator.clean("app-1").await;

        assert!(outcome.success);
        assert!(outcome.logs.contains("Nothing to remove"));
    }
}
