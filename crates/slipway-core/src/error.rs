use thiserror::Error;

use crate::secrets::CodecError;

/// Failure categories of one deployment attempt.
///
/// The per-category fatality below is the single policy table the
/// orchestrator consults: only a repository sync failure aborts an attempt;
/// every other category is appended to the deployment log and the pipeline
/// continues to finalize.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid application record: {0}")]
    Configuration(String),

    #[error("credential resolution failed: {0}")]
    Credential(String),

    #[error("repository sync failed: {0}")]
    Sync(String),

    #[error("config render failed: {0}")]
    Render(String),

    #[error("build step failed: {0}")]
    Build(String),

    #[error("database provisioning failed: {0}")]
    Provision(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DeployError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeployError::Sync(_))
    }
}
