mod application;
mod credential;
mod database;
mod deployment_log;

pub use application::{AppStatus, Application, ConfigMapEntry};
pub use credential::{CredentialProvenance, EffectiveCredential, GitCredential};
pub use database::{DatabaseKind, DatabaseRecord};
pub use deployment_log::DeploymentLog;
