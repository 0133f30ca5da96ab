use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the durable audit trail: the full textual log of a single
/// deployment attempt. Append-only; rows are never updated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentLog {
    pub app_id: String,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}
