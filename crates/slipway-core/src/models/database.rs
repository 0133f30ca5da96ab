use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Mysql,
    Postgres,
}

impl DatabaseKind {
    /// Tag used in rendered connection templates (`%DB_TYPE%`).
    pub fn dsn_tag(self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Postgres => "pgsql",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            DatabaseKind::Mysql => 3306,
            DatabaseKind::Postgres => 5432,
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dsn_tag())
    }
}

/// A database owned by the external provisioning subsystem; the pipeline
/// only reads it. The password is an encrypted blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub id: String,
    pub name: String,
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub db_name: String,
    pub username: String,
    /// Encrypted blob, see [`crate::SecretCodec`].
    pub password: String,
    #[serde(default)]
    pub status: String,
}
