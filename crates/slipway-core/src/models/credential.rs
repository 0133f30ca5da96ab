use std::fmt;

use serde::{Deserialize, Serialize};

/// A shared, named git credential. The token is stored encrypted and is only
/// ever decrypted into an [`EffectiveCredential`] for the duration of one
/// deployment.
#[derive(Clone, Serialize, Deserialize)]
pub struct GitCredential {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Encrypted blob, see [`crate::SecretCodec`].
    pub token: String,
    #[serde(default)]
    pub description: String,
}

impl fmt::Debug for GitCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCredential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("token", &"<encrypted>")
            .finish()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CredentialProvenance {
    /// Per-application override token.
    Custom,
    /// Shared named credential.
    Named { provider: String },
}

impl fmt::Display for CredentialProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialProvenance::Custom => write!(f, "custom"),
            CredentialProvenance::Named { provider } => write!(f, "{}", provider),
        }
    }
}

/// The decrypted credential chosen for one deployment's git operations.
/// Lives in memory only and is never persisted.
#[derive(Clone)]
pub struct EffectiveCredential {
    pub token: String,
    pub username: Option<String>,
    pub provenance: CredentialProvenance,
}

impl fmt::Debug for EffectiveCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveCredential")
            .field("token", &"<redacted>")
            .field("username", &self.username)
            .field("provenance", &self.provenance)
            .finish()
    }
}
