// Credential model for captured secrets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of captured secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Password,
    Hash,
    ApiKey,
    Token,
    SshKey,
    Certificate,
    Cookie,
    Username,
    Other,
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Password => "password",
            Self::Hash => "hash",
            Self::ApiKey => "api_key",
            Self::Token => "token",
            Self::SshKey => "ssh_key",
            Self::Certificate => "certificate",
            Self::Cookie => "cookie",
            Self::Username => "username",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// A captured secret or discovered account.
///
/// Plaintext secrets are only ever stored as ciphertext produced by the
/// encryption service; `plaintext_encrypted` is that ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub project_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub credential_type: CredentialType,
    pub username: Option<String>,
    pub domain: Option<String>,
    pub plaintext_encrypted: Option<String>,
    pub hash_value: Option<String>,
    pub hash_type: Option<String>,
    pub service: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub is_valid: Option<bool>,
    pub source: Option<String>,
    pub metadata: Value,
    pub fingerprint: Option<String>,
    pub discovered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(project_id: Uuid, credential_type: CredentialType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id,
            asset_id: None,
            credential_type,
            username: None,
            domain: None,
            plaintext_encrypted: None,
            hash_value: None,
            hash_type: None,
            service: None,
            port: None,
            url: None,
            is_valid: None,
            source: None,
            metadata: Value::Object(Default::default()),
            fingerprint: None,
            discovered_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
