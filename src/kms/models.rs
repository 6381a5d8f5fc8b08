use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One customer managed key provisioned for a (role, region) pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct KeyRecord {
    pub id: String,
    pub role_id: String,
    /// ARN of the remote key. Never rewritten after provisioning.
    pub external_key_id: String,
    pub region: String,
    pub created_by: String,
    pub last_updated_by: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub last_validated_at: DateTime<Utc>,
}

/// Timestamp refresh applied to the record owned by (role_id, region).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRecordUpdate {
    pub role_id: String,
    pub region: String,
    pub last_updated_by: String,
    pub last_updated_at: DateTime<Utc>,
    pub last_validated_at: DateTime<Utc>,
}

/// An external IAM role known to the system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct RoleRecord {
    pub id: String,
    pub arn: String,
    pub last_updated_at: DateTime<Utc>,
}

/// Remote key state as reported by the key service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyState {
    Enabled,
    Disabled,
    PendingDeletion,
    Other(String),
}

impl KeyState {
    pub fn as_str(&self) -> &str {
        match self {
            KeyState::Enabled => "Enabled",
            KeyState::Disabled => "Disabled",
            KeyState::PendingDeletion => "PendingDeletion",
            KeyState::Other(value) => value.as_str(),
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "Enabled" => KeyState::Enabled,
            "Disabled" => KeyState::Disabled,
            "PendingDeletion" => KeyState::PendingDeletion,
            other => KeyState::Other(other.to_string()),
        }
    }

    /// Disabled and pending-deletion keys can no longer serve the consumer.
    pub fn is_unusable(&self) -> bool {
        matches!(self, KeyState::Disabled | KeyState::PendingDeletion)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyUsage {
    EncryptDecrypt,
}

impl KeyUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::EncryptDecrypt => "ENCRYPT_DECRYPT",
        }
    }
}

/// Identifiers returned by the key service for a freshly created key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedKey {
    pub key_id: String,
    pub arn: String,
}
