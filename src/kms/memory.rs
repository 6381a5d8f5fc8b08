//! In-process emulation of the remote key service.
//!
//! Selected with `KMS_BACKEND=memory` for local development, and used as the
//! remote double throughout the test suite. Keys are regional, addressable by
//! key id or ARN, and remember their policy, state and pending deletion window.
//! Failures can be injected per operation and target.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use uuid::Uuid;

use super::client::KeyServiceClient;
use super::models::{CreatedKey, KeyState, KeyUsage};
use crate::error::{KmsError, KmsResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KmsOperation {
    CreateKey,
    CreateAlias,
    DescribeKey,
    GetKeyPolicy,
    PutKeyPolicy,
    ScheduleKeyDeletion,
}

impl KmsOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            KmsOperation::CreateKey => "CreateKey",
            KmsOperation::CreateAlias => "CreateAlias",
            KmsOperation::DescribeKey => "DescribeKey",
            KmsOperation::GetKeyPolicy => "GetKeyPolicy",
            KmsOperation::PutKeyPolicy => "PutKeyPolicy",
            KmsOperation::ScheduleKeyDeletion => "ScheduleKeyDeletion",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulatedKey {
    pub key_id: String,
    pub arn: String,
    pub region: String,
    pub usage: KeyUsage,
    pub description: String,
    pub state: KeyState,
    pub policy: String,
    pub pending_window_days: Option<i32>,
}

pub struct InMemoryKeyService {
    account_id: String,
    keys: DashMap<String, EmulatedKey>,
    aliases: DashMap<(String, String), String>,
    failures: DashSet<(KmsOperation, String)>,
    calls: AtomicUsize,
}

impl Default for InMemoryKeyService {
    fn default() -> Self {
        Self::new("111122223333")
    }
}

impl InMemoryKeyService {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            keys: DashMap::new(),
            aliases: DashMap::new(),
            failures: DashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of remote operations attempted so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes `operation` fail for `target` until cleared. The target is the key
    /// id or ARN for key operations and the region for `CreateKey`.
    pub fn fail_on(&self, operation: KmsOperation, target: impl Into<String>) {
        self.failures.insert((operation, target.into()));
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    pub fn key(&self, id: &str) -> Option<EmulatedKey> {
        self.find_arn(id)
            .and_then(|arn| self.keys.get(&arn).map(|entry| entry.clone()))
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn alias_target(&self, region: &str, alias: &str) -> Option<String> {
        self.aliases
            .get(&(region.to_string(), alias.to_string()))
            .map(|entry| entry.clone())
    }

    pub fn set_state(&self, id: &str, state: KeyState) -> bool {
        self.update(id, |key| key.state = state)
    }

    pub fn set_policy(&self, id: &str, policy: impl Into<String>) -> bool {
        let policy = policy.into();
        self.update(id, |key| key.policy = policy)
    }

    /// Drops the key as if it had been deleted out of band.
    pub fn remove(&self, id: &str) -> bool {
        match self.find_arn(id) {
            Some(arn) => self.keys.remove(&arn).is_some(),
            None => false,
        }
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut EmulatedKey)) -> bool {
        let Some(arn) = self.find_arn(id) else {
            return false;
        };
        match self.keys.get_mut(&arn) {
            Some(mut entry) => {
                apply(entry.value_mut());
                true
            }
            None => false,
        }
    }

    fn find_arn(&self, id: &str) -> Option<String> {
        if self.keys.contains_key(id) {
            return Some(id.to_string());
        }
        self.keys
            .iter()
            .find(|entry| entry.key_id == id)
            .map(|entry| entry.arn.clone())
    }

    fn begin(&self, operation: KmsOperation, target: &str) -> KmsResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.contains(&(operation, target.to_string())) {
            return Err(KmsError::remote(operation.as_str(), "injected failure"));
        }
        Ok(())
    }

    fn regional_key(&self, region: &str, id: &str) -> KmsResult<EmulatedKey> {
        self.key(id)
            .filter(|key| key.region == region)
            .ok_or_else(|| KmsError::NotFoundRemote(id.to_string()))
    }
}

fn check_policy_document(operation: KmsOperation, policy: &str) -> KmsResult<()> {
    serde_json::from_str::<Value>(policy)
        .map(|_| ())
        .map_err(|err| {
            KmsError::remote(
                operation.as_str(),
                format!("MalformedPolicyDocumentException: {err}"),
            )
        })
}

#[async_trait]
impl KeyServiceClient for InMemoryKeyService {
    async fn create_key(
        &self,
        region: &str,
        usage: KeyUsage,
        description: &str,
        policy: &str,
    ) -> KmsResult<CreatedKey> {
        self.begin(KmsOperation::CreateKey, region)?;
        check_policy_document(KmsOperation::CreateKey, policy)?;

        let key_id = Uuid::new_v4().to_string();
        let arn = format!("arn:aws:kms:{region}:{}:key/{key_id}", self.account_id);
        self.keys.insert(
            arn.clone(),
            EmulatedKey {
                key_id: key_id.clone(),
                arn: arn.clone(),
                region: region.to_string(),
                usage,
                description: description.to_string(),
                state: KeyState::Enabled,
                policy: policy.to_string(),
                pending_window_days: None,
            },
        );
        Ok(CreatedKey { key_id, arn })
    }

    async fn create_alias(&self, region: &str, alias: &str, target_arn: &str) -> KmsResult<()> {
        self.begin(KmsOperation::CreateAlias, target_arn)?;
        let key = self.regional_key(region, target_arn)?;
        let slot = (region.to_string(), alias.to_string());
        if self.aliases.contains_key(&slot) {
            return Err(KmsError::remote(
                KmsOperation::CreateAlias.as_str(),
                format!("AlreadyExistsException: {alias}"),
            ));
        }
        self.aliases.insert(slot, key.arn);
        Ok(())
    }

    async fn describe_key(&self, region: &str, key_id: &str) -> KmsResult<KeyState> {
        self.begin(KmsOperation::DescribeKey, key_id)?;
        Ok(self.regional_key(region, key_id)?.state)
    }

    async fn get_key_policy(&self, region: &str, key_id: &str) -> KmsResult<String> {
        self.begin(KmsOperation::GetKeyPolicy, key_id)?;
        Ok(self.regional_key(region, key_id)?.policy)
    }

    async fn put_key_policy(&self, region: &str, key_id: &str, policy: &str) -> KmsResult<()> {
        self.begin(KmsOperation::PutKeyPolicy, key_id)?;
        check_policy_document(KmsOperation::PutKeyPolicy, policy)?;
        let key = self.regional_key(region, key_id)?;
        self.set_policy(&key.arn, policy);
        Ok(())
    }

    async fn schedule_key_deletion(
        &self,
        region: &str,
        key_id: &str,
        pending_window_days: i32,
    ) -> KmsResult<()> {
        self.begin(KmsOperation::ScheduleKeyDeletion, key_id)?;
        if !(7..=30).contains(&pending_window_days) {
            return Err(KmsError::remote(
                KmsOperation::ScheduleKeyDeletion.as_str(),
                format!("ValidationException: pending window {pending_window_days} out of range"),
            ));
        }
        let key = self.regional_key(region, key_id)?;
        if key.state == KeyState::PendingDeletion {
            return Err(KmsError::remote(
                KmsOperation::ScheduleKeyDeletion.as_str(),
                format!("KMSInvalidStateException: {} is pending deletion", key.arn),
            ));
        }
        self.update(&key.arn, |entry| {
            entry.state = KeyState::PendingDeletion;
            entry.pending_window_days = Some(pending_window_days);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keys_are_regional_and_addressable_by_id_or_arn() {
        let kms = InMemoryKeyService::default();
        let created = kms
            .create_key("us-west-2", KeyUsage::EncryptDecrypt, "test", "{}")
            .await
            .unwrap();
        assert!(created.arn.starts_with("arn:aws:kms:us-west-2:111122223333:key/"));

        assert_eq!(
            kms.describe_key("us-west-2", &created.key_id).await.unwrap(),
            KeyState::Enabled
        );
        assert_eq!(kms.get_key_policy("us-west-2", &created.arn).await.unwrap(), "{}");
        assert!(matches!(
            kms.describe_key("eu-west-1", &created.arn).await,
            Err(KmsError::NotFoundRemote(_))
        ));
        assert_eq!(kms.call_count(), 4);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_remote_errors() {
        let kms = InMemoryKeyService::default();
        let created = kms
            .create_key("us-east-1", KeyUsage::EncryptDecrypt, "test", "{}")
            .await
            .unwrap();
        kms.fail_on(KmsOperation::GetKeyPolicy, created.arn.clone());

        let err = kms.get_key_policy("us-east-1", &created.arn).await.unwrap_err();
        assert!(matches!(err, KmsError::RemoteService { operation: "GetKeyPolicy", .. }));

        kms.clear_failures();
        assert!(kms.get_key_policy("us-east-1", &created.arn).await.is_ok());
    }

    #[tokio::test]
    async fn scheduling_deletion_twice_is_rejected() {
        let kms = InMemoryKeyService::default();
        let created = kms
            .create_key("us-east-1", KeyUsage::EncryptDecrypt, "test", "{}")
            .await
            .unwrap();
        kms.schedule_key_deletion("us-east-1", &created.arn, 7)
            .await
            .unwrap();
        assert_eq!(kms.key(&created.arn).unwrap().pending_window_days, Some(7));
        assert!(kms
            .schedule_key_deletion("us-east-1", &created.arn, 7)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn malformed_policies_are_refused() {
        let kms = InMemoryKeyService::default();
        assert!(kms
            .create_key("us-east-1", KeyUsage::EncryptDecrypt, "test", "{not json")
            .await
            .is_err());
        assert_eq!(kms.key_count(), 0);
    }
}
