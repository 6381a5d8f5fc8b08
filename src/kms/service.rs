use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::client::KeyServiceClient;
use super::models::{KeyRecord, KeyRecordUpdate, KeyState, KeyUsage};
use super::policy::KeyPolicyService;
use super::store::KeyRecordStore;
use crate::arn;
use crate::error::{KmsError, KmsResult};
use crate::supply::{Clock, IdGenerator};

pub const DEFAULT_VALIDATION_INTERVAL_MILLIS: i64 = 6000;
pub const DEFAULT_ALIAS_PREFIX: &str = "alias/keysteward";
pub const DEFAULT_KEY_DESCRIPTION: &str = "Key used by keysteward for IAM role authentication.";
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Clone, Debug)]
pub struct KmsServiceConfig {
    /// Records validated more recently than this are not checked remotely.
    pub validation_interval: Duration,
    pub alias_prefix: String,
    pub key_description: String,
    /// Actor written to `last_updated_by` when the engine refreshes a record.
    pub system_actor: String,
}

impl Default for KmsServiceConfig {
    fn default() -> Self {
        Self {
            validation_interval: Duration::milliseconds(DEFAULT_VALIDATION_INTERVAL_MILLIS),
            alias_prefix: DEFAULT_ALIAS_PREFIX.to_string(),
            key_description: DEFAULT_KEY_DESCRIPTION.to_string(),
            system_actor: SYSTEM_ACTOR.to_string(),
        }
    }
}

/// Result of a validation pass that did not fail outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Validated within the interval; nothing was checked.
    Skipped,
    Validated { policy_repaired: bool },
    /// The remote key was gone, so the local record was removed.
    RecordDeleted,
    /// A remote call failed; nothing was changed and the next attempt retries.
    Deferred,
}

/// key: kms-lifecycle-engine
/// Provisions, validates and repairs the per-role customer managed keys.
#[derive(Clone)]
pub struct KmsService {
    store: Arc<dyn KeyRecordStore>,
    kms: Arc<dyn KeyServiceClient>,
    policies: KeyPolicyService,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: KmsServiceConfig,
}

impl KmsService {
    pub fn new(
        store: Arc<dyn KeyRecordStore>,
        kms: Arc<dyn KeyServiceClient>,
        policies: KeyPolicyService,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: KmsServiceConfig,
    ) -> Self {
        Self {
            store,
            kms,
            policies,
            clock,
            ids,
            config,
        }
    }

    pub fn config(&self) -> &KmsServiceConfig {
        &self.config
    }

    pub fn policies(&self) -> &KeyPolicyService {
        &self.policies
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Creates a remote key for the role, aliases it and records it. The
    /// caller must make sure no record exists yet for (role, region); a second
    /// call creates a second remote key and then fails on the local insert.
    ///
    /// Returns the ARN of the new key.
    pub async fn provision_key(
        &self,
        role_id: &str,
        principal_arn: &str,
        region: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> KmsResult<String> {
        let role_arn = arn::to_role_arn(principal_arn)?;
        let policy = self.policies.generate_standard_policy(&role_arn)?;

        let created = self
            .kms
            .create_key(
                region,
                KeyUsage::EncryptDecrypt,
                &self.config.key_description,
                &policy,
            )
            .await?;

        let id = self.ids.new_id();
        let alias = format!("{}/{}", self.config.alias_prefix, id);
        self.kms.create_alias(region, &alias, &created.arn).await?;

        let record = KeyRecord {
            id,
            role_id: role_id.to_string(),
            external_key_id: created.arn.clone(),
            region: region.to_string(),
            created_by: actor.to_string(),
            last_updated_by: actor.to_string(),
            created_at: now,
            last_updated_at: now,
            last_validated_at: now,
        };
        self.store.insert_key_record(&record).await?;

        info!(
            role_id = %role_id,
            key_id = %created.arn,
            region = %region,
            alias = %alias,
            "provisioned kms key"
        );
        Ok(created.arn)
    }

    pub async fn update_key(
        &self,
        role_id: &str,
        region: &str,
        actor: &str,
        updated_at: DateTime<Utc>,
        validated_at: DateTime<Utc>,
    ) -> KmsResult<()> {
        let update = KeyRecordUpdate {
            role_id: role_id.to_string(),
            region: region.to_string(),
            last_updated_by: actor.to_string(),
            last_updated_at: updated_at,
            last_validated_at: validated_at,
        };
        if self.store.update_key_record(&update).await? == 0 {
            return Err(KmsError::RecordNotFound {
                role_id: role_id.to_string(),
                region: region.to_string(),
            });
        }
        Ok(())
    }

    pub async fn delete_key_record(&self, id: &str) -> KmsResult<()> {
        let removed = self.store.delete_key_record_by_id(id).await?;
        debug!(record_id = %id, removed, "deleted kms key record");
        Ok(())
    }

    pub fn needs_validation(&self, record: &KeyRecord) -> bool {
        self.clock.now() - record.last_validated_at >= self.config.validation_interval
    }

    /// Checks the live policy and state of the record's key, repairing the
    /// policy when the consumer statement no longer names `principal_arn`.
    ///
    /// Transient remote failures are absorbed and reported as
    /// [`ValidationOutcome::Deferred`]. A disabled or pending-deletion key
    /// removes the record and fails with [`KmsError::KeyUnusable`].
    pub async fn validate_key_and_policy(
        &self,
        record: &KeyRecord,
        principal_arn: &str,
    ) -> KmsResult<ValidationOutcome> {
        if !self.needs_validation(record) {
            return Ok(ValidationOutcome::Skipped);
        }
        let role_arn = arn::to_role_arn(principal_arn)?;

        match self.reconcile(record, &role_arn).await {
            Ok(policy_repaired) => Ok(ValidationOutcome::Validated { policy_repaired }),
            Err(KmsError::NotFoundRemote(_)) => {
                warn!(
                    key_id = %record.external_key_id,
                    region = %record.region,
                    "kms key no longer exists, removing record"
                );
                self.delete_key_record(&record.id).await?;
                Ok(ValidationOutcome::RecordDeleted)
            }
            Err(err @ KmsError::RemoteService { .. }) => {
                warn!(
                    ?err,
                    key_id = %record.external_key_id,
                    region = %record.region,
                    "kms validation abandoned"
                );
                Ok(ValidationOutcome::Deferred)
            }
            Err(err) => Err(err),
        }
    }

    async fn reconcile(&self, record: &KeyRecord, role_arn: &str) -> KmsResult<bool> {
        let key_id = record.external_key_id.as_str();
        let region = record.region.as_str();
        let now = self.clock.now();

        let document = self.kms.get_key_policy(region, key_id).await?;
        let policy_repaired = !self.policies.is_policy_valid(&document, role_arn);
        if policy_repaired {
            let policy = self.policies.generate_standard_policy(role_arn)?;
            self.kms.put_key_policy(region, key_id, &policy).await?;
            info!(
                key_id = %key_id,
                region = %region,
                principal = %role_arn,
                "repaired drifted kms key policy"
            );
        }

        if self.is_unusable(key_id, region).await? {
            warn!(
                key_id = %key_id,
                region = %region,
                "kms key is disabled or pending deletion, removing record"
            );
            self.delete_key_record(&record.id).await?;
            return Err(KmsError::KeyUnusable {
                key_id: key_id.to_string(),
                region: region.to_string(),
            });
        }

        self.update_key(
            &record.role_id,
            region,
            &self.config.system_actor,
            now,
            now,
        )
        .await?;
        Ok(policy_repaired)
    }

    pub async fn key_state(&self, key_id: &str, region: &str) -> KmsResult<KeyState> {
        self.kms.describe_key(region, key_id).await
    }

    pub async fn is_unusable(&self, key_id: &str, region: &str) -> KmsResult<bool> {
        Ok(self.key_state(key_id, region).await?.is_unusable())
    }

    /// Grants the engine delete rights on the key if it lacks them. Only the
    /// operator statement is rewritten and the consumer statement is dropped in
    /// the same write. Failures are logged and leave the policy untouched.
    pub async fn ensure_engine_can_delete(&self, key_id: &str, region: &str) {
        if let Err(err) = self.grant_delete_permission(key_id, region).await {
            warn!(
                ?err,
                key_id = %key_id,
                region = %region,
                "could not grant delete permission on kms key"
            );
        }
    }

    async fn grant_delete_permission(&self, key_id: &str, region: &str) -> KmsResult<()> {
        let document = self.kms.get_key_policy(region, key_id).await?;
        if self.policies.has_delete_permission(&document) {
            return Ok(());
        }
        let patched = self.policies.overwrite_operator_statement(&document)?;
        let patched = self.policies.strip_consumer_statement(&patched)?;
        self.kms.put_key_policy(region, key_id, &patched).await?;
        info!(key_id = %key_id, region = %region, "granted delete permission on kms key");
        Ok(())
    }

    pub async fn schedule_deletion(
        &self,
        key_id: &str,
        region: &str,
        pending_window_days: i32,
    ) -> KmsResult<()> {
        self.kms
            .schedule_key_deletion(region, key_id, pending_window_days)
            .await?;
        info!(
            key_id = %key_id,
            region = %region,
            pending_window_days,
            "scheduled kms key deletion"
        );
        Ok(())
    }

    /// Returns the ARN of a usable key for (role, region), provisioning one
    /// when none is recorded or the recorded key has vanished remotely.
    pub async fn resolve_key(
        &self,
        role_id: &str,
        principal_arn: &str,
        region: &str,
        actor: &str,
    ) -> KmsResult<String> {
        if let Some(record) = self.store.get_by_role_and_region(role_id, region).await? {
            match self.validate_key_and_policy(&record, principal_arn).await? {
                ValidationOutcome::RecordDeleted => {}
                _ => return Ok(record.external_key_id),
            }
        }
        self.provision_key(role_id, principal_arn, region, actor, self.clock.now())
            .await
    }
}
