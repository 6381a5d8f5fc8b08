use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{KmsError, KmsResult};
use crate::kms::models::{KeyRecord, KeyState, RoleRecord};
use crate::kms::{KeyRecordStore, KmsService, MIN_PENDING_WINDOW_DAYS};
use crate::supply::Clock;

pub const DEFAULT_INACTIVITY_THRESHOLD_DAYS: i64 = 30;
pub const DEFAULT_INTER_CALL_DELAY_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct CleanUpConfig {
    pub inactivity_threshold_days: i64,
    /// Pause between remote deletions, the only guard against remote rate limits.
    pub inter_call_delay: StdDuration,
}

impl Default for CleanUpConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_days: DEFAULT_INACTIVITY_THRESHOLD_DAYS,
            inter_call_delay: StdDuration::from_secs(DEFAULT_INTER_CALL_DELAY_SECS),
        }
    }
}

/// Records last validated before the returned instant count as inactive.
pub fn inactive_cutoff(now: DateTime<Utc>, threshold_days: i64) -> KmsResult<DateTime<Utc>> {
    if threshold_days < 0 {
        return Err(KmsError::InvalidRequest(format!(
            "kms expiration period must not be negative, got {threshold_days}"
        )));
    }
    Duration::try_days(threshold_days)
        .and_then(|period| now.checked_sub_signed(period))
        .ok_or_else(|| {
            KmsError::InvalidRequest(format!(
                "kms expiration period of {threshold_days} days is out of range"
            ))
        })
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CleanUpRequest {
    pub kms_expiration_period_in_days: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepCounts {
    pub candidates: usize,
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanUpReport {
    pub keys: SweepCounts,
    pub roles: SweepCounts,
    /// The key sweep stopped early; the role sweep did not run.
    pub cancelled: bool,
}

/// key: kms-garbage-collector
/// Retires inactive or orphaned keys and orphaned roles, one item at a time.
pub struct CleanUpService {
    kms: Arc<KmsService>,
    store: Arc<dyn KeyRecordStore>,
    clock: Arc<dyn Clock>,
    config: CleanUpConfig,
    sweep_lock: Mutex<()>,
}

impl CleanUpService {
    pub fn new(
        kms: Arc<KmsService>,
        store: Arc<dyn KeyRecordStore>,
        clock: Arc<dyn Clock>,
        config: CleanUpConfig,
    ) -> Self {
        Self {
            kms,
            store,
            clock,
            config,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CleanUpConfig {
        &self.config
    }

    /// Resolves the request's inactivity threshold, rejecting periods that are
    /// negative or reach past the representable time range.
    pub fn threshold_days(&self, request: &CleanUpRequest) -> KmsResult<i64> {
        let days = request
            .kms_expiration_period_in_days
            .unwrap_or(self.config.inactivity_threshold_days);
        inactive_cutoff(self.clock.now(), days)?;
        Ok(days)
    }

    /// Runs the key sweep and then the role sweep. Concurrent calls queue
    /// behind the one in progress.
    pub async fn clean_up(
        &self,
        request: CleanUpRequest,
        cancel: &CancellationToken,
    ) -> KmsResult<CleanUpReport> {
        let threshold_days = self.threshold_days(&request)?;
        let _sweep = self.sweep_lock.lock().await;

        let mut report = CleanUpReport::default();
        report.cancelled = self
            .sweep_keys(threshold_days, cancel, &mut report.keys)
            .await?;
        if report.cancelled {
            warn!(?report, "kms clean up cancelled, skipping role sweep");
            return Ok(report);
        }
        self.sweep_roles(&mut report.roles).await?;

        info!(?report, threshold_days, "kms clean up finished");
        Ok(report)
    }

    /// Returns true when the sweep was cut short by `cancel`.
    async fn sweep_keys(
        &self,
        threshold_days: i64,
        cancel: &CancellationToken,
        counts: &mut SweepCounts,
    ) -> KmsResult<bool> {
        let before = inactive_cutoff(self.clock.now(), threshold_days)?;
        let candidates = self.store.get_inactive_or_orphaned(before).await?;
        counts.candidates = candidates.len();
        if candidates.is_empty() {
            info!("no kms keys to clean up");
            return Ok(false);
        }

        info!(count = candidates.len(), %before, "cleaning up orphaned or inactive kms keys");
        for (index, record) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(true);
            }

            match self.retire_key(record).await {
                Ok(()) => counts.deleted += 1,
                Err(err) => {
                    counts.failed += 1;
                    warn!(
                        ?err,
                        key_id = %record.external_key_id,
                        region = %record.region,
                        "failed to clean up kms key"
                    );
                }
            }

            if index + 1 < candidates.len() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        warn!(
                            key_id = %record.external_key_id,
                            region = %record.region,
                            "pause between kms deletions interrupted"
                        );
                        return Ok(true);
                    }
                    _ = tokio::time::sleep(self.config.inter_call_delay) => {}
                }
            }
        }
        Ok(false)
    }

    async fn retire_key(&self, record: &KeyRecord) -> KmsResult<()> {
        info!(
            key_id = %record.external_key_id,
            region = %record.region,
            last_validated_at = %record.last_validated_at,
            "deleting orphaned or inactive kms key"
        );
        self.kms
            .ensure_engine_can_delete(&record.external_key_id, &record.region)
            .await;
        let scheduled = self
            .kms
            .schedule_deletion(
                &record.external_key_id,
                &record.region,
                MIN_PENDING_WINDOW_DAYS,
            )
            .await;
        match scheduled {
            Ok(()) => {}
            Err(KmsError::NotFoundRemote(_)) => info!(
                key_id = %record.external_key_id,
                region = %record.region,
                "kms key no longer exists, removing record"
            ),
            Err(err) => {
                if !self.already_pending_deletion(record).await {
                    return Err(err);
                }
                info!(
                    key_id = %record.external_key_id,
                    region = %record.region,
                    "kms key already pending deletion, removing record"
                );
            }
        }
        self.kms.delete_key_record(&record.id).await
    }

    async fn already_pending_deletion(&self, record: &KeyRecord) -> bool {
        matches!(
            self.kms
                .key_state(&record.external_key_id, &record.region)
                .await,
            Ok(KeyState::PendingDeletion) | Err(KmsError::NotFoundRemote(_))
        )
    }

    async fn sweep_roles(&self, counts: &mut SweepCounts) -> KmsResult<()> {
        let roles = self.store.get_orphaned_roles().await?;
        counts.candidates = roles.len();
        for role in &roles {
            match self.retire_role(role).await {
                Ok(()) => counts.deleted += 1,
                Err(err) => {
                    counts.failed += 1;
                    warn!(?err, role_arn = %role.arn, "failed to delete orphaned iam role");
                }
            }
        }
        Ok(())
    }

    async fn retire_role(&self, role: &RoleRecord) -> KmsResult<()> {
        info!(
            role_arn = %role.arn,
            last_updated_at = %role.last_updated_at,
            "deleting orphaned iam role"
        );
        self.store.delete_role_by_id(&role.id).await?;
        Ok(())
    }
}
