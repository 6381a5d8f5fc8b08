#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeZone, Utc};
use keysteward::cleanup::{CleanUpConfig, CleanUpService};
use keysteward::kms::memory::InMemoryKeyService;
use keysteward::kms::{InMemoryKeyRecordStore, KeyPolicyService, KmsService, KmsServiceConfig};
use keysteward::supply::{ManualClock, UuidGenerator};

pub const OPERATOR: &str = "arn:aws:iam::111122223333:role/keysteward-operator";
pub const ADMIN: &str = "arn:aws:iam::111122223333:role/keysteward-admin";

pub struct Stack {
    pub engine: Arc<KmsService>,
    pub cleanup: Arc<CleanUpService>,
    pub kms: Arc<InMemoryKeyService>,
    pub store: Arc<InMemoryKeyRecordStore>,
    pub clock: Arc<ManualClock>,
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

pub fn stack() -> Stack {
    let kms = Arc::new(InMemoryKeyService::default());
    let store = Arc::new(InMemoryKeyRecordStore::new());
    let clock = Arc::new(ManualClock::new(epoch()));
    let engine = Arc::new(KmsService::new(
        store.clone(),
        kms.clone(),
        KeyPolicyService::new(OPERATOR, Some(ADMIN.to_string())).unwrap(),
        clock.clone(),
        Arc::new(UuidGenerator),
        KmsServiceConfig::default(),
    ));
    let cleanup = Arc::new(CleanUpService::new(
        engine.clone(),
        store.clone(),
        clock.clone(),
        CleanUpConfig {
            inactivity_threshold_days: 30,
            inter_call_delay: StdDuration::ZERO,
        },
    ));
    Stack {
        engine,
        cleanup,
        kms,
        store,
        clock,
    }
}
