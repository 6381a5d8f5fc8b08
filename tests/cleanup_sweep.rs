mod common;

use chrono::Duration;
use keysteward::cleanup::CleanUpRequest;
use keysteward::kms::memory::KmsOperation;
use keysteward::kms::models::{KeyRecord, KeyState};
use keysteward::kms::KeyRecordStore;
use keysteward::supply::Clock;
use tokio_util::sync::CancellationToken;

const REGION: &str = "ap-southeast-2";

async fn provision(stack: &common::Stack, role: &str) -> String {
    stack
        .engine
        .provision_key(
            role,
            &format!("arn:aws:iam::444455556666:role/{role}"),
            REGION,
            "ops",
            stack.clock.now(),
        )
        .await
        .unwrap()
}

fn ids(records: Vec<KeyRecord>) -> Vec<String> {
    let mut ids: Vec<String> = records.into_iter().map(|record| record.role_id).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn inactivity_threshold_selects_only_stale_keys() {
    let stack = common::stack();
    stack.store.attach_consumer("recent").await;
    stack.store.attach_consumer("stale").await;

    provision(&stack, "stale").await;
    stack.clock.advance(Duration::days(31) - Duration::hours(1));
    provision(&stack, "recent").await;
    stack.clock.advance(Duration::hours(1));

    let before = stack.clock.now() - Duration::days(30);
    let selected = stack.store.get_inactive_or_orphaned(before).await.unwrap();
    assert_eq!(ids(selected), vec!["stale".to_string()]);
}

#[tokio::test]
async fn failures_are_isolated_and_revisited_on_the_next_sweep() {
    let stack = common::stack();
    let mut arns = Vec::new();
    for role in ["r1", "r2", "r3", "r4"] {
        arns.push(provision(&stack, role).await);
    }
    stack
        .kms
        .fail_on(KmsOperation::ScheduleKeyDeletion, arns[0].clone());
    stack
        .kms
        .fail_on(KmsOperation::GetKeyPolicy, arns[2].clone());

    let report = stack
        .cleanup
        .clean_up(CleanUpRequest::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.keys.candidates, 4);
    assert_eq!(report.keys.failed, 1);
    assert_eq!(report.keys.deleted, 3);
    // A policy read failure only skips the permission bootstrap.
    assert_eq!(
        stack.kms.key(&arns[2]).unwrap().state,
        KeyState::PendingDeletion
    );
    assert_eq!(ids(stack.store.key_records().await), vec!["r1".to_string()]);

    stack.kms.clear_failures();
    let report = stack
        .cleanup
        .clean_up(CleanUpRequest::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.keys.deleted, 1);
    assert!(stack.store.key_records().await.is_empty());
}

#[tokio::test]
async fn explicit_expiration_period_overrides_default() {
    let stack = common::stack();
    stack.store.attach_consumer("busy").await;
    provision(&stack, "busy").await;
    stack.clock.advance(Duration::days(3));

    let untouched = stack
        .cleanup
        .clean_up(CleanUpRequest::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(untouched.keys.candidates, 0);

    let report = stack
        .cleanup
        .clean_up(
            CleanUpRequest {
                kms_expiration_period_in_days: Some(2),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.keys.deleted, 1);
}
