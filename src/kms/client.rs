use async_trait::async_trait;

use super::models::{CreatedKey, KeyState, KeyUsage};
use crate::error::KmsResult;

/// Policy name the key service uses for a key's only resource policy.
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Shortest pending window the key service accepts when scheduling deletion.
pub const MIN_PENDING_WINDOW_DAYS: i32 = 7;

/// Region-addressable facade over the remote key service.
///
/// Implementations report a missing key as `KmsError::NotFoundRemote` and every
/// other remote failure as `KmsError::RemoteService`.
#[async_trait]
pub trait KeyServiceClient: Send + Sync {
    async fn create_key(
        &self,
        region: &str,
        usage: KeyUsage,
        description: &str,
        policy: &str,
    ) -> KmsResult<CreatedKey>;

    async fn create_alias(&self, region: &str, alias: &str, target_arn: &str) -> KmsResult<()>;

    async fn describe_key(&self, region: &str, key_id: &str) -> KmsResult<KeyState>;

    async fn get_key_policy(&self, region: &str, key_id: &str) -> KmsResult<String>;

    async fn put_key_policy(&self, region: &str, key_id: &str, policy: &str) -> KmsResult<()>;

    async fn schedule_key_deletion(
        &self,
        region: &str,
        key_id: &str,
        pending_window_days: i32,
    ) -> KmsResult<()>;
}
