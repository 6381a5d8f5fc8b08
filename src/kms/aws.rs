//! AWS KMS implementation of [`KeyServiceClient`].
//!
//! One SDK client is built per region on first use and cached for the lifetime
//! of the process; all of them share the credentials and retry settings of the
//! base [`SdkConfig`].

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_kms::config::Region;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::types::KeyUsageType;
use aws_sdk_kms::Client;
use dashmap::DashMap;
use tracing::debug;

use super::client::{KeyServiceClient, DEFAULT_POLICY_NAME};
use super::models::{CreatedKey, KeyState, KeyUsage};
use crate::error::{KmsError, KmsResult};

const NOT_FOUND_CODE: &str = "NotFoundException";

pub struct AwsKeyServiceClient {
    base: SdkConfig,
    clients: DashMap<String, Client>,
}

impl AwsKeyServiceClient {
    pub async fn from_env() -> Self {
        Self::new(aws_config::load_defaults(BehaviorVersion::latest()).await)
    }

    pub fn new(base: SdkConfig) -> Self {
        Self {
            base,
            clients: DashMap::new(),
        }
    }

    fn client(&self, region: &str) -> Client {
        if let Some(client) = self.clients.get(region) {
            return client.clone();
        }
        debug!(%region, "building kms client");
        let config = aws_sdk_kms::config::Builder::from(&self.base)
            .region(Region::new(region.to_string()))
            .build();
        let client = Client::from_conf(config);
        self.clients
            .entry(region.to_string())
            .or_insert(client)
            .clone()
    }
}

fn map_sdk_error<E, R>(operation: &'static str, key_id: &str, err: SdkError<E, R>) -> KmsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if err.as_service_error().and_then(|service| service.code()) == Some(NOT_FOUND_CODE) {
        return KmsError::NotFoundRemote(key_id.to_string());
    }
    KmsError::remote(operation, DisplayErrorContext(&err).to_string())
}

fn key_usage_type(usage: KeyUsage) -> KeyUsageType {
    match usage {
        KeyUsage::EncryptDecrypt => KeyUsageType::EncryptDecrypt,
    }
}

#[async_trait]
impl KeyServiceClient for AwsKeyServiceClient {
    async fn create_key(
        &self,
        region: &str,
        usage: KeyUsage,
        description: &str,
        policy: &str,
    ) -> KmsResult<CreatedKey> {
        let output = self
            .client(region)
            .create_key()
            .key_usage(key_usage_type(usage))
            .description(description)
            .policy(policy)
            .send()
            .await
            .map_err(|err| map_sdk_error("CreateKey", "", err))?;

        let metadata = output
            .key_metadata()
            .ok_or_else(|| KmsError::remote("CreateKey", "response carried no key metadata"))?;
        let arn = metadata
            .arn()
            .ok_or_else(|| KmsError::remote("CreateKey", "response carried no key arn"))?;

        Ok(CreatedKey {
            key_id: metadata.key_id().to_string(),
            arn: arn.to_string(),
        })
    }

    async fn create_alias(&self, region: &str, alias: &str, target_arn: &str) -> KmsResult<()> {
        self.client(region)
            .create_alias()
            .alias_name(alias)
            .target_key_id(target_arn)
            .send()
            .await
            .map_err(|err| map_sdk_error("CreateAlias", target_arn, err))?;
        Ok(())
    }

    async fn describe_key(&self, region: &str, key_id: &str) -> KmsResult<KeyState> {
        let output = self
            .client(region)
            .describe_key()
            .key_id(key_id)
            .send()
            .await
            .map_err(|err| map_sdk_error("DescribeKey", key_id, err))?;

        output
            .key_metadata()
            .and_then(|metadata| metadata.key_state())
            .map(|state| KeyState::from_str(state.as_str()))
            .ok_or_else(|| KmsError::remote("DescribeKey", "response carried no key state"))
    }

    async fn get_key_policy(&self, region: &str, key_id: &str) -> KmsResult<String> {
        let output = self
            .client(region)
            .get_key_policy()
            .key_id(key_id)
            .policy_name(DEFAULT_POLICY_NAME)
            .send()
            .await
            .map_err(|err| map_sdk_error("GetKeyPolicy", key_id, err))?;

        output
            .policy()
            .map(str::to_string)
            .ok_or_else(|| KmsError::remote("GetKeyPolicy", "response carried no policy"))
    }

    async fn put_key_policy(&self, region: &str, key_id: &str, policy: &str) -> KmsResult<()> {
        self.client(region)
            .put_key_policy()
            .key_id(key_id)
            .policy_name(DEFAULT_POLICY_NAME)
            .policy(policy)
            .send()
            .await
            .map_err(|err| map_sdk_error("PutKeyPolicy", key_id, err))?;
        Ok(())
    }

    async fn schedule_key_deletion(
        &self,
        region: &str,
        key_id: &str,
        pending_window_days: i32,
    ) -> KmsResult<()> {
        self.client(region)
            .schedule_key_deletion()
            .key_id(key_id)
            .pending_window_in_days(pending_window_days)
            .send()
            .await
            .map_err(|err| map_sdk_error("ScheduleKeyDeletion", key_id, err))?;
        Ok(())
    }
}
