pub mod arn;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod kms;
pub mod routes;
pub mod supply;

pub use config::{
    clean_up_config_from_env, kms_service_config_from_env, KmsBackend, KMS_BACKEND,
};
