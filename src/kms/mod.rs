//! Customer managed key lifecycle: remote key service access, policy
//! documents, persisted key records and the engine tying them together.

pub mod aws;
pub mod client;
pub mod memory;
pub mod models;
pub mod policy;
pub mod service;
pub mod store;

pub use client::{KeyServiceClient, MIN_PENDING_WINDOW_DAYS};
pub use models::{KeyRecord, KeyRecordUpdate, KeyState, KeyUsage, RoleRecord};
pub use policy::KeyPolicyService;
pub use service::{KmsService, KmsServiceConfig, ValidationOutcome};
pub use store::{InMemoryKeyRecordStore, KeyRecordStore, PgKeyRecordStore};
