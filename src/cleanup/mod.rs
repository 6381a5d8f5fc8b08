pub mod api;
pub mod scheduler;
pub mod service;

pub use api::clean_up as cleanup_clean_up;
pub use scheduler::spawn as spawn_cleanup_scheduler;
pub use service::{CleanUpConfig, CleanUpReport, CleanUpRequest, CleanUpService, SweepCounts};
