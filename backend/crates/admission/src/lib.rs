//! Admission Control - Virtual Queue Module
//!
//! Clean Architecture structure:
//! - `domain/` - QueuePosition, PrincipalId, repository traits
//! - `application/` - Virtual queue use cases and configuration
//! - `infra/` - Store-backed repository
//! - `presentation/` - HTTP handlers and rate-limit middleware
//! - `scheduler` - Timeout sweep and processing-rate recomputation
//!
//! ## Consistency Model
//! - All queue state lives in the shared store; service instances are stateless
//! - Enqueue (capacity check + duplicate check + insert) runs under a
//!   per-principal distributed lock
//! - Removal, position reads and rate limiting are individually atomic and lock-free
//! - Admission rejections are user-facing outcomes; only store failures are errors

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;
pub mod scheduler;

// Re-exports for convenience
pub use application::config::QueueConfig;
pub use application::virtual_queue::VirtualQueue;
pub use domain::entities::{Admission, QueuePosition};
pub use domain::value_objects::PrincipalId;
pub use error::{QueueError, QueueResult};
pub use infra::store::StoreQueueRepository;
pub use presentation::router::queue_router;
pub use scheduler::{QueueMaintenanceScheduler, SchedulerHandle};

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

use platform::lock::DistributedLockManager;
use platform::store::SharedStore;
use std::sync::Arc;

/// Virtual queue over a store-backed repository
pub type StoreVirtualQueue<S> = VirtualQueue<StoreQueueRepository<S>, S>;

/// Wire a [`StoreVirtualQueue`] whose repository and locks share `store`.
pub fn store_virtual_queue<S>(
    store: S,
    locks: platform::lock::LockConfig,
    config: QueueConfig,
) -> StoreVirtualQueue<S>
where
    S: SharedStore,
{
    VirtualQueue::new(
        Arc::new(StoreQueueRepository::new(store.clone())),
        DistributedLockManager::new(store, locks),
        Arc::new(config),
    )
}
