//! Business logic services for the water conditions service

pub mod cache;
pub mod conditions;
pub mod memory;
pub mod refresh;
pub mod refresh_state;
pub mod registry;
pub mod scheduler;

pub use cache::{CacheStore, PgCacheStore};
pub use conditions::{ConditionsReport, ConditionsService};
pub use memory::MemoryStore;
pub use refresh::{RateLimiter, RefreshCoordinator, RefreshError, RefreshSettings};
pub use refresh_state::{PgRefreshStateStore, RefreshStateStore};
pub use registry::{api_key_digest, LocationRegistry, PgLocationRegistry};
pub use scheduler::RefreshScheduler;
