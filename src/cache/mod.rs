//! Cache coherency and refresh coordination.
//!
//! Every piece of shared state lives in a [`BackingStore`]:
//!
//! - **Lock Manager**: `<key>:lock` markers giving one writer per key
//! - **Root Cache**: shared dataset values, recomputed under their lock
//! - **View Cache**: per-session snapshots, stable until explicitly refreshed
//! - **Liveness Registry**: session checkins, used by the **Sweeper** to reclaim
//!   abandoned snapshots and temporary uploads
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! lock_retry_ms = 50
//! lock_ttl_secs = 60
//! checkins_lock_ttl_secs = 10
//! staleness_window_secs = 60
//! # ... see config.rs for all options
//! ```

mod config;
mod error;
mod liveness;
mod lock;
mod root;
mod store;
mod sweeper;
mod sync;
mod view;

pub use config::{CacheConfig, LockClass, LockPolicy};
pub use error::{CacheError, ResolveError, StoreError};
pub use liveness::{LivenessRegistry, now_unix};
pub use lock::{LockGuard, LockManager};
pub use root::{RecomputeOutcome, RootCache, SourceResolver};
pub use store::{BackingStore, MemoryStore};
pub use sweeper::{SweepReport, Sweeper};
pub use view::ViewCache;
