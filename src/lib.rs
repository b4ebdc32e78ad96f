// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod config;
pub mod error;
pub mod funnel;
pub mod metrics;
pub mod migrate;
pub mod model;
pub mod pool;
pub mod stats;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::model::{ExitReason, Item, NewItem, PoolStatus, SourceCounters};
pub use crate::pool::Transition;
