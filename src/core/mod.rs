//! Core dispatch machinery.
//!
//! This module contains:
//! - WorkerPool: Bounded-concurrency executor with deadlines
//! - LookupCache: Compute-once memoization per namespace
//! - Dispatcher: Trigger notification and dispatch
//! - Kinds: Trigger check behaviors
//! - Pacing: Cooperative pauses in tight loops
//! - FileTriggerStore: Partial-update trigger persistence

pub mod cache;
pub mod dispatcher;
pub mod kinds;
pub mod pacing;
pub mod trigger_store;
pub mod worker_pool;

// Re-export commonly used types
pub use cache::{CacheError, LookupCache};
pub use dispatcher::{
    batch_size, split_batches, AggregatedFailure, BatchArgs, ConductCache, DispatchError,
    DispatchSettings, Dispatcher, CONDUCT_NAMESPACE,
};
pub use kinds::{KindRegistry, StaticKind, TickKind, TriggerKind};
pub use pacing::{Pacer, PacingPolicy};
pub use trigger_store::FileTriggerStore;
pub use worker_pool::{FailureKind, WorkFailure, WorkerPool};
