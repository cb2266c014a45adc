//! conductor - Trigger notification and dispatch engine
//!
//! Triggers detect conditions and emit events; events fan out into
//! conducts (workflows). When a trigger fires, conductor finds the conducts
//! fed by it, copies an execution context per conduct and per event, runs
//! the conducts inline or in bounded-concurrency batches under a time
//! budget, and updates the trigger's bookkeeping.
//!
//! # Modules
//!
//! - `adapters`: Collaborator seams (runner, resolver, scheduler, audit,
//!   persistence, clock) and their file-backed implementations
//! - `core`: Dispatch machinery (Dispatcher, WorkerPool, LookupCache, kinds)
//! - `domain`: Data structures (Trigger, ExecutionContext, conduct flows)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register a trigger
//! conductor create nightly --schedule 1h --concurrency 4
//!
//! # Run its check and dispatch now
//! conductor fire nightly
//!
//! # Which conducts use it
//! conductor where-used nightly
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{DispatchError, Dispatcher, LookupCache, WorkerPool};
pub use domain::{ExecutionContext, Trigger, TriggerState};
