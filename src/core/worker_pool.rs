//! Bounded worker pool with per-unit deadlines.
//!
//! Submitting waits for a free slot instead of queueing without bound, but
//! never past the unit's deadline. Each unit runs on its own task; a unit
//! still running at its deadline is recorded as a timeout but left running,
//! and it keeps its slot until it actually finishes, so the concurrency
//! bound holds even for overruns.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why a unit failed
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// The unit returned an error
    Error(String),

    /// The unit did not finish by its deadline
    ///
    /// `budget` is the time that was left when the unit started, or when it
    /// was submitted if it never got a slot.
    Timeout { budget: Duration },

    /// The unit panicked
    Panicked(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(e) => write!(f, "error: {e}"),
            Self::Timeout { budget } => write!(f, "timed out after {:.3}s", budget.as_secs_f64()),
            Self::Panicked(e) => write!(f, "panicked: {e}"),
        }
    }
}

/// A failed unit together with the arguments it was submitted with
#[derive(Debug, Clone)]
pub struct WorkFailure<A> {
    pub label: String,
    pub kind: FailureKind,
    pub args: A,
}

/// Bounded-concurrency executor
pub struct WorkerPool<A> {
    size: usize,
    slots: Arc<Semaphore>,
    units: JoinSet<()>,
    failures: Arc<Mutex<Vec<WorkFailure<A>>>>,
    submitted: usize,
}

impl<A> WorkerPool<A>
where
    A: Clone + Send + 'static,
{
    /// Create a pool running at most `size` units at once (minimum 1)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            slots: Arc::new(Semaphore::new(size)),
            units: JoinSet::new(),
            failures: Arc::new(Mutex::new(Vec::new())),
            submitted: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of units submitted so far
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Submit one unit of work, waiting for a slot if the pool is full
    ///
    /// Both the wait and the run are bounded by the absolute `deadline`.
    pub async fn submit<F, Fut>(&mut self, label: impl Into<String>, args: A, deadline: Instant, work: F)
    where
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        self.submitted += 1;

        let waiting = deadline.saturating_duration_since(Instant::now());
        let acquire = Arc::clone(&self.slots).acquire_owned();
        let permit = match tokio::time::timeout_at(deadline, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                self.push_failure(WorkFailure {
                    label,
                    kind: FailureKind::Error("worker pool is stopped".to_string()),
                    args,
                });
                return;
            }
            Err(_) => {
                let kind = FailureKind::Timeout { budget: waiting };
                warn!(%label, failure = %kind, "Unit never got a slot");
                self.push_failure(WorkFailure { label, kind, args });
                return;
            }
        };

        let budget = deadline.saturating_duration_since(Instant::now());
        let failures = Arc::clone(&self.failures);
        let unit_args = args.clone();
        let mut handle = tokio::spawn(async move {
            let _permit = permit;
            work(unit_args).await
        });

        debug!(%label, budget_ms = budget.as_millis() as u64, "Unit submitted");

        self.units.spawn(async move {
            let kind = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => return,
                Ok(Ok(Err(e))) => FailureKind::Error(format!("{e:#}")),
                Ok(Err(join_error)) => FailureKind::Panicked(join_error.to_string()),
                Err(_) => FailureKind::Timeout { budget },
            };

            warn!(%label, failure = %kind, "Unit failed");
            failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(WorkFailure { label, kind, args });
        });
    }

    /// Wait until every submitted unit is accounted for
    pub async fn wait_all(&mut self) {
        while let Some(result) = self.units.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Unit supervisor ended abnormally");
            }
        }
    }

    /// Failure records in the order they were recorded
    pub fn failures(&self) -> Vec<WorkFailure<A>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn failure_count(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Release the pool; call after `wait_all`
    ///
    /// Returns the collected failures.
    pub fn stop(mut self) -> Vec<WorkFailure<A>> {
        self.slots.close();
        if !self.units.is_empty() {
            warn!(pending = self.units.len(), "Worker pool stopped with units still pending");
            self.units.detach_all();
        }

        self.failures()
    }

    fn push_failure(&self, failure: WorkFailure<A>) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(failure);
    }
}
