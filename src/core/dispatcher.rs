//! Trigger notification and dispatch.
//!
//! When a trigger fires, the dispatcher resolves the conducts fed by it,
//! fans the events out into per-event execution contexts, runs them inline
//! or in bounded-concurrency batches, and updates the trigger's
//! bookkeeping. A failed dispatch leaves `startCheck` set so the poller can
//! see the stuck run and apply its own retry policy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    AuditSink, Clock, ConductRef, ConductResolver, ConductUsage, ScheduleCalculator, SystemClock,
    TriggerPersistence,
};
use crate::domain::{
    audit_fields, fields, AttributeChange, CheckResult, ContextSeed, ExecutionContext, Trigger,
    TriggerError, DEFAULT_MAX_DURATION,
};

use super::cache::{CacheError, LookupCache};
use super::kinds::KindRegistry;
use super::pacing::PacingPolicy;
use super::worker_pool::{FailureKind, WorkFailure, WorkerPool};

/// Cache namespace holding each trigger's conduct list
pub const CONDUCT_NAMESPACE: &str = "conducts";

/// Stand-in deadline for budgets past what `Instant` can hold
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Conduct lists cached per trigger id
pub type ConductCache = LookupCache<Arc<Vec<ConductRef>>>;

/// Tunables for dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Budget used when a trigger's `maxDuration` is 0 (default: 60)
    pub default_max_duration: u64,

    /// Pause policy applied once per event
    pub pacing: PacingPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_max_duration: DEFAULT_MAX_DURATION,
            pacing: PacingPolicy::default(),
        }
    }
}

/// Arguments of one submitted batch, kept for failure reports
#[derive(Debug, Clone)]
pub struct BatchArgs {
    pub conduct_id: String,
    /// Index of the first event in this batch
    pub first_index: usize,
    pub contexts: Vec<ExecutionContext>,
}

/// Every failed unit of one dispatch
#[derive(Debug, Clone)]
pub struct AggregatedFailure {
    pub trigger_id: String,
    pub trigger_name: String,
    pub failures: Vec<WorkFailure<BatchArgs>>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(
        "Trigger '{}' ({}) crashed: {} workflow unit(s) failed",
        .0.trigger_name,
        .0.trigger_id,
        .0.failures.len()
    )]
    Aggregated(AggregatedFailure),

    #[error("Trigger check failed: {0:#}")]
    Check(#[source] anyhow::Error),

    #[error("Unknown trigger kind: {0}")]
    UnknownKind(String),

    #[error(transparent)]
    Attribute(#[from] TriggerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl DispatchError {
    /// The aggregated failure, if this is one
    pub fn aggregated(&self) -> Option<&AggregatedFailure> {
        match self {
            Self::Aggregated(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Contiguous batch size for `total` contexts split over `concurrency`
pub fn batch_size(total: usize, concurrency: usize) -> usize {
    if concurrency == 0 {
        return total.max(1);
    }
    (total / concurrency).max(1)
}

/// Split contexts into ordered batches of `batch_size(len, concurrency)`
pub fn split_batches<T>(items: Vec<T>, concurrency: usize) -> Vec<Vec<T>> {
    let size = batch_size(items.len(), concurrency);
    let mut batches = Vec::new();
    let mut iter = items.into_iter().peekable();

    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }

    batches
}

/// Absolute deadline `max_duration` seconds from now
///
/// Budgets too large for the timer saturate to a far-future deadline.
pub fn deadline_after(max_duration: u64) -> Instant {
    let now = Instant::now();
    now.checked_add(Duration::from_secs(max_duration))
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Dispatch engine for trigger notifications
pub struct Dispatcher {
    resolver: Arc<dyn ConductResolver>,
    scheduler: Arc<dyn ScheduleCalculator>,
    audit: Arc<dyn AuditSink>,
    persistence: Arc<dyn TriggerPersistence>,
    cache: Arc<ConductCache>,
    kinds: KindRegistry,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl Dispatcher {
    /// Create a dispatcher with a private cache, the built-in kinds and
    /// the system clock
    pub fn new(
        resolver: Arc<dyn ConductResolver>,
        scheduler: Arc<dyn ScheduleCalculator>,
        audit: Arc<dyn AuditSink>,
        persistence: Arc<dyn TriggerPersistence>,
    ) -> Self {
        let cache = Arc::new(ConductCache::new());
        cache.new_namespace(CONDUCT_NAMESPACE);

        Self {
            resolver,
            scheduler,
            audit,
            persistence,
            cache,
            kinds: KindRegistry::with_builtins(),
            clock: Arc::new(SystemClock),
            settings: DispatchSettings::default(),
        }
    }

    /// Share a cache across dispatchers
    pub fn with_cache(mut self, cache: Arc<ConductCache>) -> Self {
        cache.new_namespace(CONDUCT_NAMESPACE);
        self.cache = cache;
        self
    }

    pub fn with_kinds(mut self, kinds: KindRegistry) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cache(&self) -> &Arc<ConductCache> {
        &self.cache
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Set a trigger field by its persisted name
    ///
    /// Re-enabling a disabled trigger persists the cleared run markers
    /// right away; every other change is left for the caller to persist.
    pub async fn set_attribute(
        &self,
        trigger: &mut Trigger,
        name: &str,
        value: Value,
    ) -> Result<AttributeChange, DispatchError> {
        let change = trigger.set_attribute(name, value)?;

        if change == AttributeChange::Reenabled {
            self.persistence
                .update(trigger, &[fields::START_CHECK, fields::ATTEMPT_COUNT])
                .await
                .context("Failed to persist re-enabled trigger")?;
            info!(trigger_id = %trigger.id, "Trigger re-enabled, run markers cleared");
        }

        Ok(change)
    }

    /// Dispatch caller-supplied events, bypassing the trigger's check
    pub async fn force(&self, trigger: &mut Trigger, events: Vec<Value>) -> Result<ExecutionContext, DispatchError> {
        self.audit
            .record(
                "trigger",
                "force",
                audit_fields([
                    ("trigger_id", json!(trigger.id)),
                    ("trigger_name", json!(trigger.name)),
                    ("events", json!(events.len())),
                    ("user", json!("system")),
                ]),
            )
            .await;

        self.notify(trigger, events, None).await
    }

    /// Reset a stuck run marker so the poller treats the trigger as idle
    ///
    /// Returns false, writing nothing, when no marker was set.
    pub async fn clear_start_check(&self, trigger: &mut Trigger) -> Result<bool, DispatchError> {
        let stale = trigger.start_check;
        if !trigger.clear_start_check() {
            return Ok(false);
        }

        self.persistence
            .update(trigger, &[fields::START_CHECK])
            .await
            .context("Failed to persist cleared start check")?;
        self.audit
            .record(
                "trigger",
                "clear_start_check",
                audit_fields([
                    ("trigger_id", json!(trigger.id)),
                    ("trigger_name", json!(trigger.name)),
                    ("start_check", json!(stale)),
                ]),
            )
            .await;

        info!(trigger_id = %trigger.id, "Start check cleared");
        Ok(true)
    }

    /// Triggers no conduct references, enabled or not
    pub async fn unused<'a>(&self, triggers: &'a [Trigger]) -> Result<Vec<&'a Trigger>, DispatchError> {
        let mut unused = Vec::new();
        for trigger in triggers {
            if self.where_used(&trigger.id).await?.is_empty() {
                unused.push(trigger);
            }
        }
        Ok(unused)
    }

    /// Run the trigger's check and dispatch whatever it produced
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id, trigger = %trigger.name))]
    pub async fn check_handler(&self, trigger: &mut Trigger) -> Result<ExecutionContext, DispatchError> {
        let started = self.clock.now();
        self.audit
            .record(
                "trigger",
                "start",
                audit_fields([("trigger_id", json!(trigger.id)), ("trigger_name", json!(trigger.name))]),
            )
            .await;

        let result = self.do_check(trigger).await?;
        let seed = ContextSeed {
            var: result.var,
            plugin: result.plugin,
        };
        let seed = (!seed.is_empty()).then_some(seed);

        let context = self.notify(trigger, result.events, seed).await?;

        self.audit
            .record(
                "trigger",
                "end",
                audit_fields([
                    ("trigger_id", json!(trigger.id)),
                    ("trigger_name", json!(trigger.name)),
                    ("duration", json!(self.clock.now() - started)),
                ]),
            )
            .await;

        Ok(context)
    }

    /// Run the kind-specific check for a trigger
    pub async fn do_check(&self, trigger: &Trigger) -> Result<CheckResult, DispatchError> {
        let kind = self
            .kinds
            .get(&trigger.kind)
            .ok_or_else(|| DispatchError::UnknownKind(trigger.kind.clone()))?;

        let result = kind.check(trigger).await.map_err(DispatchError::Check)?;
        debug!(trigger_id = %trigger.id, events = result.events.len(), "Check produced events");
        Ok(result)
    }

    /// Conducts referencing a trigger, enabled or not
    pub async fn where_used(&self, trigger_id: &str) -> Result<Vec<ConductUsage>, DispatchError> {
        let usage = self
            .resolver
            .where_used(trigger_id)
            .await
            .with_context(|| format!("Failed to look up conducts using trigger {}", trigger_id))?;
        Ok(usage)
    }

    /// Dispatch events to every conduct fed by the trigger
    ///
    /// Returns the last execution context built. On an aggregated failure
    /// the trigger's bookkeeping is left untouched.
    #[instrument(
        skip(self, trigger, events, seed),
        fields(trigger_id = %trigger.id, trigger = %trigger.name, events = events.len())
    )]
    pub async fn notify(
        &self,
        trigger: &mut Trigger,
        events: Vec<Value>,
        seed: Option<ContextSeed>,
    ) -> Result<ExecutionContext, DispatchError> {
        let start_time = self.clock.now();
        trigger.start_time = start_time;

        let base = ExecutionContext::new(trigger.snapshot(), seed);
        let max_duration = trigger.effective_max_duration(self.settings.default_max_duration);
        let deadline = deadline_after(max_duration);
        let conducts = self.resolve_conducts(&trigger.id).await?;
        let mut final_context = base.clone();

        if conducts.is_empty() {
            self.auto_disable(trigger).await?;
        } else {
            let mut pacer = self.settings.pacing.pacer();
            let mut pool = (trigger.concurrency > 0)
                .then(|| WorkerPool::<BatchArgs>::new(trigger.concurrency));
            let total = events.len();

            for conduct in conducts.iter() {
                let conduct_context = base.for_conduct(&conduct.id, &conduct.name);
                let mut pending = Vec::with_capacity(if pool.is_some() { total } else { 0 });

                for (index, event) in events.iter().enumerate() {
                    let context = conduct_context.for_event(event, index, total);
                    if index + 1 == total {
                        final_context = context.clone();
                    }

                    if pool.is_some() {
                        pending.push(context);
                    } else if let Err(e) = conduct
                        .runner
                        .run_one(&trigger.id, context.clone(), false)
                        .await
                    {
                        error!(conduct_id = %conduct.id, index, error = %e, "Conduct run failed");
                        return Err(DispatchError::Aggregated(AggregatedFailure {
                            trigger_id: trigger.id.clone(),
                            trigger_name: trigger.name.clone(),
                            failures: vec![WorkFailure {
                                label: format!("trigger:{}", trigger.id),
                                kind: FailureKind::Error(format!("{e:#}")),
                                args: BatchArgs {
                                    conduct_id: conduct.id.clone(),
                                    first_index: index,
                                    contexts: vec![context],
                                },
                            }],
                        }));
                    }

                    pacer.tick().await;
                }

                if let Some(pool) = pool.as_mut() {
                    self.submit_batches(pool, trigger, conduct, pending, deadline)
                        .await;
                }
            }

            if let Some(mut pool) = pool {
                let submitted = pool.submitted();
                if submitted > 0 {
                    pool.wait_all().await;
                }
                let failures = pool.stop();

                if !failures.is_empty() {
                    error!(submitted, failed = failures.len(), "Dispatch crashed");
                    return Err(DispatchError::Aggregated(AggregatedFailure {
                        trigger_id: trigger.id.clone(),
                        trigger_name: trigger.name.clone(),
                        failures,
                    }));
                }
                debug!(submitted, "All batches completed");
            }
        }

        self.complete(trigger).await?;
        info!(conducts = conducts.len(), "Dispatch completed");

        Ok(final_context)
    }

    async fn resolve_conducts(&self, trigger_id: &str) -> Result<Arc<Vec<ConductRef>>, DispatchError> {
        let resolver = Arc::clone(&self.resolver);
        let conducts = self
            .cache
            .get(CONDUCT_NAMESPACE, trigger_id, move |id| async move {
                resolver.enabled_conducts(&id).await.map(Arc::new)
            })
            .await?;
        Ok(conducts)
    }

    async fn submit_batches(
        &self,
        pool: &mut WorkerPool<BatchArgs>,
        trigger: &Trigger,
        conduct: &ConductRef,
        contexts: Vec<ExecutionContext>,
        deadline: Instant,
    ) {
        let mut first_index = 0;

        for batch in split_batches(contexts, trigger.concurrency) {
            let budget = deadline.saturating_duration_since(Instant::now());
            let len = batch.len();

            let args = BatchArgs {
                conduct_id: conduct.id.clone(),
                first_index,
                contexts: batch,
            };
            first_index += len;

            debug!(
                conduct_id = %conduct.id,
                size = len,
                budget_ms = budget.as_millis() as u64,
                "Submitting batch"
            );

            let runner = Arc::clone(&conduct.runner);
            let trigger_id = trigger.id.clone();
            pool.submit(format!("trigger:{}", trigger.id), args, deadline, move |args| async move {
                runner.run_batch(&trigger_id, args.contexts, false).await
            })
            .await;
        }
    }

    async fn auto_disable(&self, trigger: &mut Trigger) -> Result<(), DispatchError> {
        warn!("No enabled conducts reference this trigger, disabling it");

        self.audit
            .record(
                "trigger",
                "auto_disable",
                audit_fields([("trigger_id", json!(trigger.id)), ("trigger_name", json!(trigger.name))]),
            )
            .await;

        trigger.enabled = false;
        self.persistence
            .update(trigger, &[fields::ENABLED])
            .await
            .context("Failed to persist auto-disabled trigger")?;

        Ok(())
    }

    async fn complete(&self, trigger: &mut Trigger) -> Result<(), DispatchError> {
        let now = self.clock.now();
        let next_check = self
            .scheduler
            .next_epoch(&trigger.schedule, now)
            .with_context(|| format!("Failed to schedule trigger {}", trigger.id))?;

        trigger.complete_check(now, next_check);
        self.persistence
            .update(trigger, &fields::BOOKKEEPING)
            .await
            .context("Failed to persist trigger bookkeeping")?;

        Ok(())
    }
}
