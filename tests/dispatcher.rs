//! Dispatcher Integration Tests
//!
//! Drives `notify` and `check_handler` against in-memory collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use conductor::adapters::{
    Clock, ConductRef, ConductResolver, ConductRunner, ConductUsage, MemoryAuditSink,
    ScheduleCalculator, TriggerPersistence,
};
use conductor::core::{
    ConductCache, DispatchError, DispatchSettings, Dispatcher, FailureKind, KindRegistry,
    PacingPolicy, TriggerKind,
};
use conductor::domain::{
    fields, AttributeChange, CheckResult, ContextSeed, ExecutionContext, Trigger,
};

const NOW: f64 = 1_700_000_000.0;
const NEXT: i64 = 1_700_000_300;

// ============================================================================
// Test doubles
// ============================================================================

/// Records every invocation; optionally slow or failing
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Vec<ExecutionContext>>>,
    batched: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Option<Duration>,
    fail_at_event: Option<usize>,
}

impl RecordingRunner {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn failing_at(index: usize) -> Self {
        Self {
            fail_at_event: Some(index),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Vec<ExecutionContext>> {
        self.calls.lock().unwrap().clone()
    }

    fn contexts(&self) -> Vec<ExecutionContext> {
        self.calls().into_iter().flatten().collect()
    }

    async fn invoke(&self, contexts: Vec<ExecutionContext>) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fails = contexts
            .iter()
            .any(|c| c.stats().map(|s| s.current) == self.fail_at_event);
        self.calls.lock().unwrap().push(contexts);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if fails {
            anyhow::bail!("conduct action failed");
        }
        Ok(())
    }
}

#[async_trait]
impl ConductRunner for RecordingRunner {
    async fn run_one(&self, _trigger_id: &str, context: ExecutionContext, _sync: bool) -> Result<()> {
        self.invoke(vec![context]).await
    }

    async fn run_batch(
        &self,
        _trigger_id: &str,
        contexts: Vec<ExecutionContext>,
        _sync: bool,
    ) -> Result<()> {
        self.batched.fetch_add(1, Ordering::SeqCst);
        self.invoke(contexts).await
    }
}

/// Resolves a fixed conduct list, counting lookups
struct FixedResolver {
    conducts: Vec<(String, String)>,
    runner: Arc<RecordingRunner>,
    lookups: AtomicUsize,
}

#[async_trait]
impl ConductResolver for FixedResolver {
    async fn enabled_conducts(&self, _trigger_id: &str) -> Result<Vec<ConductRef>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .conducts
            .iter()
            .map(|(id, name)| ConductRef {
                id: id.clone(),
                name: name.clone(),
                runner: self.runner.clone(),
            })
            .collect())
    }

    async fn where_used(&self, _trigger_id: &str) -> Result<Vec<ConductUsage>> {
        Ok(self
            .conducts
            .iter()
            .map(|(id, name)| ConductUsage {
                conduct_id: id.clone(),
                conduct_name: name.clone(),
            })
            .collect())
    }
}

struct FixedScheduler;

impl ScheduleCalculator for FixedScheduler {
    fn next_epoch(&self, _schedule: &str, _now: f64) -> Result<i64> {
        Ok(NEXT)
    }
}

struct FixedClock(f64);

impl Clock for FixedClock {
    fn now(&self) -> f64 {
        self.0
    }
}

/// Starts at `NOW` and moves with tokio's (pausable) clock
struct TokioClock(Instant);

impl TokioClock {
    fn new() -> Self {
        Self(Instant::now())
    }
}

impl Clock for TokioClock {
    fn now(&self) -> f64 {
        NOW + self.0.elapsed().as_secs_f64()
    }
}

/// Keeps the last persisted value of every field
#[derive(Default)]
struct MemoryPersistence {
    writes: Mutex<Vec<Vec<String>>>,
    fields: Mutex<HashMap<String, Value>>,
}

impl MemoryPersistence {
    fn writes(&self) -> Vec<Vec<String>> {
        self.writes.lock().unwrap().clone()
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl TriggerPersistence for MemoryPersistence {
    async fn update(&self, trigger: &Trigger, names: &[&str]) -> Result<()> {
        let doc = serde_json::to_value(trigger)?;
        let mut stored = self.fields.lock().unwrap();
        for name in names {
            stored.insert(name.to_string(), doc[*name].clone());
        }
        self.writes
            .lock()
            .unwrap()
            .push(names.iter().map(|n| n.to_string()).collect());
        Ok(())
    }
}

struct Harness {
    dispatcher: Dispatcher,
    runner: Arc<RecordingRunner>,
    resolver: Arc<FixedResolver>,
    audit: Arc<MemoryAuditSink>,
    persistence: Arc<MemoryPersistence>,
}

fn harness(conducts: &[(&str, &str)], runner: RecordingRunner) -> Harness {
    harness_with_clock(conducts, runner, Arc::new(FixedClock(NOW)))
}

fn harness_with_clock(
    conducts: &[(&str, &str)],
    runner: RecordingRunner,
    clock: Arc<dyn Clock>,
) -> Harness {
    let runner = Arc::new(runner);
    let resolver = Arc::new(FixedResolver {
        conducts: conducts
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect(),
        runner: runner.clone(),
        lookups: AtomicUsize::new(0),
    });
    let audit = Arc::new(MemoryAuditSink::new());
    let persistence = Arc::new(MemoryPersistence::default());

    let dispatcher = Dispatcher::new(
        resolver.clone(),
        Arc::new(FixedScheduler),
        audit.clone(),
        persistence.clone(),
    )
    .with_clock(clock)
    .with_settings(DispatchSettings {
        pacing: PacingPolicy::disabled(),
        ..Default::default()
    });

    Harness {
        dispatcher,
        runner,
        resolver,
        audit,
        persistence,
    }
}

/// A trigger mid-run, as the poller leaves it
fn running_trigger(concurrency: usize) -> Trigger {
    let mut trigger = Trigger::new("orders", "tick");
    trigger.schedule = "5m".to_string();
    trigger.concurrency = concurrency;
    trigger.enabled = true;
    trigger.begin_check(NOW - 5.0);
    trigger
}

fn events(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!({ "n": i })).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_sequential_dispatch_runs_in_event_order() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);

    let context = assert_ok!(h.dispatcher.notify(&mut trigger, events(3), None).await);

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(h.runner.batched.load(Ordering::SeqCst), 0);

    for (i, call) in calls.iter().enumerate() {
        assert_eq!(call.len(), 1);
        let ctx = &call[0];
        let stats = ctx.stats().unwrap();
        assert_eq!(stats.current, i);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.first, i == 0);
        assert_eq!(stats.last, i == 2);
        assert_eq!(ctx.event.as_ref().unwrap().event, json!({ "n": i }));
        assert_eq!(ctx.flow.conduct_id.as_deref(), Some("c1"));
        assert_eq!(ctx.flow.conduct_name.as_deref(), Some("Order intake"));
        assert_eq!(ctx.flow.trigger_id, trigger.id);
    }

    // The returned context is the last one built
    assert_eq!(context.stats().unwrap().current, 2);
    assert!(context.stats().unwrap().last);
}

#[tokio::test]
async fn test_batched_dispatch_splits_contiguously() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(2);

    assert_ok!(h.dispatcher.notify(&mut trigger, events(5), None).await);

    let mut sizes: Vec<(usize, usize)> = h
        .runner
        .calls()
        .iter()
        .map(|batch| (batch[0].stats().unwrap().current, batch.len()))
        .collect();
    sizes.sort();

    assert_eq!(sizes, vec![(0, 2), (2, 2), (4, 1)]);
    assert_eq!(h.runner.batched.load(Ordering::SeqCst), 3);

    let mut covered: Vec<usize> = h
        .runner
        .contexts()
        .iter()
        .map(|c| c.stats().unwrap().current)
        .collect();
    covered.sort();
    assert_eq!(covered, vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_max_duration_uses_default_budget() {
    // Each batch takes 30s: inside the 60s default, outside a 0s budget
    let h = harness(&[("c1", "Order intake")], RecordingRunner::slow(Duration::from_secs(30)));
    let mut trigger = running_trigger(1);
    trigger.max_duration = 0;

    assert_ok!(h.dispatcher.notify(&mut trigger, events(1), None).await);

    assert_eq!(h.runner.contexts().len(), 1);
    assert_eq!(trigger.start_check, 0.0);
}

#[tokio::test]
async fn test_no_conducts_disables_trigger() {
    let h = harness(&[], RecordingRunner::default());
    let mut trigger = running_trigger(0);

    assert_ok!(h.dispatcher.notify(&mut trigger, events(2), None).await);

    assert!(!trigger.enabled);
    assert!(h.runner.calls().is_empty());
    assert_eq!(h.persistence.field(fields::ENABLED), Some(json!(false)));

    let disabled = h.audit.matching("trigger", "auto_disable");
    assert_eq!(disabled.len(), 1);
    assert_eq!(disabled[0].field_str("trigger_id"), Some(trigger.id.as_str()));
    assert_eq!(disabled[0].field_str("trigger_name"), Some("orders"));

    // Bookkeeping still completes
    assert_eq!(trigger.start_check, 0.0);
    assert_eq!(trigger.last_check, NOW);
    assert_eq!(trigger.next_check, NEXT);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_aggregated_failure() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::slow(Duration::from_secs(5)));
    let mut trigger = running_trigger(1);
    trigger.max_duration = 1;
    let started = trigger.start_check;

    let err = assert_err!(h.dispatcher.notify(&mut trigger, events(1), None).await);

    let failure = err.aggregated().expect("aggregated failure");
    assert_eq!(failure.trigger_id, trigger.id);
    assert_eq!(failure.trigger_name, "orders");
    assert_eq!(failure.failures.len(), 1);
    assert_eq!(
        failure.failures[0].kind,
        FailureKind::Timeout {
            budget: Duration::from_secs(1)
        }
    );
    assert_eq!(failure.failures[0].args.conduct_id, "c1");

    // Bookkeeping untouched so the poller sees the stuck run
    assert_eq!(trigger.start_check, started);
    assert_eq!(trigger.attempt_count, 1);
    assert!(h.persistence.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_batch_gets_what_is_left_of_the_budget() {
    // Two slots, three single-event batches of 40s each against a 60s budget
    let h = harness_with_clock(
        &[("c1", "Order intake")],
        RecordingRunner::slow(Duration::from_secs(40)),
        Arc::new(TokioClock::new()),
    );
    let mut trigger = running_trigger(2);
    trigger.max_duration = 60;
    let started = Instant::now();

    let err = assert_err!(h.dispatcher.notify(&mut trigger, events(3), None).await);

    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert_eq!(h.runner.contexts().len(), 2);

    let failure = err.aggregated().expect("aggregated failure");
    assert_eq!(failure.failures.len(), 1);
    assert_eq!(failure.failures[0].args.first_index, 2);
    assert_eq!(
        failure.failures[0].kind,
        FailureKind::Timeout {
            budget: Duration::from_secs(20)
        }
    );
    assert!(h.persistence.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_saturated_pool_times_out_at_deadline() {
    // One slot shared by two conducts, and the runner never finishes
    let h = harness_with_clock(
        &[("c1", "First"), ("c2", "Second")],
        RecordingRunner::slow(Duration::from_secs(86_400)),
        Arc::new(TokioClock::new()),
    );
    let mut trigger = running_trigger(1);
    trigger.max_duration = 60;
    let started = Instant::now();

    let result = tokio::time::timeout(
        Duration::from_secs(3_600),
        h.dispatcher.notify(&mut trigger, events(1), None),
    )
    .await
    .expect("notify returns once the deadline passes");

    assert_eq!(started.elapsed(), Duration::from_secs(60));
    let err = assert_err!(result);
    let mut failures = err.aggregated().expect("aggregated failure").failures.clone();
    failures.sort_by(|a, b| a.args.conduct_id.cmp(&b.args.conduct_id));

    let conducts: Vec<&str> = failures.iter().map(|f| f.args.conduct_id.as_str()).collect();
    assert_eq!(conducts, vec!["c1", "c2"]);
    for failure in &failures {
        assert_eq!(
            failure.kind,
            FailureKind::Timeout {
                budget: Duration::from_secs(60)
            }
        );
    }
    assert_eq!(h.runner.peak.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_success_resets_bookkeeping() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);
    trigger.attempt_count = 2;

    assert_ok!(h.dispatcher.notify(&mut trigger, events(1), None).await);

    assert_eq!(trigger.start_check, 0.0);
    assert_eq!(trigger.attempt_count, 0);
    assert_eq!(trigger.last_check, NOW);
    assert_eq!(trigger.next_check, NEXT);
    assert_eq!(trigger.start_time, NOW);

    let writes = h.persistence.writes();
    assert_eq!(writes.len(), 1);
    let mut written = writes[0].clone();
    written.sort();
    let mut expected: Vec<String> = fields::BOOKKEEPING.iter().map(|f| f.to_string()).collect();
    expected.sort();
    assert_eq!(written, expected);
    assert_eq!(h.persistence.field(fields::NEXT_CHECK), Some(json!(NEXT)));
}

#[tokio::test]
async fn test_empty_events_still_complete() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(3);

    let context = assert_ok!(h.dispatcher.notify(&mut trigger, Vec::new(), None).await);

    assert!(h.runner.calls().is_empty());
    assert!(context.event.is_none());
    assert!(trigger.enabled);
    assert_eq!(trigger.start_check, 0.0);
}

#[tokio::test]
async fn test_sequential_failure_stops_dispatch() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::failing_at(1));
    let mut trigger = running_trigger(0);

    let err = assert_err!(h.dispatcher.notify(&mut trigger, events(4), None).await);

    let failure = err.aggregated().expect("aggregated failure");
    assert_eq!(failure.failures.len(), 1);
    assert_eq!(failure.failures[0].args.first_index, 1);
    assert!(matches!(failure.failures[0].kind, FailureKind::Error(_)));

    // Events after the failure are not run
    assert_eq!(h.runner.calls().len(), 2);
    assert!(trigger.start_check > 0.0);
}

#[tokio::test]
async fn test_batch_failure_waits_for_all_batches() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::failing_at(0));
    let mut trigger = running_trigger(2);

    let err = assert_err!(h.dispatcher.notify(&mut trigger, events(4), None).await);

    assert_eq!(err.aggregated().unwrap().failures.len(), 1);
    assert_eq!(h.runner.contexts().len(), 4);
    assert!(h.persistence.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_spans_conducts() {
    let h = harness(
        &[("c1", "First"), ("c2", "Second")],
        RecordingRunner::slow(Duration::from_millis(50)),
    );
    let mut trigger = running_trigger(2);
    trigger.max_duration = 600;

    assert_ok!(h.dispatcher.notify(&mut trigger, events(6), None).await);

    assert_eq!(h.runner.contexts().len(), 12);
    assert!(h.runner.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_contexts_are_independent_copies() {
    let h = harness(&[("c1", "First"), ("c2", "Second")], RecordingRunner::default());
    let mut trigger = running_trigger(0);
    let seed = ContextSeed {
        var: serde_json::from_value(json!({ "region": "eu" })).unwrap(),
        ..Default::default()
    };

    assert_ok!(h.dispatcher.notify(&mut trigger, events(2), Some(seed)).await);

    let mut contexts = h.runner.contexts();
    assert_eq!(contexts.len(), 4);

    contexts[0].persistent.var.insert("region".to_string(), json!("us"));
    contexts[0].flow.conduct_name = Some("mutated".to_string());

    for ctx in &contexts[1..] {
        assert_eq!(ctx.persistent.var["region"], json!("eu"));
        assert_ne!(ctx.flow.conduct_name.as_deref(), Some("mutated"));
    }

    let conducts: Vec<&str> = contexts[1..]
        .iter()
        .map(|c| c.flow.conduct_id.as_deref().unwrap())
        .collect();
    assert_eq!(conducts, vec!["c1", "c2", "c2"]);
}

#[tokio::test]
async fn test_conduct_lookup_is_cached() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);

    assert_ok!(h.dispatcher.notify(&mut trigger, events(1), None).await);
    assert_ok!(h.dispatcher.notify(&mut trigger, events(1), None).await);
    assert_eq!(h.resolver.lookups.load(Ordering::SeqCst), 1);

    h.dispatcher.cache().clear_all();
    assert_ok!(h.dispatcher.notify(&mut trigger, events(1), None).await);
    assert_eq!(h.resolver.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reenable_clears_run_markers() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);
    trigger.enabled = false;
    trigger.attempt_count = 3;

    let change = assert_ok!(
        h.dispatcher
            .set_attribute(&mut trigger, fields::ENABLED, json!(true))
            .await
    );

    assert_eq!(change, AttributeChange::Reenabled);
    assert_eq!(trigger.start_check, 0.0);
    assert_eq!(trigger.attempt_count, 0);
    assert_eq!(h.persistence.field(fields::START_CHECK), Some(json!(0.0)));
    assert_eq!(h.persistence.field(fields::ATTEMPT_COUNT), Some(json!(0)));

    // Enabling an enabled trigger is a plain set
    let change = assert_ok!(
        h.dispatcher
            .set_attribute(&mut trigger, fields::ENABLED, json!(true))
            .await
    );
    assert_eq!(change, AttributeChange::Set);
    assert_eq!(h.persistence.writes().len(), 1);
}

// ============================================================================
// check_handler
// ============================================================================

#[tokio::test]
async fn test_check_handler_audits_start_and_end() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);

    let context = assert_ok!(h.dispatcher.check_handler(&mut trigger).await);

    assert_eq!(context.event.unwrap().event, json!({ "tick": true }));
    assert!(context.persistent.var.is_empty());

    let events: Vec<String> = h.audit.records().into_iter().map(|r| r.event).collect();
    assert_eq!(events, vec!["start", "end"]);

    let end = &h.audit.matching("trigger", "end")[0];
    assert_eq!(end.fields["duration"], json!(0.0));
}

#[tokio::test]
async fn test_check_handler_seeds_context_from_static_check() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);
    trigger.kind = "static".to_string();
    trigger.config = json!({
        "events": [{ "id": 1 }, { "id": 2 }],
        "var": { "batch": "nightly" },
        "plugin": { "crm": { "token": "abc" } }
    });

    assert_ok!(h.dispatcher.check_handler(&mut trigger).await);

    let contexts = h.runner.contexts();
    assert_eq!(contexts.len(), 2);
    for ctx in &contexts {
        assert_eq!(ctx.persistent.var["batch"], json!("nightly"));
        assert_eq!(ctx.persistent.plugin["crm"]["token"], json!("abc"));
        assert_eq!(ctx.persistent.trigger.kind, "static");
    }
}

#[tokio::test]
async fn test_check_failure_leaves_bookkeeping() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);
    trigger.kind = "static".to_string();
    trigger.config = json!({ "events": 42 });

    let err = assert_err!(h.dispatcher.check_handler(&mut trigger).await);
    assert!(matches!(err, DispatchError::Check(_)));

    trigger.kind = "webhook".to_string();
    let err = assert_err!(h.dispatcher.check_handler(&mut trigger).await);
    assert!(matches!(err, DispatchError::UnknownKind(ref k) if k == "webhook"));

    assert!(h.runner.calls().is_empty());
    assert!(h.persistence.writes().is_empty());
    assert!(h.audit.matching("trigger", "end").is_empty());
}

/// Emits `concurrency` events
struct BurstKind;

#[async_trait]
impl TriggerKind for BurstKind {
    fn id(&self) -> &str {
        "burst"
    }

    async fn check(&self, trigger: &Trigger) -> Result<CheckResult> {
        Ok(CheckResult {
            events: events(trigger.concurrency.max(1) * 2),
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn test_registered_kind_and_shared_cache() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut kinds = KindRegistry::with_builtins();
    kinds.register(Arc::new(BurstKind));

    let cache = Arc::new(ConductCache::new());
    let dispatcher = Dispatcher::new(
        h.resolver.clone(),
        Arc::new(FixedScheduler),
        h.audit.clone(),
        h.persistence.clone(),
    )
    .with_cache(cache.clone())
    .with_kinds(kinds)
    .with_clock(Arc::new(FixedClock(NOW)));

    let mut trigger = running_trigger(2);
    trigger.kind = "burst".to_string();
    assert_ok!(dispatcher.check_handler(&mut trigger).await);
    assert_eq!(h.runner.contexts().len(), 4);

    // A second dispatcher over the same cache does not resolve again
    let other = Dispatcher::new(
        h.resolver.clone(),
        Arc::new(FixedScheduler),
        h.audit.clone(),
        h.persistence.clone(),
    )
    .with_cache(cache.clone())
    .with_clock(Arc::new(FixedClock(NOW)));
    assert_ok!(other.notify(&mut trigger, events(1), None).await);

    assert_eq!(h.resolver.lookups.load(Ordering::SeqCst), 1);
    assert!(cache.contains("conducts", &trigger.id));
}

#[tokio::test]
async fn test_force_dispatches_given_events() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);
    trigger.kind = "static".to_string();
    trigger.config = json!({ "events": [{ "from": "check" }] });

    let given = vec![json!({ "order": 1 }), json!({ "order": 2 })];
    assert_ok!(h.dispatcher.force(&mut trigger, given.clone()).await);

    let seen: Vec<Value> = h
        .runner
        .contexts()
        .into_iter()
        .map(|c| c.event.unwrap().event)
        .collect();
    assert_eq!(seen, given);

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, "trigger");
    assert_eq!(records[0].event, "force");
    assert_eq!(records[0].field_str("trigger_name"), Some("orders"));
    assert_eq!(records[0].fields["events"], json!(2));

    assert_eq!(trigger.next_check, NEXT);
}

#[tokio::test]
async fn test_clear_start_check_persists_and_audits() {
    let h = harness(&[("c1", "Order intake")], RecordingRunner::default());
    let mut trigger = running_trigger(0);

    assert!(assert_ok!(h.dispatcher.clear_start_check(&mut trigger).await));
    assert_eq!(trigger.start_check, 0.0);
    assert_eq!(h.persistence.writes(), vec![vec![fields::START_CHECK.to_string()]]);
    assert_eq!(h.persistence.field(fields::START_CHECK), Some(json!(0.0)));

    let cleared = h.audit.matching("trigger", "clear_start_check");
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].fields["start_check"], json!(NOW - 5.0));

    // Nothing to clear the second time
    assert!(!assert_ok!(h.dispatcher.clear_start_check(&mut trigger).await));
    assert_eq!(h.persistence.writes().len(), 1);
}

#[tokio::test]
async fn test_where_used_lists_conducts() {
    let h = harness(&[("c1", "First"), ("c2", "Second")], RecordingRunner::default());

    let usage = assert_ok!(h.dispatcher.where_used("any").await);
    let names: Vec<&str> = usage.iter().map(|u| u.conduct_name.as_str()).collect();
    assert_eq!(names, vec!["First", "Second"]);

    let json = serde_json::to_value(&usage[0]).unwrap();
    assert_eq!(json, json!({ "conductID": "c1", "conductName": "First" }));
}
