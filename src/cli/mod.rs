//! Command-line interface for conductor.
//!
//! Provides commands for registering triggers, enabling and disabling
//! them, firing a check (or hand-picked events) by hand, clearing stuck run
//! markers, inspecting which conducts use a trigger, and editing transition
//! logic in the conduct workspace.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::adapters::workspace::Workspace;
use crate::adapters::{
    AuditSink, IntervalScheduler, JsonlAuditSink, TracingRunner, TriggerPersistence,
    WorkspaceResolver,
};
use crate::config;
use crate::core::{DispatchError, Dispatcher, FileTriggerStore, CONDUCT_NAMESPACE};
use crate::domain::{audit_fields, fields, AttributeChange, ExecutionContext, FlowLogic, Trigger};

/// conductor - Trigger notification and dispatch engine
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a new trigger
    Create {
        /// Trigger name
        name: String,

        /// Trigger kind (tick, static)
        #[arg(short, long, default_value = "tick")]
        kind: String,

        /// Check interval (e.g. 30s, 5m, 1h)
        #[arg(short, long, default_value = "60s")]
        schedule: String,

        /// Conduct invocations allowed at once (0 runs inline)
        #[arg(short, long, default_value = "0")]
        concurrency: usize,

        /// Dispatch time budget in seconds (0 uses the default)
        #[arg(long, default_value = "0")]
        max_duration: u64,

        /// Free-form comment
        #[arg(long)]
        comment: Option<String>,

        /// Enable the trigger right away
        #[arg(long)]
        enable: bool,
    },

    /// List registered triggers
    Triggers,

    /// Enable a trigger
    Enable {
        /// Trigger ID or name
        trigger: String,
    },

    /// Disable a trigger
    Disable {
        /// Trigger ID or name
        trigger: String,
    },

    /// Run a trigger's check and dispatch its events now
    Fire {
        /// Trigger ID or name
        trigger: String,

        /// Dispatch these events instead of running the check
        /// (a JSON array, or a single JSON object)
        #[arg(long)]
        events: Option<String>,
    },

    /// Reset stuck run markers (all triggers when none is named)
    ClearStartChecks {
        /// Trigger ID or name
        trigger: Option<String>,
    },

    /// List triggers that no conduct references
    Unused,

    /// List conducts that reference a trigger
    WhereUsed {
        /// Trigger ID or name
        trigger: String,
    },

    /// Set the transition logic of a flow link
    FlowLogic {
        /// Conduct ID
        conduct: String,

        /// Source flow node ID
        flow: String,

        /// Target flow node ID
        next: String,

        /// true, false, an if-expression, * or an integer
        logic: String,

        /// Evaluation order (ascending)
        #[arg(short, long, default_value = "0")]
        order: i64,
    },

    /// Show recent audit records
    Audit {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Create {
                name,
                kind,
                schedule,
                concurrency,
                max_duration,
                comment,
                enable,
            } => {
                let mut trigger = Trigger::new(name, kind);
                trigger.schedule = schedule;
                trigger.concurrency = concurrency;
                trigger.max_duration = max_duration;
                trigger.comment = comment.unwrap_or_default();
                trigger.enabled = enable;
                create_trigger(trigger).await
            }
            Commands::Triggers => list_triggers().await,
            Commands::Enable { trigger } => set_enabled(&trigger, true).await,
            Commands::Disable { trigger } => set_enabled(&trigger, false).await,
            Commands::Fire { trigger, events } => match events {
                Some(raw) => force_trigger(&trigger, &raw).await,
                None => fire_trigger(&trigger).await,
            },
            Commands::ClearStartChecks { trigger } => clear_start_checks(trigger.as_deref()).await,
            Commands::Unused => list_unused().await,
            Commands::WhereUsed { trigger } => where_used(&trigger).await,
            Commands::FlowLogic {
                conduct,
                flow,
                next,
                logic,
                order,
            } => set_flow_logic(&conduct, &flow, &next, &logic, order).await,
            Commands::Audit { limit } => show_audit(limit).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Stores and dispatcher wired from the resolved configuration
struct Engine {
    store: Arc<FileTriggerStore>,
    audit: Arc<JsonlAuditSink>,
    dispatcher: Dispatcher,
}

impl Engine {
    async fn open() -> Result<Self> {
        let cfg = config::config()?;

        let store = Arc::new(FileTriggerStore::open_default().await?);
        let audit = Arc::new(JsonlAuditSink::open_default()?);
        let resolver = Arc::new(WorkspaceResolver::new(
            cfg.workspace.clone(),
            Arc::new(TracingRunner),
        ));

        let dispatcher = Dispatcher::new(
            resolver,
            Arc::new(IntervalScheduler::new()),
            audit.clone(),
            store.clone(),
        )
        .with_settings(cfg.dispatch.clone());

        Ok(Self {
            store,
            audit,
            dispatcher,
        })
    }
}

/// Register a new trigger
async fn create_trigger(trigger: Trigger) -> Result<()> {
    let engine = Engine::open().await?;

    if engine.dispatcher.kinds().get(&trigger.kind).is_none() {
        anyhow::bail!(
            "Unknown trigger kind '{}'. Available: {}",
            trigger.kind,
            engine.dispatcher.kinds().ids().join(", ")
        );
    }
    IntervalScheduler::parse_interval(&trigger.schedule)
        .with_context(|| format!("Invalid schedule: {}", trigger.schedule))?;

    if engine.store.find(&trigger.name).await.is_ok() {
        anyhow::bail!("A trigger named '{}' already exists", trigger.name);
    }

    engine.store.insert(&trigger).await?;
    info!(trigger_id = %trigger.id, trigger = %trigger.name, "Trigger created");

    let state = if trigger.enabled { "enabled" } else { "disabled" };
    println!("Created trigger {} ({}, {})", trigger.name, trigger.id, state);
    Ok(())
}

/// List registered triggers
async fn list_triggers() -> Result<()> {
    let cfg = config::config()?;
    let engine = Engine::open().await?;
    let triggers = engine.store.list().await?;

    if triggers.is_empty() {
        println!("No triggers found");
        return Ok(());
    }

    let now = engine.dispatcher.now();

    println!(
        "{:<34} {:<20} {:<8} {:<10} {:<8}",
        "TRIGGER ID", "NAME", "KIND", "SCHEDULE", "STATE"
    );
    println!("{}", "-".repeat(84));

    for trigger in triggers {
        println!(
            "{:<34} {:<20} {:<8} {:<10} {:<8}",
            trigger.id,
            trigger.name,
            trigger.kind,
            trigger.schedule,
            trigger.state(now, cfg.dispatch.default_max_duration, cfg.freshness_window)
        );
    }

    Ok(())
}

/// Enable or disable a trigger
async fn set_enabled(id_or_name: &str, enabled: bool) -> Result<()> {
    let engine = Engine::open().await?;
    let mut trigger = engine.store.find(id_or_name).await?;

    let change = engine
        .dispatcher
        .set_attribute(&mut trigger, fields::ENABLED, json!(enabled))
        .await?;
    engine.store.update(&trigger, &[fields::ENABLED]).await?;

    match change {
        AttributeChange::Reenabled => println!("Enabled {} (run markers cleared)", trigger.name),
        AttributeChange::Set if enabled => println!("Enabled {}", trigger.name),
        AttributeChange::Set => println!("Disabled {}", trigger.name),
    }

    Ok(())
}

/// Run a trigger's check and dispatch
async fn fire_trigger(id_or_name: &str) -> Result<()> {
    let engine = Engine::open().await?;
    let mut trigger = engine.store.find(id_or_name).await?;

    if !trigger.enabled {
        anyhow::bail!("Trigger '{}' is disabled", trigger.name);
    }
    if trigger.start_check > 0.0 && trigger.restarts_exhausted() {
        warn!(
            trigger_id = %trigger.id,
            attempts = trigger.attempt_count,
            "Trigger has used its restart allowance"
        );
    }

    trigger.begin_check(engine.dispatcher.now());
    engine
        .store
        .update(&trigger, &[fields::START_CHECK, fields::ATTEMPT_COUNT])
        .await?;

    let result = engine.dispatcher.check_handler(&mut trigger).await;
    report_dispatch(&trigger, result)
}

/// Dispatch hand-picked events to a trigger's conducts
async fn force_trigger(id_or_name: &str, raw_events: &str) -> Result<()> {
    let events = parse_events(raw_events)?;
    let engine = Engine::open().await?;
    let mut trigger = engine.store.find(id_or_name).await?;

    let result = engine.dispatcher.force(&mut trigger, events).await;
    report_dispatch(&trigger, result)
}

/// Parse `--events`: an array of events, or one event object
fn parse_events(raw: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(raw).context("Events must be valid JSON")?;
    match value {
        Value::Array(events) => Ok(events),
        Value::Object(_) => Ok(vec![value]),
        other => anyhow::bail!("Events must be a JSON array or object, got: {}", other),
    }
}

fn report_dispatch(trigger: &Trigger, result: Result<ExecutionContext, DispatchError>) -> Result<()> {
    match result {
        Ok(context) => {
            let processed = context.stats().map(|s| s.total).unwrap_or(0);
            println!(
                "Fired {}: {} event(s), next check at {}",
                trigger.name, processed, trigger.next_check
            );
            if !trigger.enabled {
                println!("No enabled conducts use {}; it has been disabled", trigger.name);
            }
            Ok(())
        }
        Err(DispatchError::Aggregated(failure)) => {
            eprintln!(
                "Trigger {} crashed, {} unit(s) failed:",
                failure.trigger_name,
                failure.failures.len()
            );
            for f in &failure.failures {
                eprintln!(
                    "  conduct {} from event {} ({} context(s)): {}",
                    f.args.conduct_id,
                    f.args.first_index,
                    f.args.contexts.len(),
                    f.kind
                );
            }
            Err(DispatchError::Aggregated(failure).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Clear stuck `startCheck` markers
async fn clear_start_checks(id_or_name: Option<&str>) -> Result<()> {
    let engine = Engine::open().await?;
    let mut triggers = match id_or_name {
        Some(id_or_name) => vec![engine.store.find(id_or_name).await?],
        None => engine.store.list().await?,
    };

    let mut cleared = 0;
    for trigger in triggers.iter_mut() {
        if engine.dispatcher.clear_start_check(trigger).await? {
            println!("Cleared {} ({})", trigger.name, trigger.id);
            cleared += 1;
        }
    }

    println!("{} start check(s) cleared", cleared);
    Ok(())
}

/// List triggers that no conduct references
async fn list_unused() -> Result<()> {
    let engine = Engine::open().await?;
    let triggers = engine.store.list().await?;
    let unused = engine.dispatcher.unused(&triggers).await?;

    if unused.is_empty() {
        println!("Every trigger is referenced by a conduct");
        return Ok(());
    }

    println!("{:<34} {:<20}", "TRIGGER ID", "NAME");
    println!("{}", "-".repeat(54));
    for trigger in unused {
        println!("{:<34} {:<20}", trigger.id, trigger.name);
    }

    Ok(())
}

/// List conducts that reference a trigger
async fn where_used(id_or_name: &str) -> Result<()> {
    let engine = Engine::open().await?;
    let trigger = engine.store.find(id_or_name).await?;
    let usage = engine.dispatcher.where_used(&trigger.id).await?;

    if usage.is_empty() {
        println!("No conducts use {}", trigger.name);
        return Ok(());
    }

    println!("{:<24} {:<40}", "CONDUCT ID", "NAME");
    println!("{}", "-".repeat(64));
    for conduct in usage {
        println!("{:<24} {:<40}", conduct.conduct_id, conduct.conduct_name);
    }

    Ok(())
}

/// Set the transition logic of one flow link
async fn set_flow_logic(
    conduct_id: &str,
    flow_id: &str,
    next_flow_id: &str,
    logic_text: &str,
    order: i64,
) -> Result<()> {
    let engine = Engine::open().await?;
    let path = config::workspace_path()?;
    let logic = FlowLogic::parse(logic_text)?;

    let mut workspace = Workspace::load(&path)?;
    let conduct = workspace
        .conduct_mut(conduct_id)
        .with_context(|| format!("Conduct not found: {}", conduct_id))?;
    let node = conduct
        .node_mut(flow_id)
        .with_context(|| format!("Flow node '{}' not found in conduct {}", flow_id, conduct_id))?;
    node.set_link_logic(next_flow_id, logic.clone(), order)?;
    workspace.save(&path)?;

    engine
        .audit
        .record(
            "flowLogic",
            "update",
            audit_fields([
                ("conduct_id", json!(conduct_id)),
                ("flow_id", json!(flow_id)),
                ("next_flow_id", json!(next_flow_id)),
                ("logic", json!(logic.to_string())),
                ("order", json!(order)),
            ]),
        )
        .await;
    engine.dispatcher.cache().clear(CONDUCT_NAMESPACE)?;

    println!("{} -> {}: logic={} order={}", flow_id, next_flow_id, logic, order);
    Ok(())
}

/// Show the most recent audit records
async fn show_audit(limit: usize) -> Result<()> {
    let sink = JsonlAuditSink::open_default()?;
    let records = sink.replay().await?;

    if records.is_empty() {
        println!("No audit records");
        return Ok(());
    }

    let skip = records.len().saturating_sub(limit);
    for record in records.into_iter().skip(skip) {
        let trigger = record.field_str("trigger_name").unwrap_or("-").to_string();
        println!(
            "{}  {:<10} {:<14} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.category,
            record.event,
            trigger
        );
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Conductor Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Triggers:  {}", cfg.triggers_dir().display());
    println!("  Audit log: {}", cfg.audit_log_path().display());
    println!("  Workspace: {}", cfg.workspace.display());
    println!();
    println!("Dispatch:");
    println!("  Default max duration: {}s", cfg.dispatch.default_max_duration);
    match cfg.freshness_window {
        Some(window) => println!("  Freshness window:     {}s", window),
        None => println!("  Freshness window:     (off)"),
    }
    println!();
    println!("CPU saver:");
    println!("  Enabled:    {}", cfg.dispatch.pacing.enabled);
    println!("  Loop limit: {}", cfg.dispatch.pacing.loop_limit);
    println!("  Pause:      {}ms", cfg.dispatch.pacing.pause_ms);

    Ok(())
}
