// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod logging;
pub mod pipeline;
pub mod tracker;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::dag::ExecutionPlan;
use crate::events::{ChannelSink, EventSink, RunEvent, TracingSink};
use crate::tracker::{RunSnapshot, RunState};

pub use crate::errors::{EtlDagError, Result as EtlResult};
pub use crate::pipeline::Pipeline;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the pipeline (plan, tracker, run worker)
/// - live event printing
/// - Ctrl-C handling (cancels the run)
///
/// Returns the final state of the run.
pub async fn run(args: CliArgs) -> Result<RunState> {
    let mut cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading pipeline config from {}", args.config))?;
    apply_overrides(&mut cfg, &args)?;

    let registry = cfg.build_registry()?;

    if args.dry_run {
        let plan = ExecutionPlan::build(registry)?;
        print_dry_run(&cfg, &plan);
        return Ok(RunState::Success);
    }

    let (channel_sink, mut events) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = if args.quiet {
        Arc::new(TracingSink)
    } else {
        Arc::new(channel_sink)
    };

    let pipeline = Pipeline::new(cfg.config.dag_name.clone(), registry, cfg.engine_options(), sink)?;
    let run_id = pipeline.start_run()?;
    info!(%run_id, dag = %cfg.config.dag_name, "run started");

    // Ctrl-C → best-effort cancellation.
    let ctrl_c = {
        let tracker = pipeline.tracker().clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            eprintln!("cancelling run {run_id}; waiting for running tasks to finish");
            if let Err(e) = tracker.cancel_run(&run_id) {
                warn!(error = %e, "failed to cancel run");
            }
        })
    };

    let snapshot = {
        let wait = pipeline.wait_for(&run_id);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                Some(event) = events.recv() => print_event(&event),
                res = &mut wait => break res?,
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
    ctrl_c.abort();

    if args.json {
        println!("{}", snapshot.to_json()?);
    } else {
        print_summary(&snapshot);
    }

    pipeline.shutdown().await?;
    Ok(snapshot.overall_state)
}

fn apply_overrides(cfg: &mut ConfigFile, args: &CliArgs) -> Result<()> {
    for task in &args.fail {
        cfg.force_failure(task)
            .with_context(|| format!("--fail {task}"))?;
        debug!(task = %task, "forcing task failure");
    }
    if let Some(policy) = args.policy {
        cfg.config.failure_policy = policy;
    }
    if let Some(workers) = args.workers {
        cfg.config.max_workers = usize::from(workers);
    }
    Ok(())
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::Transition {
            task_id,
            state,
            timestamp,
            ..
        } => println!("{} {task_id:<20} -> {state}", timestamp.format("%H:%M:%S%.3f")),
        RunEvent::Log {
            task_id: Some(task_id),
            line,
            timestamp,
            ..
        } => println!("{} {task_id:<20}    {line}", timestamp.format("%H:%M:%S%.3f")),
        RunEvent::Log { .. } | RunEvent::RunFinished { .. } => {}
    }
}

fn print_summary(snapshot: &RunSnapshot) {
    println!();
    println!("run {} ({})", snapshot.run_id, snapshot.dag_name);
    for task in &snapshot.tasks {
        let duration = task
            .duration_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| "-".to_string());
        let detail = task
            .error
            .as_deref()
            .or(task.skip_reason.as_deref())
            .unwrap_or("");
        println!(
            "  {:<20} {:<8} {:>10}  {}",
            task.task_id, task.state, duration, detail
        );
    }
    let p = &snapshot.progress;
    println!(
        "overall: {} ({} succeeded, {} failed, {} skipped of {})",
        snapshot.overall_state, p.succeeded, p.failed, p.skipped, p.total
    );
}

/// Dry-run output: options, then tasks in resolved order.
fn print_dry_run(cfg: &ConfigFile, plan: &ExecutionPlan) {
    let options = cfg.engine_options();
    println!("etldag dry-run: {}", cfg.config.dag_name);
    println!("  config.failure_policy = {:?}", options.failure_policy);
    println!("  config.max_workers = {}", options.max_workers);
    println!("  config.history_limit = {}", options.history_limit);
    println!("  config.start_while_active = {:?}", options.start_while_active);
    println!();

    println!("tasks in resolved order ({}):", plan.len());
    for (i, id) in plan.order().iter().enumerate() {
        println!("  {}. {id}", i + 1);
        let Some(task) = cfg.task.get(id) else {
            continue;
        };
        if !task.description.is_empty() {
            println!("      description: {}", task.description);
        }
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if task.fail {
            println!("      fail: {}", task.error.as_deref().unwrap_or("task failed"));
        }
        if task.retries > 0 {
            println!("      retries: {} (delay {} ms)", task.retries, task.retry_delay_ms);
        }
    }

    debug!("dry-run complete (no execution)");
}
