// src/lib.rs

pub mod cli;
pub mod config;
pub mod conformance;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod job;
pub mod lock;
pub mod logging;
pub mod store;
pub mod task;
pub mod types;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, load_or_default};
use crate::engine::recover_orphaned_jobs;
use crate::errors::LockdagError;
use crate::job::{JobId, JobRecord, TaskRecord};
use crate::store::{JobStore, open_store};

/// High-level entry point used by `main.rs`.
///
/// Jobs are submitted by the applications embedding [`engine::JobEngine`];
/// the binary inspects and maintains the store they share:
/// - `validate`: config dry run
/// - `jobs` / `show`: read the audit records
/// - `recover`: close out jobs a dead process left in flight
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_or_default(&config_path)?;
    debug!(path = %config_path.display(), "configuration loaded");

    match args.command {
        Command::Validate => {
            print_settings(&cfg);
            Ok(())
        }
        Command::Jobs => {
            let store = open_store(&cfg.store)?;
            print_jobs(&store.list_jobs()?);
            Ok(())
        }
        Command::Show { job_id } => {
            let store = open_store(&cfg.store)?;
            show_job(store.as_ref(), job_id)
        }
        Command::Recover => {
            let store = open_store(&cfg.store)?;
            let orphans = recover_orphaned_jobs(store.as_ref())?;
            info!(count = orphans.len(), "recovery finished");
            if orphans.is_empty() {
                println!("no orphaned jobs");
            }
            for orphan in orphans {
                println!(
                    "job {} '{}': marked FAILED ({} interrupted task(s))",
                    orphan.job_id, orphan.name, orphan.interrupted_tasks
                );
            }
            Ok(())
        }
    }
}

/// Dry-run output: the effective settings after defaults and validation.
fn print_settings(cfg: &ConfigFile) {
    println!("lockdag settings");
    println!("  engine.worker_pool_size = {}", cfg.engine.worker_pool_size);
    println!("  engine.max_concurrent_jobs = {}", cfg.engine.max_concurrent_jobs);
    println!("  engine.event_buffer = {}", cfg.engine.event_buffer);
    println!("  lock.acquire_timeout = {:?}", cfg.engine.lock.acquire_timeout);
    println!("  lock.upgrade_timeout = {:?}", cfg.engine.lock.upgrade_timeout);
    println!("  store.kind = {:?}", cfg.store.kind);
    println!("  store.path = {}", cfg.store.path.display());
}

fn print_jobs(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("no jobs");
        return;
    }
    for job in jobs {
        println!(
            "{:>6}  {:<9} {:<6}  queued {}  completed {}  {}",
            job.id,
            job.state,
            job.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            ts(Some(job.queued_at)),
            ts(job.completed_at),
            job.name
        );
    }
}

fn show_job(store: &dyn JobStore, job_id: JobId) -> Result<()> {
    let job = store
        .load_job(job_id)?
        .ok_or(LockdagError::JobNotFound(job_id))?;
    let tasks = store.load_tasks(job_id)?;

    println!("job {} '{}'", job.id, job.name);
    println!(
        "  state {}  status {}",
        job.state,
        job.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
    );
    println!(
        "  queued {}  started {}  completed {}",
        ts(Some(job.queued_at)),
        ts(job.started_at),
        ts(job.completed_at)
    );
    if let Some(by) = &job.submitted_by {
        println!("  submitted by {by}");
    }
    if let Some(reason) = &job.failure_reason {
        println!("  failure: {reason}");
    }
    for object in &job.objects {
        println!("  object {object}");
    }

    println!("tasks ({}):", tasks.len());
    for task in &tasks {
        print_task(task);
    }
    Ok(())
}

fn print_task(task: &TaskRecord) {
    println!(
        "  [{}] #{} {}  {} {}  guard {}",
        task.dependency_order,
        task.id,
        task.name,
        task.state,
        task.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
        task.guard
    );
    if !task.predecessors.is_empty() {
        println!("      after: {:?}", task.predecessors);
    }
    if let Some(parent) = task.parent {
        println!("      expanded from: #{parent}");
    }
    if !task.children.is_empty() {
        println!("      children: {:?}", task.children);
    }
    if let Some(reason) = &task.fail_reason {
        println!("      failure: {reason}");
    }
}

fn ts(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}
