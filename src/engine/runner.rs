// src/engine/runner.rs

//! Async shell around [`JobRunCore`] for one job.
//!
//! The runner owns the job's records and its core. Workers report back on an
//! mpsc channel; the runner applies each event to the core, persists the
//! resulting record changes, publishes engine events, and dispatches newly
//! eligible nodes. Store failures after submission are logged and never
//! stall scheduling.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::engine::core::{CoreCommand, CoreStep, JobRunCore, NodeResult};
use crate::engine::job_engine::EngineShared;
use crate::engine::persist::persist_splice;
use crate::engine::{EngineEvent, RunEvent};
use crate::exec::DispatchedNode;
use crate::graph::{NodeId, Splice};
use crate::job::{JobRecord, JobState, JobStatus, TaskRecord, TaskStatus};

/// Failure reason recorded on a job in which at least one task failed.
pub const TASKS_FAILED_REASON: &str = "one or more tasks failed";

pub(crate) struct JobRunner {
    job: JobRecord,
    core: JobRunCore,
    /// Indexed by `NodeId`.
    records: Vec<TaskRecord>,
    next_order: i64,
    shared: Arc<EngineShared>,
    events_tx: mpsc::Sender<RunEvent>,
    events_rx: mpsc::Receiver<RunEvent>,
    done: watch::Sender<Option<JobRecord>>,
}

impl JobRunner {
    pub(crate) fn new(
        job: JobRecord,
        core: JobRunCore,
        records: Vec<TaskRecord>,
        shared: Arc<EngineShared>,
        done: watch::Sender<Option<JobRecord>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let next_order = records.len() as i64;
        Self {
            job,
            core,
            records,
            next_order,
            shared,
            events_tx,
            events_rx,
            done,
        }
    }

    pub(crate) async fn run(mut self) {
        let job_id = self.job.id;

        let _slot = match Arc::clone(&self.shared.job_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job_id, "job slots closed before job could start");
                self.finish(JobStatus::Failed, Some("engine stopped before the job could start"));
                return;
            }
        };

        self.job.mark_running();
        self.save_job();
        self.shared.emit(EngineEvent::JobStateChanged {
            job_id,
            state: JobState::Running,
        });
        info!(job_id, job = %self.job.name, nodes = self.records.len(), "job started");

        let step = self.core.start();
        if let Some(status) = self.apply(step) {
            self.finish_with(status);
            return;
        }

        while let Some(event) = self.events_rx.recv().await {
            let finished = match event {
                RunEvent::NodeStarted(node) => {
                    self.on_started(node);
                    None
                }
                RunEvent::NodeFinished { node, result } => self.on_finished(node, result),
            };
            if let Some(status) = finished {
                self.finish_with(status);
                return;
            }
        }

        // The runner holds a sender, so the loop only ends through `finish`.
        error!(job_id, "job runner event channel closed unexpectedly");
        self.finish(JobStatus::Failed, Some("job runner lost its event channel"));
    }

    fn on_started(&mut self, node: NodeId) {
        if let Err(err) = self.core.mark_running(node) {
            error!(job_id = self.job.id, node = %node, error = %err, "unexpected start event");
            return;
        }
        if let Some(record) = self.records.get_mut(node.index()) {
            record.mark_running();
        }
        self.save_task(node);
        self.emit_task(node);
    }

    fn on_finished(&mut self, node: NodeId, result: NodeResult) -> Option<JobStatus> {
        let (status, reason) = match &result {
            NodeResult::Succeeded { .. } => (TaskStatus::Passed, None),
            NodeResult::Failed { reason } => (TaskStatus::Failed, Some(reason.clone())),
        };

        let step = match self.core.complete(node, result) {
            Ok(step) => step,
            Err(err) => {
                error!(job_id = self.job.id, node = %node, error = %err, "unexpected completion event");
                return None;
            }
        };

        self.complete_record(node, status, reason.as_deref());
        self.apply(step)
    }

    fn complete_record(&mut self, node: NodeId, status: TaskStatus, reason: Option<&str>) {
        if let Some(record) = self.records.get_mut(node.index()) {
            record.mark_completed(status, reason);
        }
        self.save_task(node);
        self.emit_task(node);
    }

    /// Carry out the core's commands. Returns the job status once the core
    /// reports the job finished.
    fn apply(&mut self, step: CoreStep) -> Option<JobStatus> {
        for command in step.commands {
            match command {
                CoreCommand::Spliced { parent, splice } => self.record_splice(parent, &splice),
                CoreCommand::Skip(nodes) => {
                    for node in nodes {
                        debug!(job_id = self.job.id, node = %node, "task skipped");
                        self.complete_record(node, TaskStatus::Skipped, None);
                    }
                }
                CoreCommand::Dispatch(nodes) => {
                    for node in nodes {
                        self.dispatch(node);
                    }
                }
                CoreCommand::Finish(status) => return Some(status),
            }
        }
        None
    }

    fn record_splice(&mut self, parent: NodeId, splice: &Splice) {
        let result = persist_splice(
            self.shared.store.as_ref(),
            self.core.graph(),
            &mut self.records,
            parent,
            splice,
            &mut self.next_order,
        );
        if let Err(err) = result {
            error!(job_id = self.job.id, node = %parent, error = %err, "failed to persist expansion");
        }
        for node in &splice.inserted {
            self.emit_task(*node);
        }
    }

    fn dispatch(&mut self, node: NodeId) {
        let Some(record) = self.records.get_mut(node.index()) else {
            error!(job_id = self.job.id, node = %node, "no record for dispatched node");
            return;
        };
        record.mark_queued();
        let task_id = record.id;
        let name = record.name.clone();
        self.save_task(node);
        self.emit_task(node);

        let work = match self.core.graph().node(node) {
            Ok(n) => n.work.clone(),
            Err(err) => {
                error!(job_id = self.job.id, node = %node, error = %err, "dispatched node missing from graph");
                return;
            }
        };
        self.shared.executor.spawn(
            DispatchedNode {
                job_id: self.job.id,
                task_id,
                node,
                name,
                work,
            },
            self.events_tx.clone(),
        );
    }

    fn finish_with(&mut self, status: JobStatus) {
        let reason = (status == JobStatus::Failed).then_some(TASKS_FAILED_REASON);
        self.finish(status, reason);
    }

    fn finish(&mut self, status: JobStatus, reason: Option<&str>) {
        let job_id = self.job.id;
        self.job.mark_completed(status, reason);
        self.save_job();
        info!(job_id, job = %self.job.name, status = %status, "job completed");

        self.shared.emit(EngineEvent::JobCompleted { job_id, status });
        self.shared.retire(&self.done, self.job.clone());
    }

    fn save_job(&self) {
        if let Err(err) = self.shared.store.update_job(&self.job) {
            error!(job_id = self.job.id, error = %err, "failed to persist job record");
        }
    }

    fn save_task(&self, node: NodeId) {
        let Some(record) = self.records.get(node.index()) else {
            return;
        };
        if record.id == 0 {
            return;
        }
        if let Err(err) = self.shared.store.update_task(record) {
            error!(job_id = self.job.id, task_id = record.id, error = %err, "failed to persist task record");
        }
    }

    fn emit_task(&self, node: NodeId) {
        if let Some(record) = self.records.get(node.index()) {
            self.shared.emit(EngineEvent::TaskChanged {
                job_id: record.job_id,
                task_id: record.id,
                name: record.name.clone(),
                state: record.state,
                status: record.status,
            });
        }
    }
}
