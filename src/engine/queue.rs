// src/engine/queue.rs

//! Serial job submission.
//!
//! A [`JobQueue`] hands its requests to the engine one at a time, in the
//! order they were put, submitting each only after the previous job has
//! completed.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::job_engine::{JobEngine, JobRequest};
use crate::errors::{LockdagError, Result};
use crate::job::JobRecord;

type Reply = oneshot::Sender<Result<JobRecord>>;

/// Handle to a request waiting in (or run by) a [`JobQueue`].
#[derive(Debug)]
pub struct QueuedJob {
    done: oneshot::Receiver<Result<JobRecord>>,
}

impl QueuedJob {
    /// Wait for the job's final record, or for the error that prevented it
    /// from being submitted.
    pub async fn wait(self) -> Result<JobRecord> {
        self.done.await.map_err(|_| LockdagError::EngineShutdown)?
    }
}

/// FIFO queue running one job at a time on a shared engine.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<(JobRequest, Reply)>,
}

impl JobQueue {
    /// Spawn the queue's drain loop. Must be called from within a Tokio
    /// runtime; the loop ends once every `JobQueue` clone is dropped.
    pub fn new(engine: JobEngine) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(JobRequest, Reply)>();

        tokio::spawn(async move {
            debug!("job queue started");
            while let Some((request, reply)) = rx.recv().await {
                let name = request.name.clone();
                let result = match engine.submit(request) {
                    Ok(handle) => {
                        info!(job_id = handle.id(), job = %name, "queued job submitted");
                        handle.wait().await
                    }
                    Err(err) => {
                        warn!(job = %name, error = %err, "queued job rejected");
                        Err(err)
                    }
                };
                let _ = reply.send(result);
            }
            debug!("job queue finished (all handles dropped)");
        });

        Self { tx }
    }

    pub fn put(&self, request: JobRequest) -> Result<QueuedJob> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send((request, reply))
            .map_err(|_| LockdagError::EngineShutdown)?;
        Ok(QueuedJob { done })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::engine::EngineSettings;
    use crate::graph::{TaskGraph, TaskGuard};
    use crate::job::JobStatus;
    use crate::task::{Task, TaskContext, TaskFuture, TaskNode};

    struct Mark {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Task for Mark {
        fn name(&self) -> String {
            self.label.to_string()
        }

        fn execute<'a>(&'a self, _ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("{}:start", self.label));
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.log.lock().unwrap().push(format!("{}:end", self.label));
                Ok(())
            })
        }
    }

    fn job(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> JobRequest {
        let mut g = TaskGraph::new();
        g.add_entry(
            TaskNode::leaf(Mark {
                label,
                log: Arc::clone(log),
            }),
            TaskGuard::default(),
        );
        JobRequest::new(label, g)
    }

    #[tokio::test]
    async fn jobs_run_one_after_another_in_order() {
        let engine = JobEngine::in_memory(EngineSettings::default());
        let queue = JobQueue::new(engine);
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = queue.put(job("one", &log)).unwrap();
        let second = queue.put(job("two", &log)).unwrap();

        assert_eq!(second.wait().await.unwrap().status, Some(JobStatus::Passed));
        assert_eq!(first.wait().await.unwrap().status, Some(JobStatus::Passed));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["one:start", "one:end", "two:start", "two:end"]
        );
    }

    #[tokio::test]
    async fn rejected_request_reports_the_submission_error() {
        let engine = JobEngine::in_memory(EngineSettings::default());
        engine.shutdown().await;
        let queue = JobQueue::new(engine);
        let log = Arc::new(Mutex::new(Vec::new()));

        let rejected = queue.put(job("late", &log)).unwrap();

        assert!(matches!(rejected.wait().await, Err(LockdagError::EngineShutdown)));
        assert!(log.lock().unwrap().is_empty());
    }
}
