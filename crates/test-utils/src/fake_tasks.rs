#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lockdag::graph::TaskGraph;
use lockdag::lock::LockObjectReference;
use lockdag::task::{MetaTask, Task, TaskContext, TaskFuture};

/// Shared, ordered record of what fake tasks did.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.lock().unwrap().iter().any(|e| e == entry)
    }

    /// Index of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().unwrap().iter().position(|e| e == entry)
    }
}

/// Succeeds immediately, logging its name.
pub struct RecordingTask {
    name: String,
    log: ExecutionLog,
    objects: Vec<LockObjectReference>,
}

impl RecordingTask {
    pub fn new(name: &str, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            objects: Vec::new(),
        }
    }

    pub fn touching(mut self, object: LockObjectReference) -> Self {
        self.objects.push(object);
        self
    }
}

impl Task for RecordingTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn lock_objects(&self) -> Vec<LockObjectReference> {
        self.objects.clone()
    }

    fn execute<'a>(&'a self, _ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.push(self.name.clone());
            Ok(())
        })
    }
}

/// Logs its name, then fails with `message`.
pub struct FailingTask {
    name: String,
    message: String,
    log: ExecutionLog,
}

impl FailingTask {
    pub fn new(name: &str, message: &str, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
            log: log.clone(),
        }
    }
}

impl Task for FailingTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn execute<'a>(&'a self, _ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.push(self.name.clone());
            anyhow::bail!("{}", self.message)
        })
    }
}

/// Logs `<name>:start`, sleeps, logs `<name>:end`.
pub struct SleepTask {
    name: String,
    duration: Duration,
    log: ExecutionLog,
}

impl SleepTask {
    pub fn new(name: &str, duration: Duration, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            duration,
            log: log.clone(),
        }
    }
}

impl Task for SleepTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn execute<'a>(&'a self, _ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.push(format!("{}:start", self.name));
            tokio::time::sleep(self.duration).await;
            self.log.push(format!("{}:end", self.name));
            Ok(())
        })
    }
}

/// Meta-task that logs its name and expands into a fixed graph, or fails.
pub struct StaticMetaTask {
    name: String,
    graph: Option<TaskGraph>,
    log: ExecutionLog,
}

impl StaticMetaTask {
    pub fn new(name: &str, graph: TaskGraph, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            graph: Some(graph),
            log: log.clone(),
        }
    }

    /// A meta-task whose expansion raises an error.
    pub fn failing(name: &str, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            graph: None,
            log: log.clone(),
        }
    }
}

impl MetaTask for StaticMetaTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn expand<'a>(&'a self, _ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<TaskGraph>> {
        Box::pin(async move {
            self.log.push(self.name.clone());
            match &self.graph {
                Some(graph) => Ok(graph.clone()),
                None => anyhow::bail!("could not plan sub-tasks for {}", self.name),
            }
        })
    }
}

/// Writes `key = value` inside its transaction, optionally failing after.
pub struct TransactionalTask {
    name: String,
    key: String,
    value: String,
    fail: bool,
}

impl TransactionalTask {
    pub fn new(name: &str, key: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Task for TransactionalTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn transactional(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let tx = ctx
                .transaction()
                .ok_or_else(|| anyhow::anyhow!("no transaction opened for {}", self.name))?;
            tx.put(&self.key, &self.value);
            if self.fail {
                anyhow::bail!("{} failed after writing", self.name);
            }
            Ok(())
        })
    }
}
