// src/engine/persist.rs

//! Writing task records for a submitted graph and for spliced expansions.
//!
//! Records are kept in a `Vec<TaskRecord>` indexed by `NodeId`, so the
//! runner can go from a graph node to its row without a lookup table.

use std::collections::HashMap;

use tracing::warn;

use crate::errors::{LockdagError, Result};
use crate::graph::{NodeId, Splice, TaskGraph};
use crate::job::{JobId, JobRecord, TaskRecord};
use crate::store::JobStore;

/// Persist `job` and one TaskRecord per node of `graph`.
///
/// `dependency_order` runs 1..=n along a topological order of `graph`.
/// Fails with `GraphCycle` before anything is written if `graph` is cyclic.
/// If a later write fails, the job row and whatever task rows were written
/// are deleted again before the error is returned.
pub fn persist_job(
    store: &dyn JobStore,
    mut job: JobRecord,
    graph: &TaskGraph,
) -> Result<(JobRecord, Vec<TaskRecord>)> {
    let order = graph.topological_order()?;
    store.insert_job(&mut job)?;

    match persist_tasks(store, job.id, graph, &order) {
        Ok(records) => Ok((job, records)),
        Err(err) => {
            if let Err(cleanup) = store.delete_job(job.id) {
                warn!(job_id = job.id, error = %cleanup, "could not remove partially persisted job");
            }
            Err(err)
        }
    }
}

fn persist_tasks(
    store: &dyn JobStore,
    job_id: JobId,
    graph: &TaskGraph,
    order: &[NodeId],
) -> Result<Vec<TaskRecord>> {
    let mut slots: Vec<Option<TaskRecord>> = vec![None; graph.len()];
    for (position, id) in order.iter().enumerate() {
        let node = graph.node(*id)?;
        let mut record = TaskRecord::new(job_id, node.work.name(), node.guard, position as i64 + 1);
        record.objects = node.work.lock_objects();
        store.insert_task(&mut record)?;
        slots[id.index()] = Some(record);
    }

    let mut records: Vec<TaskRecord> = slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| LockdagError::Store("topological order missed a node".to_string()))?;

    for id in graph.node_ids() {
        if graph.predecessors(id).is_empty() && graph.successors(id).is_empty() {
            continue;
        }
        link(graph, &mut records, id);
        store.update_task(&records[id.index()])?;
    }

    Ok(records)
}

/// Persist the records created by a meta-task expansion and rewire the
/// rows whose edges changed.
///
/// New rows get `parent` set to the meta-task's row and become its
/// children. Their `dependency_order` continues from `*next_order` along a
/// topological order of the inserted nodes. `records` is extended to cover
/// every inserted node even if a store write fails, so indices stay aligned
/// with the graph.
pub fn persist_splice(
    store: &dyn JobStore,
    graph: &TaskGraph,
    records: &mut Vec<TaskRecord>,
    parent: NodeId,
    splice: &Splice,
    next_order: &mut i64,
) -> Result<()> {
    let (job_id, parent_id) = {
        let parent_rec = records
            .get(parent.index())
            .ok_or(LockdagError::UnknownNode(parent.index()))?;
        (parent_rec.job_id, parent_rec.id)
    };

    let positions: HashMap<NodeId, i64> = graph
        .topological_order()?
        .into_iter()
        .filter(|id| splice.inserted.contains(id))
        .enumerate()
        .map(|(pos, id)| (id, *next_order + pos as i64 + 1))
        .collect();

    for id in &splice.inserted {
        let node = graph.node(*id)?;
        let order = positions.get(id).copied().unwrap_or(*next_order + 1);
        let mut record = TaskRecord::new(job_id, node.work.name(), node.guard, order);
        record.parent = Some(parent_id);
        record.objects = node.work.lock_objects();
        records.push(record);
    }
    *next_order += splice.inserted.len() as i64;

    let mut first_err = None;
    for id in &splice.inserted {
        if let Err(err) = store.insert_task(&mut records[id.index()]) {
            first_err.get_or_insert(err);
        }
    }

    let children: Vec<i64> = splice
        .inserted
        .iter()
        .map(|id| records[id.index()].id)
        .filter(|id| *id != 0)
        .collect();
    records[parent.index()].children.extend(children);

    let touched = splice
        .inserted
        .iter()
        .chain(splice.rewired.iter())
        .chain(std::iter::once(&parent));
    for id in touched {
        link(graph, records, *id);
        if records[id.index()].id == 0 {
            continue;
        }
        if let Err(err) = store.update_task(&records[id.index()]) {
            first_err.get_or_insert(err);
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn link(graph: &TaskGraph, records: &mut [TaskRecord], id: NodeId) {
    let ids = |nodes: &[NodeId]| -> Vec<i64> {
        nodes
            .iter()
            .map(|n| records[n.index()].id)
            .filter(|id| *id != 0)
            .collect()
    };
    let predecessors = ids(graph.predecessors(id));
    let successors = ids(graph.successors(id));

    let record = &mut records[id.index()];
    record.predecessors = predecessors;
    record.successors = successors;
}
