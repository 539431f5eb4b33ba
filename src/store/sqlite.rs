// src/store/sqlite.rs

//! SQLite-backed [`JobStore`].
//!
//! Tables:
//! - `job`, `task`: one row per record.
//! - `task_predecessor`, `task_successor`, `task_child`: task graph edges.
//! - `job_object`, `task_object`: which domain objects a job/task touched.
//! - `entity`: key/value rows written by transactional nodes.
//!
//! A single connection is shared behind `Arc<Mutex<_>>`; every multi-row
//! write runs in one SQLite transaction.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::errors::{LockdagError, Result};
use crate::job::{JobId, JobRecord, TaskId, TaskRecord};
use crate::lock::{LockObjectReference, ObjectType};

use super::{BufferedTransaction, JobStore, KvBackend, Transaction};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS job (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    state           TEXT NOT NULL,
    status          TEXT,
    queued_ts       TEXT NOT NULL,
    started_ts      TEXT,
    completed_ts    TEXT,
    failure_reason  TEXT,
    submitted_by    TEXT
);
CREATE TABLE IF NOT EXISTS task (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    job_fk            INTEGER NOT NULL REFERENCES job(id),
    name              TEXT NOT NULL,
    state             TEXT NOT NULL,
    status            TEXT,
    fail_reason       TEXT,
    task_guard        TEXT NOT NULL,
    dependency_order  INTEGER NOT NULL,
    parent_id         INTEGER,
    queued_ts         TEXT,
    started_ts        TEXT,
    completed_ts      TEXT
);
CREATE INDEX IF NOT EXISTS task_job_idx ON task(job_fk, dependency_order);
CREATE TABLE IF NOT EXISTS task_predecessor (
    task_id         INTEGER NOT NULL REFERENCES task(id),
    predecessor_id  INTEGER NOT NULL REFERENCES task(id),
    PRIMARY KEY (task_id, predecessor_id)
);
CREATE TABLE IF NOT EXISTS task_successor (
    task_id       INTEGER NOT NULL REFERENCES task(id),
    successor_id  INTEGER NOT NULL REFERENCES task(id),
    PRIMARY KEY (task_id, successor_id)
);
CREATE TABLE IF NOT EXISTS task_child (
    task_id   INTEGER NOT NULL REFERENCES task(id),
    child_id  INTEGER NOT NULL REFERENCES task(id),
    PRIMARY KEY (task_id, child_id)
);
CREATE TABLE IF NOT EXISTS job_object (
    job_id       INTEGER NOT NULL REFERENCES job(id),
    object_type  TEXT NOT NULL,
    object_id    INTEGER NOT NULL,
    name         TEXT NOT NULL,
    PRIMARY KEY (job_id, object_type, object_id)
);
CREATE TABLE IF NOT EXISTS task_object (
    task_id      INTEGER NOT NULL REFERENCES task(id),
    object_type  TEXT NOT NULL,
    object_id    INTEGER NOT NULL,
    name         TEXT NOT NULL,
    PRIMARY KEY (task_id, object_type, object_id)
);
CREATE TABLE IF NOT EXISTS entity (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
";

const JOB_COLUMNS: &str =
    "id, name, state, status, queued_ts, started_ts, completed_ts, failure_reason, submitted_by";

const TASK_COLUMNS: &str = "id, job_fk, name, state, status, fail_reason, task_guard, \
     dependency_order, parent_id, queued_ts, started_ts, completed_ts";

type SharedConnection = Arc<Mutex<Connection>>;

fn lock_conn(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| LockdagError::Store("sqlite connection lock poisoned".to_string()))
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: SharedConnection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened sqlite job store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }
}

fn ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|v| v.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_col<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_opt_col<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| r.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e.to_string()))
    })
    .transpose()
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let queued_at = parse_ts(row, 4)?.ok_or_else(|| conversion_error(4, "missing queued_ts".into()))?;
    Ok(JobRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        state: parse_col(row, 2)?,
        status: parse_opt_col(row, 3)?,
        queued_at,
        started_at: parse_ts(row, 5)?,
        completed_at: parse_ts(row, 6)?,
        failure_reason: row.get(7)?,
        submitted_by: row.get(8)?,
        objects: Vec::new(),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        name: row.get(2)?,
        state: parse_col(row, 3)?,
        status: parse_opt_col(row, 4)?,
        fail_reason: row.get(5)?,
        guard: parse_col(row, 6)?,
        dependency_order: row.get(7)?,
        parent: row.get(8)?,
        queued_at: parse_ts(row, 9)?,
        started_at: parse_ts(row, 10)?,
        completed_at: parse_ts(row, 11)?,
        predecessors: Vec::new(),
        successors: Vec::new(),
        children: Vec::new(),
        objects: Vec::new(),
    })
}

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<LockObjectReference> {
    let object_type: ObjectType = parse_col(row, 0)?;
    Ok(LockObjectReference::new(object_type, row.get(1)?, row.get::<_, String>(2)?))
}

fn write_objects(
    conn: &Connection,
    table: &str,
    owner_column: &str,
    owner_id: i64,
    objects: &[LockObjectReference],
) -> rusqlite::Result<()> {
    conn.execute(
        &format!("DELETE FROM {table} WHERE {owner_column} = ?1"),
        params![owner_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "INSERT OR REPLACE INTO {table} ({owner_column}, object_type, object_id, name) \
         VALUES (?1, ?2, ?3, ?4)"
    ))?;
    for obj in objects {
        stmt.execute(params![owner_id, obj.object_type.as_str(), obj.id, obj.name])?;
    }
    Ok(())
}

fn read_objects(
    conn: &Connection,
    table: &str,
    owner_column: &str,
    owner_id: i64,
) -> rusqlite::Result<Vec<LockObjectReference>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT object_type, object_id, name FROM {table} \
         WHERE {owner_column} = ?1 ORDER BY object_type, object_id"
    ))?;
    let objects = stmt
        .query_map(params![owner_id], object_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(objects)
}

/// (table, column holding the related task id)
const TASK_LINKS: [(&str, &str); 3] = [
    ("task_predecessor", "predecessor_id"),
    ("task_successor", "successor_id"),
    ("task_child", "child_id"),
];

fn write_task_links(conn: &Connection, task: &TaskRecord) -> rusqlite::Result<()> {
    let lists = [&task.predecessors, &task.successors, &task.children];
    for ((table, column), ids) in TASK_LINKS.iter().zip(lists) {
        conn.execute(&format!("DELETE FROM {table} WHERE task_id = ?1"), params![task.id])?;
        let mut stmt = conn.prepare(&format!(
            "INSERT OR IGNORE INTO {table} (task_id, {column}) VALUES (?1, ?2)"
        ))?;
        for other in ids {
            stmt.execute(params![task.id, other])?;
        }
    }
    write_objects(conn, "task_object", "task_id", task.id, &task.objects)
}

fn read_task_links(conn: &Connection, task: &mut TaskRecord) -> rusqlite::Result<()> {
    let mut lists: Vec<Vec<TaskId>> = Vec::with_capacity(TASK_LINKS.len());
    for (table, column) in TASK_LINKS {
        let mut stmt = conn.prepare(&format!(
            "SELECT {column} FROM {table} WHERE task_id = ?1 ORDER BY {column}"
        ))?;
        let ids = stmt
            .query_map(params![task.id], |row| row.get::<_, TaskId>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        lists.push(ids);
    }
    task.children = lists.pop().unwrap_or_default();
    task.successors = lists.pop().unwrap_or_default();
    task.predecessors = lists.pop().unwrap_or_default();
    task.objects = read_objects(conn, "task_object", "task_id", task.id)?;
    Ok(())
}

impl JobStore for SqliteStore {
    fn insert_job(&self, job: &mut JobRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO job (name, state, status, queued_ts, started_ts, completed_ts, \
             failure_reason, submitted_by) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.name,
                job.state.as_str(),
                job.status.map(|s| s.as_str()),
                ts(Some(job.queued_at)),
                ts(job.started_at),
                ts(job.completed_at),
                job.failure_reason,
                job.submitted_by,
            ],
        )?;
        job.id = tx.last_insert_rowid();
        write_objects(&tx, "job_object", "job_id", job.id, &job.objects)?;
        tx.commit()?;
        Ok(())
    }

    fn update_job(&self, job: &JobRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE job SET name = ?2, state = ?3, status = ?4, queued_ts = ?5, started_ts = ?6, \
             completed_ts = ?7, failure_reason = ?8, submitted_by = ?9 WHERE id = ?1",
            params![
                job.id,
                job.name,
                job.state.as_str(),
                job.status.map(|s| s.as_str()),
                ts(Some(job.queued_at)),
                ts(job.started_at),
                ts(job.completed_at),
                job.failure_reason,
                job.submitted_by,
            ],
        )?;
        if changed == 0 {
            return Err(LockdagError::JobNotFound(job.id));
        }
        write_objects(&tx, "job_object", "job_id", job.id, &job.objects)?;
        tx.commit()?;
        Ok(())
    }

    fn insert_task(&self, task: &mut TaskRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let job_exists: Option<i64> = tx
            .query_row("SELECT id FROM job WHERE id = ?1", params![task.job_id], |r| r.get(0))
            .optional()?;
        if job_exists.is_none() {
            return Err(LockdagError::JobNotFound(task.job_id));
        }

        tx.execute(
            "INSERT INTO task (job_fk, name, state, status, fail_reason, task_guard, dependency_order, \
             parent_id, queued_ts, started_ts, completed_ts) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                task.job_id,
                task.name,
                task.state.as_str(),
                task.status.map(|s| s.as_str()),
                task.fail_reason,
                task.guard.as_str(),
                task.dependency_order,
                task.parent,
                ts(task.queued_at),
                ts(task.started_at),
                ts(task.completed_at),
            ],
        )?;
        task.id = tx.last_insert_rowid();
        write_task_links(&tx, task)?;
        tx.commit()?;
        Ok(())
    }

    fn update_task(&self, task: &TaskRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE task SET name = ?2, state = ?3, status = ?4, fail_reason = ?5, task_guard = ?6, \
             dependency_order = ?7, parent_id = ?8, queued_ts = ?9, started_ts = ?10, \
             completed_ts = ?11 WHERE id = ?1",
            params![
                task.id,
                task.name,
                task.state.as_str(),
                task.status.map(|s| s.as_str()),
                task.fail_reason,
                task.guard.as_str(),
                task.dependency_order,
                task.parent,
                ts(task.queued_at),
                ts(task.started_at),
                ts(task.completed_at),
            ],
        )?;
        if changed == 0 {
            return Err(LockdagError::Store(format!("task {} not found", task.id)));
        }
        write_task_links(&tx, task)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_job(&self, id: JobId) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for table in ["task_predecessor", "task_successor", "task_child", "task_object"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE task_id IN (SELECT id FROM task WHERE job_fk = ?1)"),
                params![id],
            )?;
        }
        tx.execute("DELETE FROM task WHERE job_fk = ?1", params![id])?;
        tx.execute("DELETE FROM job_object WHERE job_id = ?1", params![id])?;
        tx.execute("DELETE FROM job WHERE id = ?1", params![id])?;
        tx.commit()?;
        debug!(job_id = id, "deleted job rows");
        Ok(())
    }

    fn load_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM job WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;

        match job {
            Some(mut job) => {
                job.objects = read_objects(&conn, "job_object", "job_id", job.id)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    fn load_tasks(&self, job_id: JobId) -> Result<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM task WHERE job_fk = ?1 ORDER BY dependency_order, id"
        ))?;
        let mut tasks = stmt
            .query_map(params![job_id], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for task in &mut tasks {
            read_task_links(&conn, task)?;
        }
        Ok(tasks)
    }

    fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        self.query_jobs(&format!("SELECT {JOB_COLUMNS} FROM job ORDER BY id DESC"))
    }

    fn uncompleted_jobs(&self) -> Result<Vec<JobRecord>> {
        self.query_jobs(&format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE state != 'COMPLETED' ORDER BY id"
        ))
    }

    fn begin(&self) -> Result<Box<dyn Transaction>> {
        let backend: Arc<dyn KvBackend> = Arc::new(SqliteKv {
            conn: Arc::clone(&self.conn),
        });
        Ok(Box::new(BufferedTransaction::new(backend)))
    }
}

impl SqliteStore {
    fn query_jobs(&self, sql: &str) -> Result<Vec<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut jobs = stmt
            .query_map([], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for job in &mut jobs {
            job.objects = read_objects(&conn, "job_object", "job_id", job.id)?;
        }
        Ok(jobs)
    }

    /// Committed value of an `entity` row (inspection helper).
    pub fn committed(&self, key: &str) -> Result<Option<String>> {
        SqliteKv {
            conn: Arc::clone(&self.conn),
        }
        .read(key)
    }
}

struct SqliteKv {
    conn: SharedConnection,
}

impl KvBackend for SqliteKv {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = lock_conn(&self.conn)?;
        let value = conn
            .query_row("SELECT value FROM entity WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    fn apply(&self, writes: BTreeMap<String, Option<String>>) -> Result<()> {
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        for (key, value) in writes {
            match value {
                Some(v) => tx.execute(
                    "INSERT INTO entity (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, v],
                )?,
                None => tx.execute("DELETE FROM entity WHERE key = ?1", params![key])?,
            };
        }
        tx.commit()?;
        Ok(())
    }
}
