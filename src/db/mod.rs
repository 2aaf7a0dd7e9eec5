//! Durable key-value store.
//!
//! A dedicated thread owns the SQLite connection and runs closures sent over a
//! channel, so every statement is serialized and callers only ever await a
//! oneshot reply. Each write runs inside one transaction; a crash mid-write
//! leaves the previous committed value.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::oneshot;

mod helpers;
pub mod keys;
mod migrations;

use crate::error::StoreError;
use helpers::{decode, encode};
pub(crate) use helpers::now_ms;
use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// One mutation inside a [`Database::commit`] batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Put { key: String, value: String },
    Delete { key: String },
    DeletePrefix { prefix: String },
}

impl StoreOp {
    pub fn put_record<T: Serialize>(key: impl Into<String>, record: &T) -> Result<Self, StoreError> {
        let key = key.into();
        let value = encode(&key, record)?;
        Ok(StoreOp::Put { key, value })
    }

    pub fn delete(key: impl Into<String>) -> Self {
        StoreOp::Delete { key: key.into() }
    }

    pub fn delete_prefix(prefix: impl Into<String>) -> Self {
        StoreOp::DeletePrefix {
            prefix: prefix.into(),
        }
    }
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let path_for_thread = db_path.clone();
        let database = Self::spawn(db_path, move || {
            Connection::open(&path_for_thread).context("failed to open SQLite store")
        })?;

        info!("Store initialized at {}", database.path().display());
        Ok(database)
    }

    /// Throwaway store that vanishes with the last handle.
    pub fn open_in_memory() -> Result<Self> {
        Self::spawn(PathBuf::from(":memory:"), || {
            Connection::open_in_memory().context("failed to open in-memory store")
        })
    }

    fn spawn<F>(db_path: PathBuf, open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Connection> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("fgservice-store".into())
            .spawn(move || {
                let mut conn = match open() {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "synchronous", "FULL") {
                    error!("Failed to enable synchronous writes: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    pub async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.commit(vec![StoreOp::Put {
            key: key.to_string(),
            value,
        }])
        .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv_records WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .context("failed to read record")?;
            Ok(value)
        })
        .await
        .map_err(read_failed)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.commit(vec![StoreOp::delete(key)]).await
    }

    /// Records whose key starts with `prefix`, ordered by key.
    pub async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let prefix = prefix.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv_records
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key ASC",
            )?;

            let records = stmt
                .query_map(params![prefix], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()
                .context("failed to list records")?;

            Ok(records)
        })
        .await
        .map_err(read_failed)
    }

    /// Applies every op in a single transaction: all of them land or none do.
    pub async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open write transaction")?;
            let updated_at = now_ms();
            for op in &ops {
                apply_op(&tx, op, updated_at)?;
            }
            tx.commit().context("failed to commit write transaction")?;
            Ok(())
        })
        .await
        .map_err(write_failed)
    }

    pub async fn put_record<T: Serialize>(&self, key: &str, record: &T) -> Result<(), StoreError> {
        self.commit(vec![StoreOp::put_record(key, record)?]).await
    }

    pub async fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes every record under `prefix`, returning `(key suffix, record)`.
    /// Undecodable records fail the whole listing.
    pub async fn list_records<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, StoreError> {
        self.list_by_prefix(prefix)
            .await?
            .into_iter()
            .map(|(key, raw)| {
                let record = decode(&key, &raw)?;
                Ok((key[prefix.len()..].to_string(), record))
            })
            .collect()
    }
}

fn apply_op(tx: &Transaction<'_>, op: &StoreOp, updated_at: i64) -> Result<()> {
    match op {
        StoreOp::Put { key, value } => {
            tx.execute(
                "INSERT INTO kv_records (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, value, updated_at],
            )
            .with_context(|| format!("failed to write record {key}"))?;
        }
        StoreOp::Delete { key } => {
            tx.execute("DELETE FROM kv_records WHERE key = ?1", params![key])
                .with_context(|| format!("failed to delete record {key}"))?;
        }
        StoreOp::DeletePrefix { prefix } => {
            tx.execute(
                "DELETE FROM kv_records WHERE substr(key, 1, length(?1)) = ?1",
                params![prefix],
            )
            .with_context(|| format!("failed to delete records under {prefix}"))?;
        }
    }
    Ok(())
}

fn write_failed(err: anyhow::Error) -> StoreError {
    StoreError::WriteFailed(format!("{err:#}"))
}

fn read_failed(err: anyhow::Error) -> StoreError {
    StoreError::ReadFailed(format!("{err:#}"))
}
