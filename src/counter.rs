use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;

const SCHEMA_VERSION: i32 = 1;
const SESSION_ID_KEY: &str = "sessionId";

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct CounterStoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for CounterStoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to counter store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join counter store thread: {join_err:?}");
            }
        }
    }
}

fn init_schema(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > SCHEMA_VERSION {
        bail!(
            "counter store version ({}) is newer than supported schema ({})",
            version,
            SCHEMA_VERSION
        );
    }

    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open schema transaction")?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS counters (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
    )
    .context("failed to create counters table")?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit schema")?;

    Ok(())
}

/// Durable counter service backing session-id allocation. Every increment is
/// committed before the new value is handed out, so ids survive process
/// restarts and are never reissued.
#[derive(Clone)]
pub struct CounterStore {
    inner: Arc<CounterStoreInner>,
    db_path: Arc<PathBuf>,
}

impl CounterStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create counter store directory {}", parent.display())
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("playcap-counter".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open counter store")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result = init_schema(&mut conn).context("failed to apply counter schema");
                if ready_tx.send(init_result).is_err() {
                    error!("Counter store receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Counter store thread shutting down");
            })
            .with_context(|| "failed to spawn counter store thread")?;

        ready_rx
            .recv()
            .context("counter store worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(CounterStoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Counter store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to counter store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("counter store thread terminated unexpectedly"))?
    }

    /// Mints the next session id: reads the last-issued value, increments and
    /// persists it in one transaction, and returns the new value. A write
    /// failure is an error here, never a silently reused id.
    pub async fn next_session_id(&self) -> Result<i64> {
        self.execute(|conn| {
            let tx = conn
                .transaction()
                .context("failed to open counter transaction")?;
            tx.execute(
                "INSERT INTO counters (key, value) VALUES (?1, 1)
                 ON CONFLICT(key) DO UPDATE SET value = value + 1",
                params![SESSION_ID_KEY],
            )
            .context("failed to increment session counter")?;
            let id: i64 = tx
                .query_row(
                    "SELECT value FROM counters WHERE key = ?1",
                    params![SESSION_ID_KEY],
                    |row| row.get(0),
                )
                .context("failed to read session counter")?;
            tx.commit().context("failed to persist session counter")?;
            Ok(id)
        })
        .await
    }

    /// Last id handed out, or zero for a fresh store.
    pub async fn last_session_id(&self) -> Result<i64> {
        self.execute(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM counters WHERE key = ?1",
                    params![SESSION_ID_KEY],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
                .context("failed to read session counter")?;
            Ok(value.unwrap_or(0))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("playtests.sqlite3")).unwrap();

        assert_eq!(store.last_session_id().await.unwrap(), 0);
        assert_eq!(store.next_session_id().await.unwrap(), 1);
        assert_eq!(store.next_session_id().await.unwrap(), 2);
        assert_eq!(store.next_session_id().await.unwrap(), 3);
        assert_eq!(store.last_session_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ids_survive_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playtests.sqlite3");

        {
            let store = CounterStore::open(path.clone()).unwrap();
            assert_eq!(store.next_session_id().await.unwrap(), 1);
            assert_eq!(store.next_session_id().await.unwrap(), 2);
        }

        let store = CounterStore::open(path).unwrap();
        assert_eq!(store.last_session_id().await.unwrap(), 2);
        assert_eq!(store.next_session_id().await.unwrap(), 3);
    }
}
