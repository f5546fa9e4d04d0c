use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::Stream;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use thiserror::Error;

use crate::models::{ancestors, normalize_key, parent_key, Event, Node};

const BATCH_SIZE: i64 = 100;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, StorageError>> + Send>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Hierarchical key-value store on top of SQLite.
///
/// `nodes` holds the current tree, `events` is the append-only log every
/// mutation goes through. Watchers tail the log.
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ordinal of the latest event, `0` for an empty log.
    pub async fn head(&self) -> Result<u64, StorageError> {
        head_of(&self.pool).await
    }

    /// Reads a node with its whole subtree, together with the log head the
    /// read was served at. The empty key names the root directory.
    pub async fn get(&self, key: &str) -> Result<(Option<Node>, u64), StorageError> {
        let key = normalize_key(key).ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        let mut conn = self.pool.acquire().await?;
        let head = head_of(&mut *conn).await?;

        let node = if key.is_empty() {
            Some(Node {
                key: String::new(),
                value: String::new(),
                dir: true,
                modified: head,
                children: Vec::new(),
            })
        } else {
            fetch_node(&mut conn, &key).await?
        };

        let Some(mut node) = node else {
            return Ok((None, head));
        };

        if node.dir {
            let scope = scope_prefix(&key);
            let rows = sqlx::query(
                "SELECT key, parent, value, dir, modified FROM nodes
                 WHERE substr(key, 1, length(?)) = ? ORDER BY key",
            )
            .bind(&scope)
            .bind(&scope)
            .fetch_all(&mut *conn)
            .await?;

            let mut by_parent: BTreeMap<String, Vec<Node>> = BTreeMap::new();
            for row in &rows {
                let parent: String = row.get("parent");
                by_parent.entry(parent).or_default().push(node_from_row(row));
            }
            attach_children(&mut node, &mut by_parent);
        }

        Ok((Some(node), head))
    }

    /// Writes a value, creating missing ancestor directories on the way.
    pub async fn put(&self, key: &str, value: String) -> Result<Event, StorageError> {
        let key = normalize_key(key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;

        let mut tx = self.pool.begin().await?;
        ensure_ancestors(&mut tx, &key).await?;

        if let Some(existing) = fetch_node(&mut tx, &key).await? {
            if existing.dir {
                return Err(StorageError::IsADirectory(key));
            }
        }

        let event = append(&mut tx, Event::new(key, value, false, 0)).await?;
        upsert_node(&mut tx, &event).await?;
        tx.commit().await?;

        Ok(event)
    }

    /// Creates a directory. Returns the index it was created at, or the
    /// index of its last modification if it already existed.
    pub async fn put_dir(&self, key: &str) -> Result<u64, StorageError> {
        let key = normalize_key(key).ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        if key.is_empty() {
            return self.head().await;
        }

        let mut tx = self.pool.begin().await?;
        ensure_ancestors(&mut tx, &key).await?;

        match fetch_node(&mut tx, &key).await? {
            Some(existing) if existing.dir => Ok(existing.modified),
            Some(_) => Err(StorageError::NotADirectory(key)),
            None => {
                let event = append(&mut tx, Event::new(key, String::new(), true, 0)).await?;
                upsert_node(&mut tx, &event).await?;
                tx.commit().await?;
                Ok(event.ordinal)
            }
        }
    }

    /// Tails the event log for `key` and everything beneath it.
    ///
    /// With `since` set, delivers events with an ordinal greater than
    /// `since`; otherwise starts at the current head.
    pub async fn subscribe_from(
        &self,
        key: &str,
        since: Option<u64>,
    ) -> Result<EventStream, StorageError> {
        let key = normalize_key(key).ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        let scope = scope_prefix(&key);
        let pool = self.pool.clone();

        let mut ordinal = match since {
            Some(since) => since as i64,
            None => self.head().await? as i64,
        };

        Ok(Box::pin(async_stream::stream! {
            loop {
                let rows = sqlx::query_as::<_, (i64, String, String, bool, i64)>(
                    "SELECT ordinal, key, value, dir, timestamp FROM events
                     WHERE ordinal > ? AND (key = ? OR substr(key, 1, length(?)) = ?)
                     ORDER BY ordinal LIMIT ?",
                )
                .bind(ordinal)
                .bind(&key)
                .bind(&scope)
                .bind(&scope)
                .bind(BATCH_SIZE)
                .fetch_all(&pool)
                .await;

                let rows = match rows {
                    Ok(rows) => rows,
                    Err(e) => {
                        yield Err(StorageError::from(e));
                        break;
                    }
                };

                if rows.is_empty() {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }

                for (ord, key, value, dir, timestamp) in rows {
                    ordinal = ord;
                    yield Ok(Event {
                        ordinal: ord as u64,
                        key,
                        value,
                        dir,
                        timestamp,
                    });
                }
            }
        }))
    }
}

async fn head_of<'e, E>(executor: E) -> Result<u64, StorageError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let latest: Option<i64> = sqlx::query("SELECT MAX(ordinal) as max_ord FROM events")
        .fetch_one(executor)
        .await?
        .get("max_ord");

    Ok(latest.unwrap_or(0) as u64)
}

async fn fetch_node(conn: &mut SqliteConnection, key: &str) -> Result<Option<Node>, StorageError> {
    let row = sqlx::query("SELECT key, parent, value, dir, modified FROM nodes WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(node_from_row))
}

async fn ensure_ancestors(conn: &mut SqliteConnection, key: &str) -> Result<(), StorageError> {
    for ancestor in ancestors(key) {
        match fetch_node(conn, ancestor).await? {
            Some(node) if node.dir => {}
            Some(_) => return Err(StorageError::NotADirectory(ancestor.to_string())),
            None => {
                let event = append(conn, Event::new(ancestor.to_string(), String::new(), true, 0)).await?;
                upsert_node(conn, &event).await?;
            }
        }
    }
    Ok(())
}

async fn append(conn: &mut SqliteConnection, mut event: Event) -> Result<Event, StorageError> {
    let row = sqlx::query(
        "INSERT INTO events (key, value, dir, timestamp) VALUES (?, ?, ?, ?) RETURNING ordinal",
    )
    .bind(&event.key)
    .bind(&event.value)
    .bind(event.dir)
    .bind(event.timestamp)
    .fetch_one(&mut *conn)
    .await?;

    let ordinal: i64 = row.get("ordinal");
    event.ordinal = ordinal as u64;
    Ok(event)
}

async fn upsert_node(conn: &mut SqliteConnection, event: &Event) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO nodes (key, parent, value, dir, modified) VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, dir = excluded.dir, modified = excluded.modified",
    )
    .bind(&event.key)
    .bind(parent_key(&event.key))
    .bind(&event.value)
    .bind(event.dir)
    .bind(event.ordinal as i64)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn node_from_row(row: &SqliteRow) -> Node {
    let modified: i64 = row.get("modified");
    Node {
        key: row.get("key"),
        value: row.get("value"),
        dir: row.get("dir"),
        modified: modified as u64,
        children: Vec::new(),
    }
}

fn attach_children(node: &mut Node, by_parent: &mut BTreeMap<String, Vec<Node>>) {
    if let Some(mut children) = by_parent.remove(&node.key) {
        for child in children.iter_mut().filter(|c| c.dir) {
            attach_children(child, by_parent);
        }
        node.children = children;
    }
}

fn scope_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}
