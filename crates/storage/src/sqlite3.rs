use async_trait::async_trait;
use chrono::Utc;
use kursiyer_common::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::metrics::{MetricsRecorder, StoreMetrics};
use crate::registry::{SubscriberRegistry, Subscription};
use crate::tree::{get_at, set_at, split_path, to_document_map};
use crate::{
    DocumentMap, DocumentStore, FeedDelivery, FeedListener, StoreError, StoreResult, push_id,
    stamp_document,
};

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

struct Inner {
    conn: Mutex<Connection>,
    registry: Arc<SubscriberRegistry>,
    metrics: MetricsRecorder,
}

/// SQLite-backed document tree. The first path segment names a collection, the second a row,
/// and anything deeper lives inside that row's JSON body.
pub struct SqliteDocumentStore {
    db_path: PathBuf,
    inner: Arc<Inner>,
    next_push: AtomicU64,
}

impl SqliteDocumentStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("failed to create directory {:?}: {e}", parent))
            })?;
        }

        let conn = Connection::open(&db_path).map_err(backend)?;
        Self::init_db(&conn).map_err(backend)?;
        info!("opened document store at {}", db_path.display());

        Ok(Self {
            db_path,
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                registry: SubscriberRegistry::new(),
                metrics: MetricsRecorder::new(),
            }),
            next_push: AtomicU64::new(0),
        })
    }

    fn init_db(conn: &Connection) -> rusqlite::Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );",
        )
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.inner.metrics.snapshot()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> StoreResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

impl Inner {
    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection poisoned".to_string()))
    }

    fn read_map(&self, path: &str) -> StoreResult<DocumentMap> {
        let segments = split_path(path)?;
        let conn = self.lock()?;
        match segments.as_slice() {
            [collection] => load_collection(&conn, collection),
            [collection, id, rest @ ..] => {
                let body = load_row(&conn, collection, id)?;
                Ok(to_document_map(body.as_ref().and_then(|b| get_at(b, rest))))
            }
            [] => Ok(DocumentMap::new()),
        }
    }

    fn write_path(&self, path: &str, document: Value) -> StoreResult<()> {
        let segments = split_path(path)?;
        let result = {
            let mut conn = self.lock()?;
            match segments.as_slice() {
                [collection] => replace_collection(&mut conn, collection, document),
                [collection, id, rest @ ..] => {
                    let mut body = load_row(&conn, collection, id)?.unwrap_or(Value::Null);
                    set_at(&mut body, rest, document);
                    store_row(&conn, collection, id, &body)
                }
                [] => Err(StoreError::InvalidPath(path.to_string())),
            }
        };
        self.metrics.record_write(result.is_ok());
        match &result {
            Ok(()) => {
                debug!("wrote {}", path);
                self.registry.notify_changed(path, |p| self.read_map(p));
            }
            Err(e) => warn!("write to {} failed: {}", path, e),
        }
        result
    }
}

fn load_collection(conn: &Connection, collection: &str) -> StoreResult<DocumentMap> {
    let mut stmt = conn
        .prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")
        .map_err(backend)?;
    let rows = stmt
        .query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(backend)?;

    let mut out = DocumentMap::new();
    for row in rows {
        let (id, body) = row.map_err(backend)?;
        let value = serde_json::from_str(&body)
            .map_err(|e| StoreError::InvalidDocument(format!("{collection}/{id}: {e}")))?;
        out.insert(id, value);
    }
    Ok(out)
}

fn load_row(conn: &Connection, collection: &str, id: &str) -> StoreResult<Option<Value>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    body.map(|b| {
        serde_json::from_str(&b)
            .map_err(|e| StoreError::InvalidDocument(format!("{collection}/{id}: {e}")))
    })
    .transpose()
}

/// Writes a row body; a null or emptied body deletes the row.
fn store_row(conn: &Connection, collection: &str, id: &str, body: &Value) -> StoreResult<()> {
    let empty = body.is_null() || body.as_object().is_some_and(|o| o.is_empty());
    if empty {
        conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )
        .map_err(backend)?;
        return Ok(());
    }
    conn.execute(
        "INSERT INTO documents (collection, id, body, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![collection, id, body.to_string(), Utc::now().to_rfc3339()],
    )
    .map_err(backend)?;
    Ok(())
}

fn replace_collection(conn: &mut Connection, collection: &str, document: Value) -> StoreResult<()> {
    let children = match document {
        Value::Null => Default::default(),
        Value::Object(obj) => obj,
        other => {
            return Err(StoreError::InvalidDocument(format!(
                "collection {collection} must be an object, got {other}"
            )));
        }
    };
    let tx = conn.transaction().map_err(backend)?;
    tx.execute(
        "DELETE FROM documents WHERE collection = ?1",
        params![collection],
    )
    .map_err(backend)?;
    for (id, body) in &children {
        store_row(&tx, collection, id, body)?;
    }
    tx.commit().map_err(backend)
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn fetch_all(&self, path: &str) -> StoreResult<DocumentMap> {
        let path = path.to_string();
        self.blocking(move |inner| inner.read_map(&path)).await
    }

    fn subscribe(&self, path: &str, listener: FeedListener) -> StoreResult<Subscription> {
        // One synchronous read on the caller's thread; `subscribe` is not async.
        let initial = self.inner.read_map(path)?;
        let subscription = self.inner.registry.register(path, Arc::clone(&listener))?;
        listener(FeedDelivery::Data(initial));
        Ok(subscription)
    }

    async fn write(&self, path: &str, document: Value) -> StoreResult<()> {
        let path = path.to_string();
        self.blocking(move |inner| inner.write_path(&path, document))
            .await
    }

    async fn append(&self, path: &str, document: Value) -> StoreResult<String> {
        split_path(path)?;
        let millis = Utc::now().timestamp_millis();
        let id = push_id(millis, self.next_push.fetch_add(1, Ordering::SeqCst));
        let document = stamp_document(document, millis)?;
        let child = format!("{}/{}", path.trim_matches('/'), id);
        self.blocking(move |inner| inner.write_path(&child, document))
            .await?;
        Ok(id)
    }
}
