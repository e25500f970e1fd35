use async_trait::async_trait;
use chrono::Utc;
use kursiyer_common::{debug, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::metrics::{MetricsRecorder, StoreMetrics};
use crate::registry::{SubscriberRegistry, Subscription};
use crate::tree::{get_at, set_at, split_path, to_document_map};
use crate::{
    DocumentMap, DocumentStore, FeedDelivery, FeedListener, StoreError, StoreResult, push_id,
    stamp_document,
};

/// In-process document tree. Used by tests and by the `memory` backend.
pub struct MemoryDocumentStore {
    root: Mutex<Value>,
    registry: Arc<SubscriberRegistry>,
    fail_writes: AtomicBool,
    next_push: AtomicU64,
    metrics: MetricsRecorder,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Default::default())),
            registry: SubscriberRegistry::new(),
            fail_writes: AtomicBool::new(false),
            next_push: AtomicU64::new(0),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Replaces the value at `path` without counting it as a write. Subscribers are notified.
    pub fn seed(&self, path: &str, value: Value) -> StoreResult<()> {
        let segments = split_path(path)?;
        set_at(&mut *self.lock()?, &segments, value);
        self.notify(path);
        Ok(())
    }

    /// While set, every `write`/`append` fails with a transport error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> u64 {
        self.metrics.snapshot().writes_attempted
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.metrics.snapshot()
    }

    pub fn watch_metrics(&self) -> watch::Receiver<StoreMetrics> {
        self.metrics.watch()
    }

    /// Pushes `error` to the subscribers of `path` as if the backend had failed.
    pub fn inject_feed_error(&self, path: &str, error: StoreError) {
        self.registry.notify_error(path, error);
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn value_at(&self, path: &str) -> StoreResult<Option<Value>> {
        let segments = split_path(path)?;
        let root = self.lock()?;
        Ok(get_at(&*root, &segments).cloned())
    }

    fn read_map(&self, path: &str) -> StoreResult<DocumentMap> {
        let segments = split_path(path)?;
        let root = self.lock()?;
        Ok(to_document_map(get_at(&root, &segments)))
    }

    fn notify(&self, changed: &str) {
        self.registry
            .notify_changed(changed, |path| self.read_map(path));
    }

    fn check_writable(&self, path: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.metrics.record_write(false);
            warn!("rejecting write to {} (writes disabled)", path);
            return Err(StoreError::Transport(format!("write to {path} rejected")));
        }
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Value>> {
        self.root
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn fetch_all(&self, path: &str) -> StoreResult<DocumentMap> {
        self.read_map(path)
    }

    fn subscribe(&self, path: &str, listener: FeedListener) -> StoreResult<Subscription> {
        let initial = self.read_map(path)?;
        let subscription = self.registry.register(path, Arc::clone(&listener))?;
        listener(FeedDelivery::Data(initial));
        Ok(subscription)
    }

    async fn write(&self, path: &str, document: Value) -> StoreResult<()> {
        let segments = split_path(path)?;
        self.check_writable(path)?;
        set_at(&mut *self.lock()?, &segments, document);
        self.metrics.record_write(true);
        debug!("wrote {}", path);
        self.notify(path);
        Ok(())
    }

    async fn append(&self, path: &str, document: Value) -> StoreResult<String> {
        split_path(path)?;
        self.check_writable(path)?;
        let millis = Utc::now().timestamp_millis();
        let id = push_id(millis, self.next_push.fetch_add(1, Ordering::SeqCst));
        let document = stamp_document(document, millis)?;
        let child = format!("{}/{}", path.trim_matches('/'), id);
        let segments = split_path(&child)?;
        set_at(&mut *self.lock()?, &segments, document);
        self.metrics.record_write(true);
        self.notify(&child);
        Ok(id)
    }
}
