//! Document store adapters.
//!
//! A store is a JSON tree addressed by slash-separated paths (`schools/s1/candidates`).
//! Subscribers always receive the **whole** current value at their path on every change that
//! touches it, never a delta. Consumers reconcile by full replacement and rely on that; an
//! implementation must not coalesce pushes into diffs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod metrics;
pub mod registry;
pub mod sqlite3;
pub mod tree;

pub use memory::MemoryDocumentStore;
pub use metrics::StoreMetrics;
pub use registry::{SubscriberRegistry, Subscription};
pub use sqlite3::SqliteDocumentStore;

/// Children of a path keyed by their id.
pub type DocumentMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid path {0:?}")]
    InvalidPath(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedDelivery {
    Data(DocumentMap),
    Error(StoreError),
}

/// Called synchronously by the store; keep it short (normalize and enqueue).
pub type FeedListener = Arc<dyn Fn(FeedDelivery) + Send + Sync>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot read of every child under `path`. A missing path is an empty map.
    async fn fetch_all(&self, path: &str) -> StoreResult<DocumentMap>;

    /// Registers `listener` for `path`. The current value is delivered once right away, then
    /// again after every change under or above `path`.
    fn subscribe(&self, path: &str, listener: FeedListener) -> StoreResult<Subscription>;

    /// Overwrites the value at `path`. `Value::Null` deletes it.
    async fn write(&self, path: &str, document: Value) -> StoreResult<()>;

    /// Adds `document` under `path` with a store-assigned id and a `timestamp` field in epoch
    /// milliseconds. Returns the new id.
    async fn append(&self, path: &str, document: Value) -> StoreResult<String>;
}

/// Time-ordered id for appended documents.
pub(crate) fn push_id(millis: i64, seq: u64) -> String {
    format!("{:013}-{:06}", millis.max(0), seq % 1_000_000)
}

/// Stamps `timestamp` on an appended object document.
pub(crate) fn stamp_document(document: Value, millis: i64) -> StoreResult<Value> {
    match document {
        Value::Object(mut obj) => {
            obj.insert("timestamp".to_string(), Value::from(millis));
            Ok(Value::Object(obj))
        }
        other => Err(StoreError::InvalidDocument(format!(
            "appended documents must be objects, got {other}"
        ))),
    }
}
