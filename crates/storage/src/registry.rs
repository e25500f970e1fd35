use kursiyer_common::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::tree::{paths_overlap, split_path};
use crate::{DocumentMap, FeedDelivery, FeedListener, StoreError, StoreResult};

struct Entry {
    path: String,
    listener: FeedListener,
}

/// Listener bookkeeping shared by the store backends.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>, path: &str, listener: FeedListener) -> StoreResult<Subscription> {
        split_path(path)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock()?.insert(
            id,
            Entry {
                path: path.to_string(),
                listener,
            },
        );
        debug!("subscriber {} registered on {}", id, path);
        Ok(Subscription {
            id,
            path: path.to_string(),
            registry: Arc::downgrade(self),
            active: AtomicBool::new(true),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes the full value at each affected subscriber's path. Listeners run after the
    /// registry lock is released.
    pub fn notify_changed(
        &self,
        changed_path: &str,
        mut load: impl FnMut(&str) -> StoreResult<DocumentMap>,
    ) {
        let Ok(changed) = split_path(changed_path) else {
            return;
        };
        for (path, listener) in self.affected(|sub| paths_overlap(sub, &changed)) {
            let delivery = match load(&path) {
                Ok(map) => FeedDelivery::Data(map),
                Err(e) => FeedDelivery::Error(e),
            };
            listener(delivery);
        }
    }

    /// Sends `error` to every subscriber whose path overlaps `path`.
    pub fn notify_error(&self, path: &str, error: StoreError) {
        let Ok(target) = split_path(path) else {
            return;
        };
        for (_, listener) in self.affected(|sub| paths_overlap(sub, &target)) {
            listener(FeedDelivery::Error(error.clone()));
        }
    }

    fn affected(&self, matches: impl Fn(&[&str]) -> bool) -> Vec<(String, FeedListener)> {
        let Ok(entries) = self.lock() else {
            return Vec::new();
        };
        entries
            .values()
            .filter(|entry| {
                split_path(&entry.path)
                    .map(|segments| matches(&segments))
                    .unwrap_or(false)
            })
            .map(|entry| (entry.path.clone(), Arc::clone(&entry.listener)))
            .collect()
    }

    fn remove(&self, id: u64) -> bool {
        self.lock()
            .map(|mut entries| entries.remove(&id).is_some())
            .unwrap_or(false)
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<u64, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("subscriber registry poisoned".to_string()))
    }
}

/// Handle returned by `subscribe`. Unsubscribing is idempotent and also happens on drop.
pub struct Subscription {
    id: u64,
    path: String,
    registry: Weak<SubscriberRegistry>,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.registry.upgrade() {
            Some(registry) => {
                if registry.remove(self.id) {
                    debug!("subscriber {} on {} removed", self.id, self.path);
                }
            }
            None => warn!("store dropped before subscriber {} on {} unsubscribed", self.id, self.path),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}
