use kursiyer_common::{debug, warn};
use kursiyer_core::{School, SyncError};
use kursiyer_storage::{DocumentMap, DocumentStore, FeedDelivery, FeedListener, Subscription};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::{FeedUpdate, SyncEvent};

/// Turns an id-keyed document map into schools. Missing fields read as empty.
pub fn normalize_schools(documents: DocumentMap) -> Vec<School> {
    documents
        .iter()
        .map(|(id, doc)| School::from_document(id, doc))
        .collect()
}

/// One-shot read of the schools collection.
pub async fn get_schools_data(store: &dyn DocumentStore, path: &str) -> Result<Vec<School>, SyncError> {
    let documents = store
        .fetch_all(path)
        .await
        .map_err(|e| SyncError::Fetch(e.to_string()))?;
    Ok(normalize_schools(documents))
}

/// Owns the live subscription to the schools collection and the initial fetch that races it.
pub struct ChangeFeedAdapter {
    store: Arc<dyn DocumentStore>,
    path: String,
    events: mpsc::UnboundedSender<SyncEvent>,
    subscription: Option<Subscription>,
    epoch: u64,
    delivered: bool,
}

impl ChangeFeedAdapter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        path: impl Into<String>,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            events,
            subscription: None,
            epoch: 0,
            delivered: false,
        }
    }

    /// Subscribes for `epoch`, dropping any earlier subscription first. Every delivery is
    /// normalized in the store's callback and queued as a `SyncEvent::Feed`.
    pub fn start(&mut self, epoch: u64) -> Result<(), SyncError> {
        self.stop();
        self.epoch = epoch;
        self.delivered = false;

        let tx = self.events.clone();
        let listener: FeedListener = Arc::new(move |delivery| {
            let update = match delivery {
                FeedDelivery::Data(documents) => FeedUpdate::Schools(normalize_schools(documents)),
                FeedDelivery::Error(e) => FeedUpdate::Error(SyncError::Feed(e.to_string())),
            };
            if tx.send(SyncEvent::Feed { epoch, update }).is_err() {
                debug!("feed delivery for epoch {} dropped, coordinator gone", epoch);
            }
        });

        let subscription = self
            .store
            .subscribe(&self.path, listener)
            .map_err(|e| SyncError::Feed(e.to_string()))?;
        debug!("subscribed to {} for epoch {}", self.path, epoch);
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Spawns the one-shot fetch; its result is queued as `SyncEvent::InitialFetch`.
    pub fn fetch_initial(&self, epoch: u64) {
        let store = Arc::clone(&self.store);
        let path = self.path.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = get_schools_data(store.as_ref(), &path).await;
            if tx.send(SyncEvent::InitialFetch { epoch, result }).is_err() {
                debug!("initial fetch for epoch {} finished after shutdown", epoch);
            }
        });
    }

    /// Safe to call any number of times, including before `start`.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            debug!("unsubscribed from {} (epoch {})", self.path, self.epoch);
        }
    }

    pub fn mark_delivered(&mut self) {
        self.delivered = true;
    }

    /// False once any feed delivery of the current epoch has been seen.
    pub fn accepts_initial_fetch(&self) -> bool {
        if self.delivered {
            warn!("initial fetch for epoch {} superseded by the change feed", self.epoch);
        }
        !self.delivered
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }
}

impl Drop for ChangeFeedAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}
