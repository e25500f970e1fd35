use kursiyer_common::{debug, warn};
use kursiyer_core::snapshot::SchoolSnapshotStore;
use kursiyer_core::{Candidates, ClassKey, SyncError};
use kursiyer_storage::DocumentStore;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::SyncEvent;

struct WriteJob {
    school_id: String,
    class: ClassKey,
    path: String,
    candidates: Candidates,
}

/// Applies candidate count changes locally and persists each one with a single write.
/// Writes go through one queue and reach the store in request order.
pub struct MutationDispatcher {
    store: Arc<dyn DocumentStore>,
    schools_path: String,
    events: mpsc::UnboundedSender<SyncEvent>,
    writer: Option<mpsc::UnboundedSender<WriteJob>>,
}

impl MutationDispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        schools_path: impl Into<String>,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            store,
            schools_path: schools_path.into(),
            events,
            writer: None,
        }
    }

    pub fn candidates_path(&self, school_id: &str) -> String {
        format!("{}/{}/candidates", self.schools_path.trim_matches('/'), school_id)
    }

    /// Moves `class` by `delta`, never below zero, and publishes the result before any I/O.
    /// The write outcome arrives later as `SyncEvent::WriteCompleted`; a failure is not
    /// rolled back.
    pub fn request_candidate_change(
        &mut self,
        snapshots: &mut SchoolSnapshotStore,
        school_id: &str,
        class: ClassKey,
        delta: i64,
    ) -> Result<Candidates, SyncError> {
        let current = snapshots.snapshot();
        let Some(school) = current.get(school_id) else {
            warn!("candidate change for unknown school {}", school_id);
            return Err(SyncError::SchoolNotFound(school_id.to_string()));
        };

        let before = school.candidates.count(class);
        let updated = school.candidates.with_delta(class, delta);
        snapshots.apply_local_mutation(school_id, updated.clone())?;
        debug!(
            "{} {}: {} -> {} (delta {})",
            school_id,
            class,
            before,
            updated.count(class),
            delta
        );

        self.enqueue_write(school_id.to_string(), class, updated.clone());
        Ok(updated)
    }

    fn enqueue_write(&mut self, school_id: String, class: ClassKey, candidates: Candidates) {
        let job = WriteJob {
            path: self.candidates_path(&school_id),
            school_id,
            class,
            candidates,
        };
        let job = match self.writer.as_ref() {
            Some(writer) => match writer.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => {
                    warn!("candidate writer stopped; restarting it");
                    job
                }
            },
            None => job,
        };
        let writer = self.spawn_writer();
        if writer.send(job).is_err() {
            warn!("candidate writer rejected a write");
        }
        self.writer = Some(writer);
    }

    /// Started on first use, so the dispatcher can be built outside a runtime.
    fn spawn_writer(&self) -> mpsc::UnboundedSender<WriteJob> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = store
                    .write(&job.path, job.candidates.to_json())
                    .await
                    .map_err(|e| SyncError::Write {
                        school_id: job.school_id.clone(),
                        reason: e.to_string(),
                    });
                if events
                    .send(SyncEvent::WriteCompleted {
                        school_id: job.school_id,
                        class: job.class,
                        result,
                    })
                    .is_err()
                {
                    debug!("write to {} completed after shutdown", job.path);
                }
            }
            debug!("candidate writer exiting");
        });
        tx
    }
}
