use chrono::{DateTime, Utc};
use kursiyer_common::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::SyncError;
use crate::model::{Candidates, School, SchoolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SnapshotOrigin {
    Empty,
    InitialFetch,
    Feed,
    LocalMutation,
    Cleared,
}

/// Immutable view of every school at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct SchoolsSnapshot {
    pub seq: u64,
    pub origin: SnapshotOrigin,
    pub published_at: DateTime<Utc>,
    schools: BTreeMap<SchoolId, School>,
}

impl SchoolsSnapshot {
    pub fn empty() -> Self {
        Self {
            seq: 0,
            origin: SnapshotOrigin::Empty,
            published_at: Utc::now(),
            schools: BTreeMap::new(),
        }
    }

    pub fn get(&self, school_id: &str) -> Option<&School> {
        self.schools.get(school_id)
    }

    pub fn contains(&self, school_id: &str) -> bool {
        self.schools.contains_key(school_id)
    }

    /// Ordered by id.
    pub fn schools(&self) -> impl Iterator<Item = &School> {
        self.schools.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.schools.keys().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<School> {
        self.schools.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.schools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schools.is_empty()
    }
}

/// Single owner of the school collection. Mutations take `&mut self`, readers get an `Arc`
/// of the latest published snapshot and never see a half-applied update.
pub struct SchoolSnapshotStore {
    seq: u64,
    snapshot_tx: watch::Sender<Arc<SchoolsSnapshot>>,
    snapshot_rx: watch::Receiver<Arc<SchoolsSnapshot>>,
}

impl Default for SchoolSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SchoolSnapshotStore {
    pub fn new() -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(SchoolsSnapshot::empty()));
        Self {
            seq: 0,
            snapshot_tx,
            snapshot_rx,
        }
    }

    /// Replaces the whole collection. Schools absent from `schools` are gone afterwards; a
    /// repeated id keeps the last occurrence.
    pub fn replace_all(&mut self, schools: Vec<School>, origin: SnapshotOrigin) -> Arc<SchoolsSnapshot> {
        let incoming = schools.len();
        let mut map = BTreeMap::new();
        for school in schools {
            map.insert(school.id.clone(), school);
        }
        if map.len() != incoming {
            debug!("replace_all collapsed {} duplicate school ids", incoming - map.len());
        }
        self.publish(map, origin)
    }

    /// Overwrites one school's candidates ahead of store confirmation. The next feed push for
    /// the same school wins over this.
    pub fn apply_local_mutation(
        &mut self,
        school_id: &str,
        candidates: Candidates,
    ) -> Result<Arc<SchoolsSnapshot>, SyncError> {
        let current = self.snapshot();
        if !current.contains(school_id) {
            return Err(SyncError::SchoolNotFound(school_id.to_string()));
        }
        let mut map = current.schools.clone();
        if let Some(school) = map.get_mut(school_id) {
            school.candidates = candidates;
        }
        Ok(self.publish(map, SnapshotOrigin::LocalMutation))
    }

    pub fn snapshot(&self) -> Arc<SchoolsSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<SchoolsSnapshot>> {
        self.snapshot_rx.clone()
    }

    fn publish(
        &mut self,
        schools: BTreeMap<SchoolId, School>,
        origin: SnapshotOrigin,
    ) -> Arc<SchoolsSnapshot> {
        self.seq += 1;
        let snap = Arc::new(SchoolsSnapshot {
            seq: self.seq,
            origin,
            published_at: Utc::now(),
            schools,
        });
        self.snapshot_tx.send_replace(Arc::clone(&snap));
        snap
    }
}
