use kursiyer_common::{debug, logging};
use tokio::sync::watch;

use crate::error::SyncError;
use crate::model::School;
use crate::snapshot::SchoolsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebind {
    /// No session was active; nothing to do.
    Inactive,
    /// The active school was found and its data refreshed.
    Refreshed,
    /// The active school is missing from the collection; last known data kept.
    Retained,
}

/// The logged-in school, derived from the snapshot store by id.
pub struct SessionBinding {
    session_tx: watch::Sender<Option<School>>,
}

impl Default for SessionBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBinding {
    pub fn new() -> Self {
        let (session_tx, _) = watch::channel(None);
        Self { session_tx }
    }

    pub fn login(&mut self, snapshot: &SchoolsSnapshot, school_id: &str) -> Result<School, SyncError> {
        if school_id.trim().is_empty() {
            return Err(SyncError::NoSchoolSelected);
        }
        let school = snapshot
            .get(school_id)
            .cloned()
            .ok_or_else(|| SyncError::SchoolNotFound(school_id.to_string()))?;
        logging::set_session_tag(school.id.clone());
        self.session_tx.send_replace(Some(school.clone()));
        Ok(school)
    }

    /// Clears the session whatever the collection holds.
    pub fn logout(&mut self) -> Option<School> {
        logging::clear_session_tag();
        self.session_tx.send_replace(None)
    }

    pub fn rebind(&mut self, snapshot: &SchoolsSnapshot) -> Rebind {
        let Some(active_id) = self.session_tx.borrow().as_ref().map(|s| s.id.clone()) else {
            return Rebind::Inactive;
        };
        match snapshot.get(&active_id) {
            Some(fresh) => {
                let fresh = fresh.clone();
                self.session_tx.send_if_modified(|current| {
                    if current.as_ref() == Some(&fresh) {
                        false
                    } else {
                        *current = Some(fresh);
                        true
                    }
                });
                Rebind::Refreshed
            }
            None => {
                debug!("school {} missing from snapshot {}, keeping session", active_id, snapshot.seq);
                Rebind::Retained
            }
        }
    }

    pub fn current(&self) -> Option<School> {
        self.session_tx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.session_tx.borrow().is_some()
    }

    pub fn watch(&self) -> watch::Receiver<Option<School>> {
        self.session_tx.subscribe()
    }
}
