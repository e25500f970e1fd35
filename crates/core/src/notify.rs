use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::watch;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bounded queue of user-visible notices. The oldest entry is evicted once full.
pub struct NotificationCenter {
    next_id: u64,
    capacity: usize,
    queue_tx: watch::Sender<VecDeque<Notification>>,
}

impl NotificationCenter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (queue_tx, _) = watch::channel(VecDeque::with_capacity(capacity));
        Self {
            next_id: 1,
            capacity,
            queue_tx,
        }
    }

    pub fn push(&mut self, severity: Severity, message: impl Into<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let note = Notification {
            id,
            severity,
            message: message.into(),
            at: Utc::now(),
        };
        let capacity = self.capacity;
        self.queue_tx.send_modify(|queue| {
            while queue.len() >= capacity {
                let _ = queue.pop_front();
            }
            queue.push_back(note);
        });
        id
    }

    pub fn push_error(&mut self, err: &SyncError) -> u64 {
        self.push(Severity::Error, err.user_message())
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        self.queue_tx.send_if_modified(|queue| {
            let before = queue.len();
            queue.retain(|n| n.id != id);
            queue.len() != before
        })
    }

    pub fn current(&self) -> Vec<Notification> {
        self.queue_tx.borrow().iter().cloned().collect()
    }

    pub fn watch(&self) -> watch::Receiver<VecDeque<Notification>> {
        self.queue_tx.subscribe()
    }
}
