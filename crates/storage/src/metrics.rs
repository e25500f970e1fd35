use chrono::{DateTime, Utc};
use tokio::sync::watch;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub writes_attempted: u64,
    pub writes_failed: u64,
    pub last_write_at: Option<DateTime<Utc>>,
}

/// Per-store write counters published on a watch channel.
pub struct MetricsRecorder {
    tx: watch::Sender<StoreMetrics>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StoreMetrics::default());
        Self { tx }
    }

    pub fn record_write(&self, ok: bool) {
        self.tx.send_modify(|m| {
            m.writes_attempted += 1;
            if ok {
                m.last_write_at = Some(Utc::now());
            } else {
                m.writes_failed += 1;
            }
        });
    }

    pub fn snapshot(&self) -> StoreMetrics {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<StoreMetrics> {
        self.tx.subscribe()
    }
}
