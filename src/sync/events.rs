use kursiyer_core::{ClassKey, School, SyncError};

/// What a feed delivery became after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Schools(Vec<School>),
    Error(SyncError),
}

/// User-facing requests, usually sent through a `SyncHandle`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { school_id: String },
    Logout,
    ChangeCandidates { school_id: String, class: ClassKey, delta: i64 },
    Reload,
    Dismiss(u64),
    Shutdown,
}

/// Everything the coordinator reacts to, in arrival order. `epoch` ties feed and fetch
/// results to the auth session that started them.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Feed {
        epoch: u64,
        update: FeedUpdate,
    },
    InitialFetch {
        epoch: u64,
        result: Result<Vec<School>, SyncError>,
    },
    WriteCompleted {
        school_id: String,
        class: ClassKey,
        result: Result<(), SyncError>,
    },
    Command(Command),
}
