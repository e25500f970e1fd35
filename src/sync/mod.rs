//! Live synchronization of the schools collection.
//!
//! The coordinator owns all state and reacts to one ordered queue of events. The feed adapter
//! and the mutation dispatcher only ever post into that queue; store I/O runs on spawned tasks.

pub mod coordinator;
pub mod dispatcher;
pub mod events;
pub mod feed;

pub use coordinator::{CoordinatorConfig, SyncCoordinator, SyncHandle, ViewState};
pub use dispatcher::MutationDispatcher;
pub use events::{Command, FeedUpdate, SyncEvent};
pub use feed::{ChangeFeedAdapter, get_schools_data, normalize_schools};
