pub mod error;
pub mod fees;
pub mod model;
pub mod notify;
pub mod session;
pub mod snapshot;

pub use error::SyncError;
pub use model::{Candidates, ClassKey, School, SchoolId};
