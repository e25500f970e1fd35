pub mod auth;
pub mod sync;

pub use kursiyer_common::config;
pub use kursiyer_storage as storage;

pub use crate::auth::{AuthService, AuthState, LocalAuthService};
pub use crate::sync::{CoordinatorConfig, SyncCoordinator, SyncHandle, ViewState};
