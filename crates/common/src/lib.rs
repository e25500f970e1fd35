pub mod config;
pub mod logging;
pub mod paths;

#[doc(hidden)]
pub use log;
