use once_cell::sync::Lazy;
use std::sync::RwLock;

static SESSION_TAG: Lazy<RwLock<Option<String>>> = Lazy::new(|| RwLock::new(None));

/// Tags every following log line with the school that is logged in.
pub fn set_session_tag(school_id: impl Into<String>) {
    if let Ok(mut guard) = SESSION_TAG.write() {
        *guard = Some(school_id.into());
    }
}

pub fn clear_session_tag() {
    if let Ok(mut guard) = SESSION_TAG.write() {
        *guard = None;
    }
}

pub fn session_tag() -> Option<String> {
    SESSION_TAG.read().ok().and_then(|guard| guard.clone())
}

#[macro_export]
macro_rules! log_with_session {
    ($level:expr, $($arg:tt)+) => {{
        if $crate::log::log_enabled!($level) {
            match $crate::logging::session_tag() {
                Some(tag) => $crate::log::log!($level, "[school:{}] {}", tag, format_args!($($arg)+)),
                None => $crate::log::log!($level, "[-] {}", format_args!($($arg)+)),
            }
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        $crate::log_with_session!($crate::log::Level::Error, $($arg)+)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        $crate::log_with_session!($crate::log::Level::Warn, $($arg)+)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        $crate::log_with_session!($crate::log::Level::Info, $($arg)+)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        $crate::log_with_session!($crate::log::Level::Debug, $($arg)+)
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => {
        $crate::log_with_session!($crate::log::Level::Trace, $($arg)+)
    };
}
