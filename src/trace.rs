//! Logging macros for the engine
//!
//! Diagnostics are routed through the `log` crate when the `logging`
//! feature is enabled and compile to nothing otherwise, so release
//! builds pay no cost for per-token tracing.

/// Debug-level message from a token or registry - no-op when logging is disabled
#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

/// Debug-level message from a token or registry
#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

/// Error-level message carrying a cause - no-op when logging is disabled
#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {};
}

/// Error-level message carrying a cause
#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => { log::error!($($arg)*) };
}

pub(crate) use log_debug;
pub(crate) use log_error;
