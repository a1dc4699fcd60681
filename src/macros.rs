// src/macros.rs

//
// Crate-private logging macros.
//
// With the `logging` feature the level macros forward to `tracing`.
// Without it, errors still reach stderr and everything else compiles away.
//
// `diag!` additionally hands the formatted line to a channel's diagnostic
// sink, so applications that do not install a tracing subscriber can still
// watch endpoint lifecycle events.
//

#![allow(unused_macros)]

#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => { tracing::error!($($arg)*) };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => { eprintln!($($arg)*) };
}

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "logging")]
macro_rules! log_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*) };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_info {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

// Format once, log at debug, then forward to the diagnostic sink (if any).
macro_rules! diag {
    ($sink:expr, $($arg:tt)*) => {{
        let line = format!($($arg)*);
        $crate::log_debug!("{line}");
        $sink.emit(&line);
    }};
}

pub(crate) use diag;
pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
