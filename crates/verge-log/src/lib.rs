//! Verge Diagnostic Log
//!
//! Crash-safe, append-only diagnostic logging for the VPN session
//! controller. Records land in one file per calendar day under
//! `<base>/logs/`, survive process death (every record is written
//! through to disk before `log` returns), and are rotated and swept so
//! the directory stays bounded.
//!
//! # Layout
//!
//! ```text
//! <base>/logs/
//!   clash-2026-10-16.log                 <- current day
//!   clash-2026-10-16-1792140000123.log   <- rotated after exceeding the cap
//!   clash-2026-10-15.log                 <- previous days, kept until swept
//! ```
//!
//! # Integration
//!
//! - [`DiagnosticLog::initialize`] sweeps old files and installs the
//!   fatal-error observer (a panic hook that records then chains).
//! - [`DiagnosticLayer`] forwards `tracing` events into the log so the
//!   rest of the workspace keeps using the `tracing` macros.

mod fatal;
mod layer;
mod record;
mod store;

pub use fatal::{install_fatal_observer, format_fatal_report};
pub use layer::DiagnosticLayer;
pub use record::{LogLevel, LogRecord, TIMESTAMP_FORMAT};
pub use store::{
    Clock, DiagnosticLog, LogError, LogPolicy, SystemClock, LOG_DIR_NAME, LOG_FILE_PREFIX,
};
