//! Fatal-error observer.
//!
//! A panic hook that records the failure (thread, time, payload,
//! location, backtrace) into the diagnostic log and then hands the panic
//! to the previously installed hook, so the platform's own reporting and
//! termination still happen. It observes; it never recovers.

use crate::record::{LogLevel, LogRecord, TIMESTAMP_FORMAT};
use crate::store::DiagnosticLog;
use chrono::{DateTime, Local};
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tag used for records written by the observer.
const FATAL_TAG: &str = "FatalObserver";

const RULE: &str = "========================================";

/// Tracks whether the observer was already installed in this process.
static OBSERVER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the observer once per process.
///
/// Later calls are ignored so the hook chain never records a panic twice.
pub fn install_fatal_observer(log: Arc<DiagnosticLog>) {
    if OBSERVER_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
        let backtrace = Backtrace::force_capture().to_string();

        let report = format_fatal_report(
            thread_name,
            &log.now(),
            &payload_message(info.payload()),
            location.as_deref(),
            &backtrace,
        );
        let record = LogRecord::new(log.now(), LogLevel::Error, FATAL_TAG, "Uncaught panic")
            .with_stack_trace(report);
        log.write_record_fatal(&record);

        previous(info);
    }));
}

/// Render the report block written for an uncaught panic.
pub fn format_fatal_report(
    thread_name: &str,
    at: &DateTime<Local>,
    message: &str,
    location: Option<&str>,
    backtrace: &str,
) -> String {
    let mut report = String::with_capacity(256 + backtrace.len());
    report.push_str(RULE);
    report.push_str("\nUncaught panic\n");
    report.push_str(&format!("Thread: {thread_name}\n"));
    report.push_str(&format!("Time: {}\n", at.format(TIMESTAMP_FORMAT)));
    report.push_str(RULE);
    report.push('\n');
    report.push_str(message);
    report.push('\n');
    if let Some(location) = location {
        report.push_str(&format!("at {location}\n"));
    }
    report.push_str(backtrace);
    if !backtrace.ends_with('\n') {
        report.push('\n');
    }
    report.push_str(RULE);
    report.push('\n');
    report
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
