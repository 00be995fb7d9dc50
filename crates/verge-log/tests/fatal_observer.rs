//! The fatal observer records a panic from any thread, then lets it
//! propagate as usual. Lives in its own test binary because the panic
//! hook is process-global.

use std::fs;
use std::thread;
use tempfile::TempDir;
use verge_log::{DiagnosticLog, LogPolicy};

#[test]
fn test_panic_in_named_thread_is_recorded() {
    let tmp = TempDir::new().unwrap();
    let log = DiagnosticLog::initialize(tmp.path(), LogPolicy::default()).unwrap();

    let worker = thread::Builder::new()
        .name("tunnel-worker".to_string())
        .spawn(|| panic!("interface handle lost"))
        .unwrap();

    // The panic still reaches the joiner: the observer never swallows it.
    assert!(worker.join().is_err());

    let text: String = log
        .retained_files()
        .iter()
        .map(|path| fs::read_to_string(path).unwrap())
        .collect();
    assert!(text.contains("[ERROR] [FatalObserver] Uncaught panic"));
    assert!(text.contains("Thread: tunnel-worker\n"));
    assert!(text.contains("interface handle lost\n"));
    assert!(text.contains("fatal_observer.rs"));
}
