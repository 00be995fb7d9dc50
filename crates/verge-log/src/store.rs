//! Day-keyed log file store with size rotation and count retention.

use crate::record::{LogLevel, LogRecord};
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, SystemTime};

/// Directory (under the base directory) holding all log files.
pub const LOG_DIR_NAME: &str = "logs";

/// Every log file name starts with this prefix.
pub const LOG_FILE_PREFIX: &str = "clash";

const LOG_FILE_EXTENSION: &str = "log";

/// How many times the fatal path retries a contended lock before it
/// falls back to an uncached append.
const FATAL_LOCK_ATTEMPTS: u32 = 20;

/// Log store errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Failed to create log directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Log I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl LogError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Size and retention limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPolicy {
    /// Soft cap per file; checked after each append
    pub max_file_bytes: u64,
    /// Files kept by the retention sweep (most recently modified first)
    pub max_files: usize,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024, // 10 MiB
            max_files: 7,
        }
    }
}

/// Source of wall-clock time for timestamps and file names.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The real local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// The open handle for the current day.
struct CurrentFile {
    day: String,
    path: PathBuf,
    file: File,
}

/// Process-wide diagnostic log.
///
/// One instance is constructed by the process entry point and shared as
/// `Arc<DiagnosticLog>`; tests build their own over a temp directory.
/// Writes are serialized on the single cached file handle, so the store
/// can be used from any thread.
pub struct DiagnosticLog {
    dir: PathBuf,
    policy: LogPolicy,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<CurrentFile>>,
}

impl DiagnosticLog {
    /// Process-start initialization: open the store under
    /// `<base_dir>/logs`, sweep old files and install the fatal-error
    /// observer.
    pub fn initialize(base_dir: &Path, policy: LogPolicy) -> Result<Arc<Self>, LogError> {
        let log = Arc::new(Self::open(base_dir, policy, Arc::new(SystemClock))?);
        crate::fatal::install_fatal_observer(log.clone());
        Ok(log)
    }

    /// Open the store and run the retention sweep without touching any
    /// process-global hooks.
    pub fn open(
        base_dir: &Path,
        policy: LogPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LogError> {
        let dir = base_dir.join(LOG_DIR_NAME);
        fs::create_dir_all(&dir).map_err(|source| LogError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let log = Self {
            dir,
            policy,
            clock,
            current: Mutex::new(None),
        };
        log.sweep();
        Ok(log)
    }

    /// Directory holding the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> LogPolicy {
        self.policy
    }

    pub(crate) fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    /// Append `"{timestamp} [{level}] [{tag}] {message}"` to today's file.
    ///
    /// Never fails from the caller's point of view: I/O errors are
    /// reported on stderr and dropped.
    pub fn log(&self, level: LogLevel, tag: &str, message: &str) {
        let record = LogRecord::new(self.clock.now(), level, tag, message);
        self.write_record(&record);
    }

    pub fn debug(&self, tag: &str, message: &str) {
        self.log(LogLevel::Debug, tag, message);
    }

    pub fn info(&self, tag: &str, message: &str) {
        self.log(LogLevel::Info, tag, message);
    }

    pub fn warn(&self, tag: &str, message: &str) {
        self.log(LogLevel::Warn, tag, message);
    }

    pub fn error(&self, tag: &str, message: &str) {
        self.log(LogLevel::Error, tag, message);
    }

    /// Append a fully built record.
    pub fn write_record(&self, record: &LogRecord) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.append_locked(&mut current, record) {
            eprintln!("verge-log: dropped record [{}] {}: {e}", record.tag, record.message);
        }
    }

    /// Write path used by the fatal observer.
    ///
    /// The panicking thread may already hold the handle lock, so this
    /// never blocks indefinitely: after a bounded number of attempts it
    /// appends to today's file through a fresh handle.
    pub(crate) fn write_record_fatal(&self, record: &LogRecord) {
        for _ in 0..FATAL_LOCK_ATTEMPTS {
            match self.current.try_lock() {
                Ok(mut current) => {
                    if let Err(e) = self.append_locked(&mut current, record) {
                        eprintln!("verge-log: failed to record fatal error: {e}");
                    }
                    return;
                }
                Err(TryLockError::Poisoned(poisoned)) => {
                    let mut current = poisoned.into_inner();
                    if let Err(e) = self.append_locked(&mut current, record) {
                        eprintln!("verge-log: failed to record fatal error: {e}");
                    }
                    return;
                }
                Err(TryLockError::WouldBlock) => thread::sleep(Duration::from_millis(5)),
            }
        }

        let day = day_key(&record.timestamp);
        let path = self.dir.join(day_file_name(&day));
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(record.render().as_bytes()));
        if let Err(e) = result {
            eprintln!("verge-log: failed to record fatal error: {e}");
        }
    }

    fn append_locked(
        &self,
        current: &mut MutexGuard<'_, Option<CurrentFile>>,
        record: &LogRecord,
    ) -> Result<(), LogError> {
        let day = day_key(&record.timestamp);
        let stale = match current.as_ref() {
            Some(open) => open.day != day || !open.path.exists(),
            None => true,
        };
        if stale {
            **current = Some(self.open_day_file(&day)?);
        }

        let Some(open) = current.as_mut() else {
            return Ok(());
        };
        open.file
            .write_all(record.render().as_bytes())
            .map_err(|e| LogError::io(&open.path, e))?;

        // Check after write: a record may push the file slightly past the cap.
        let len = open
            .file
            .metadata()
            .map_err(|e| LogError::io(&open.path, e))?
            .len();
        if len > self.policy.max_file_bytes {
            **current = Some(self.rotate(&day, &open.path)?);
        }
        Ok(())
    }

    fn open_day_file(&self, day: &str) -> Result<CurrentFile, LogError> {
        let path = self.dir.join(day_file_name(day));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LogError::io(&path, e))?;
        Ok(CurrentFile {
            day: day.to_string(),
            path,
            file,
        })
    }

    /// Move the full file aside under a timestamp suffix and start a
    /// fresh canonical file for the same day.
    ///
    /// Rotated files are never overwritten: when the suffix for this
    /// millisecond is taken, the next free one is used.
    fn rotate(&self, day: &str, path: &Path) -> Result<CurrentFile, LogError> {
        let mut millis = self.clock.now().timestamp_millis();
        let mut rotated = self.dir.join(rotated_file_name(day, millis));
        while rotated.exists() {
            millis += 1;
            rotated = self.dir.join(rotated_file_name(day, millis));
        }
        fs::rename(path, &rotated).map_err(|e| LogError::io(path, e))?;
        self.open_day_file(day)
    }

    /// Path of the cached current file, if one is open.
    pub fn current_file(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|open| open.path.clone())
    }

    /// All log files, most recently modified first.
    pub fn retained_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("verge-log: cannot list {}: {e}", self.dir.display());
                return Vec::new();
            }
        };

        let mut files: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_log_file(path))
            .map(|path| {
                let modified = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();

        // Newest first; names break ties so the order is stable.
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        files.into_iter().map(|(_, path)| path).collect()
    }

    /// Delete everything but the `max_files` most recently modified files.
    ///
    /// Returns the number of files removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        for path in self.retained_files().into_iter().skip(self.policy.max_files) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("verge-log: failed to delete {}: {e}", path.display()),
            }
        }
        removed
    }

    /// Concatenate all retained files into `destination`, newest first,
    /// each preceded by a header line naming the file.
    ///
    /// Returns the number of files exported.
    pub fn export_all(&self, destination: &Path) -> Result<usize, LogError> {
        // Hold the handle lock so no record is half-written into the export.
        let _current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        let out = File::create(destination).map_err(|e| LogError::io(destination, e))?;
        let mut writer = BufWriter::new(out);
        let mut exported = 0;

        for path in self.retained_files() {
            if path == destination {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes = fs::read(&path).map_err(|e| LogError::io(&path, e))?;

            writer
                .write_all(format!("========== {name} ==========\n").as_bytes())
                .and_then(|_| writer.write_all(&bytes))
                .and_then(|_| writer.write_all(b"\n\n"))
                .map_err(|e| LogError::io(destination, e))?;
            exported += 1;
        }

        writer.flush().map_err(|e| LogError::io(destination, e))?;
        Ok(exported)
    }

    /// Delete every retained file and forget the cached handle; the next
    /// record recreates today's file.
    ///
    /// Returns the number of files deleted.
    pub fn clear_all(&self) -> Result<usize, LogError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = None;

        let mut deleted = 0;
        for path in self.retained_files() {
            fs::remove_file(&path).map_err(|e| LogError::io(&path, e))?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

fn day_key(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y-%m-%d").to_string()
}

fn day_file_name(day: &str) -> String {
    format!("{LOG_FILE_PREFIX}-{day}.{LOG_FILE_EXTENSION}")
}

fn rotated_file_name(day: &str, epoch_millis: i64) -> String {
    format!("{LOG_FILE_PREFIX}-{day}-{epoch_millis}.{LOG_FILE_EXTENSION}")
}

fn is_log_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(LOG_FILE_EXTENSION)
}
