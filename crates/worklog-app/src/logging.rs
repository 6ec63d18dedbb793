use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "worklog-";
pub const LOG_FILE_SUFFIX: &str = ".log";
pub const DEFAULT_LOG_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Directory holding the hourly files; `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    pub retention_days: i64,
}

impl LogSettings {
    pub fn console() -> Self {
        LogSettings {
            log_dir: None,
            retention_days: DEFAULT_LOG_RETENTION_DAYS,
        }
    }

    pub fn files_under(data_dir: &str) -> Self {
        LogSettings {
            log_dir: Some(log_dir_for(data_dir)),
            retention_days: DEFAULT_LOG_RETENTION_DAYS,
        }
    }
}

pub fn log_dir_for(data_dir: &str) -> PathBuf {
    PathBuf::from(data_dir).join("logs")
}

fn env_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let Some(log_dir) = settings.log_dir.clone() else {
        init_console_logging();
        return Ok(());
    };

    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    cleanup_old_logs(&log_dir, Utc::now(), settings.retention_days)?;

    let writer = HourlyFileWriter::new(log_dir, settings.retention_days)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(())
}

pub fn init_console_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .init();
}

struct OpenLog {
    hour: String,
    file: File,
}

/// Appends to `worklog-YYYY-MM-DD-HH.log`, switching files when the hour
/// changes and pruning expired files on every switch.
#[derive(Clone)]
struct HourlyFileWriter {
    log_dir: PathBuf,
    retention_days: i64,
    current: Arc<Mutex<OpenLog>>,
}

impl HourlyFileWriter {
    fn new(log_dir: PathBuf, retention_days: i64) -> Result<Self> {
        let hour = hour_key(Utc::now());
        let file = open_log_file(&log_dir, &hour)
            .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;
        Ok(HourlyFileWriter {
            log_dir,
            retention_days,
            current: Arc::new(Mutex::new(OpenLog { hour, file })),
        })
    }

    fn rotate_if_needed(&self, log: &mut OpenLog) -> io::Result<()> {
        let now = Utc::now();
        let hour = hour_key(now);
        if log.hour == hour {
            return Ok(());
        }
        log.file.flush()?;
        log.file = open_log_file(&self.log_dir, &hour)?;
        log.hour = hour;
        let _ = cleanup_old_logs(&self.log_dir, now, self.retention_days);
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for HourlyFileWriter {
    type Writer = HourlyFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for HourlyFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current = self.current.clone();
        let mut log = current
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        self.rotate_if_needed(&mut log)?;
        log.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut log = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        log.file.flush()
    }
}

fn hour_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d-%H").to_string()
}

fn open_log_file(log_dir: &Path, hour: &str) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{LOG_FILE_PREFIX}{hour}{LOG_FILE_SUFFIX}")))
}

fn parse_log_file_hour(file_name: &str) -> Option<DateTime<Utc>> {
    let body = file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    let naive = NaiveDateTime::parse_from_str(&format!("{body}:00:00"), "%Y-%m-%d-%H:%M:%S").ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

pub fn cleanup_old_logs(log_dir: &Path, now: DateTime<Utc>, retention_days: i64) -> Result<()> {
    let cutoff = now - Duration::days(retention_days);
    for path in list_log_files_sorted(log_dir)? {
        let expired = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_log_file_hour)
            .is_some_and(|hour| hour < cutoff);
        if expired {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

/// Log files in chronological order; other files in the directory are ignored.
pub fn list_log_files_sorted(log_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(log_dir) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", log_dir.display())),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_log_file_hour)
            .is_some();
        if is_log {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_last_lines_from_logs(log_dir: &Path, max_lines: usize) -> Result<Vec<String>> {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(max_lines);
    if max_lines == 0 {
        return Ok(Vec::new());
    }
    for file in list_log_files_sorted(log_dir)? {
        let content = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        for line in content.lines() {
            if tail.len() == max_lines {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }
    Ok(tail.into_iter().collect())
}
