//! Error kinds for the core. Each concern gets its own small enum with a hand-written
//! `Display`/`Error` impl rather than reaching for `thiserror`/`anyhow`.

use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    /// A required key was absent. Fatal at startup.
    Missing(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required config key: {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub enum StoreError {
    /// Transient failure (lock contention); the caller may retry.
    Transient(String),
    /// Non-retryable failure; propagated up, logged, never crashes the scheduler.
    Fatal(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Transient(msg) => write!(f, "transient store error: {msg}"),
            StoreError::Fatal(msg) => write!(f, "fatal store error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref sqlite_err, _)
                if sqlite_err.code == rusqlite::ErrorCode::DatabaseBusy
                    || sqlite_err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StoreError::Transient(err.to_string())
            }
            other => StoreError::Fatal(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum ProbeError {
    /// Subprocess exited non-zero.
    NonZeroExit(i32),
    /// The probe did not complete within its budget.
    Timeout,
    /// Subprocess produced no usable output.
    EmptyOutput,
    /// The underlying I/O operation (spawn, connect, request) failed.
    Io(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::NonZeroExit(code) => write!(f, "probe exited with status {code}"),
            ProbeError::Timeout => write!(f, "probe timed out"),
            ProbeError::EmptyOutput => write!(f, "probe produced no output"),
            ProbeError::Io(msg) => write!(f, "probe io error: {msg}"),
        }
    }
}

impl std::error::Error for ProbeError {}

#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    /// A short sample of the offending output, for diagnostics.
    pub sample: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {} (sample: {:?})", self.message, self.sample)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, PartialEq, Eq)]
pub enum ScanManagerError {
    AlreadyRunning,
    AlreadyStopping,
    NotRunning,
    NetworkNotFound,
}

impl fmt::Display for ScanManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanManagerError::AlreadyRunning => write!(f, "a scan is already running"),
            ScanManagerError::AlreadyStopping => write!(f, "a scan is already stopping"),
            ScanManagerError::NotRunning => write!(f, "no scan is running"),
            ScanManagerError::NetworkNotFound => write!(f, "network not found"),
        }
    }
}

impl std::error::Error for ScanManagerError {}
