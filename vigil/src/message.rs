/// Message module for the monitor
///
/// Types a probe cycle produces: the probe result and the log line it is
/// projected into.
use chrono::{DateTime, Local};
use reqwest::StatusCode;
use std::fmt;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of a single GET against the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The server answered, whatever the status.
    Response { status: StatusCode },
    /// The request never produced a response (connect, TLS, timeout...).
    Error(String),
}

/// One append-only record in the status log.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub result: ProbeResult,
}

impl LogLine {
    pub fn now(result: ProbeResult) -> Self {
        Self {
            timestamp: Local::now(),
            result,
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self.timestamp.format(TIMESTAMP_FORMAT);
        match &self.result {
            ProbeResult::Response { status } => write!(
                f,
                "{}: {} {}",
                timestamp,
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            ),
            ProbeResult::Error(message) => write!(f, "{}: Error - {}", timestamp, message),
        }
    }
}
