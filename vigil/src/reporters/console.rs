use super::Reporter;
use crate::message::{LogLine, ProbeResult};
use anyhow::Result;
use async_trait::async_trait;

/// Mirrors each log line into the tracing output.
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn report(&self, line: &LogLine) -> Result<()> {
        match line.result {
            ProbeResult::Response { .. } => tracing::info!("{}", line),
            ProbeResult::Error(_) => tracing::warn!("{}", line),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[tokio::test]
    async fn test_default_reporter_accepts_every_line() {
        let reporter = ConsoleReporter::default();

        let ok = LogLine::now(ProbeResult::Response {
            status: StatusCode::OK,
        });
        let failed = LogLine::now(ProbeResult::Error("connection refused".to_string()));

        assert!(reporter.report(&ok).await.is_ok());
        assert!(reporter.report(&failed).await.is_ok());
        assert_eq!(reporter.name(), "console");
    }
}
