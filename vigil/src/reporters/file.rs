use super::Reporter;
use crate::message::LogLine;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// Appends one newline-terminated line per cycle to the status log.
///
/// The file is opened in append mode for every write and never truncated or
/// rotated, so it grows without bound.
pub struct FileReporter {
    file_path: PathBuf,
}

impl FileReporter {
    pub fn new(file_path: PathBuf) -> Self {
        Self { file_path }
    }
}

#[async_trait]
impl Reporter for FileReporter {
    async fn report(&self, line: &LogLine) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .with_context(|| format!("Failed to open log file: {}", self.file_path.display()))?;

        let log_line = format!("{}\n", line);
        file.write_all(log_line.as_bytes())
            .await
            .with_context(|| "Failed to write to log file")?;

        file.flush()
            .await
            .with_context(|| "Failed to flush log file")?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
