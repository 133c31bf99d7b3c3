mod console;
mod file;

use crate::{config::Settings, message::LogLine};
use anyhow::Result;
use async_trait::async_trait;

pub use console::ConsoleReporter;
pub use file::FileReporter;

/// Sink a probe cycle's log line is written to.
///
/// Reporters run in order for every cycle; an error means the line may not
/// have been recorded and is surfaced to the monitor loop.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, line: &LogLine) -> Result<()>;

    /// Returns the name of this reporter for logging purposes.
    fn name(&self) -> &'static str;
}

/// The status log file first, then the structured application log.
pub fn create_reporters(settings: &Settings) -> Vec<Box<dyn Reporter>> {
    vec![
        Box::new(FileReporter::new(settings.log_path.clone())),
        Box::new(ConsoleReporter::new()),
    ]
}
