/// Monitor module
///
/// Runs the probe cycle for the single configured target:
/// probe, write the log line, decide, then sleep until the next cycle.
/// The loop never exits the process itself; it returns an [`Outcome`] and
/// the host turns that into an exit code.
use crate::{
    config::Settings,
    message::{LogLine, ProbeResult},
    pinning::PinnedCertificate,
    probe::{HttpProbe, Probe},
    reporters::{Reporter, create_reporters},
};
use anyhow::Result;
use reqwest::StatusCode;
use std::fmt;
use tokio::sync::watch;

/// Everything the loop needs, built once at startup and never mutated.
pub struct MonitorContext {
    pub settings: Settings,
    pub probe: Box<dyn Probe>,
    pub reporters: Vec<Box<dyn Reporter>>,
}

impl MonitorContext {
    /// Loads the pinned certificate (the only time it is read) and builds the
    /// pinned HTTP client. Fails if the certificate is missing or unparsable.
    pub fn init(settings: Settings) -> Result<Self> {
        let pinned = PinnedCertificate::load(&settings.cert_path)?;
        tracing::info!(
            "Pinned certificate {} ({} bytes), fingerprint SHA-256 {}",
            settings.cert_path.display(),
            pinned.der().len(),
            pinned.fingerprint()
        );

        let probe = HttpProbe::new(&settings, &pinned)?;
        let reporters = create_reporters(&settings);

        Ok(Self {
            settings,
            probe: Box::new(probe),
            reporters,
        })
    }
}

/// Why the loop decided to stop on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    UnexpectedStatus(StatusCode),
    ProbeError(String),
    LogWrite(String),
    Aborted(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::UnexpectedStatus(status) => write!(f, "unexpected status {}", status),
            Failure::ProbeError(message) => write!(f, "probe failed: {}", message),
            Failure::LogWrite(message) => write!(f, "failed to write log line: {}", message),
            Failure::Aborted(message) => write!(f, "monitor task aborted: {}", message),
        }
    }
}

/// How the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Stopped by an external request; not a failure.
    Cancelled,
    /// The loop decided to stop.
    Failed(Failure),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Cancelled => 0,
            Outcome::Failed(_) => 1,
        }
    }
}

// Resolves once a stop has been requested or the sender is gone.
async fn cancelled(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

pub struct Monitor {
    ctx: MonitorContext,
    shutdown_rx: watch::Receiver<bool>,
}

impl Monitor {
    pub fn new(ctx: MonitorContext, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self { ctx, shutdown_rx }
    }

    /// Runs probe cycles strictly one after another until cancelled or a
    /// cycle ends in anything but `200 OK`.
    pub async fn run(mut self) -> Outcome {
        tracing::info!(
            "Monitoring {} every {}",
            self.ctx.settings.url,
            humantime::format_duration(self.ctx.settings.poll_interval)
        );

        loop {
            let stop = *self.shutdown_rx.borrow();
            if stop {
                tracing::info!("Stop requested, monitor exiting");
                return Outcome::Cancelled;
            }

            let result = tokio::select! {
                biased;
                _ = cancelled(&mut self.shutdown_rx) => {
                    tracing::info!("Stop requested during probe, monitor exiting");
                    return Outcome::Cancelled;
                }
                result = self.ctx.probe.probe(&self.ctx.settings.url) => result,
            };

            let line = LogLine::now(result);
            if let Err(e) = self.report(&line).await {
                let message = format!("{:#}", e);
                tracing::error!("Failed to record status: {}", message);
                return Outcome::Failed(Failure::LogWrite(message));
            }

            match line.result {
                ProbeResult::Response { status } if status == StatusCode::OK => {}
                ProbeResult::Response { status } => {
                    tracing::error!("Status not OK. Exiting.");
                    return Outcome::Failed(Failure::UnexpectedStatus(status));
                }
                ProbeResult::Error(message) => {
                    tracing::error!("Exception occurred: {}", message);
                    return Outcome::Failed(Failure::ProbeError(message));
                }
            }

            tokio::select! {
                biased;
                _ = cancelled(&mut self.shutdown_rx) => {
                    tracing::info!("Stop requested while sleeping, monitor exiting");
                    return Outcome::Cancelled;
                }
                _ = tokio::time::sleep(self.ctx.settings.poll_interval) => {}
            }
        }
    }

    async fn report(&self, line: &LogLine) -> Result<()> {
        for reporter in &self.ctx.reporters {
            reporter.report(line).await.map_err(|e| {
                e.context(format!("Reporter '{}' failed", reporter.name()))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pinning::fixtures::self_signed, probe::MockProbe, reporters::FileReporter};
    use mockall::{Sequence, predicate::eq};
    use pretty_assertions::assert_eq;
    use std::{path::PathBuf, time::Duration};
    use tempfile::TempDir;

    const URL: &str = "https://example.local/health";

    fn settings(log_path: PathBuf, poll_interval: Duration) -> Settings {
        Settings {
            url: URL.to_string(),
            log_path,
            cert_path: "pinned.pem".into(),
            poll_interval,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn respond(status: StatusCode) -> ProbeResult {
        ProbeResult::Response { status }
    }

    // Builds a monitor writing to a temp log with a probe replaying `results` in order.
    fn create_monitor(
        dir: &TempDir,
        poll_interval: Duration,
        results: Vec<ProbeResult>,
    ) -> (Monitor, watch::Sender<bool>, PathBuf) {
        let log_path = dir.path().join("monitor.log");
        let mut probe = MockProbe::new();
        let mut seq = Sequence::new();
        for result in results {
            probe
                .expect_probe()
                .with(eq(URL))
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| result.clone());
        }

        let ctx = MonitorContext {
            settings: settings(log_path.clone(), poll_interval),
            probe: Box::new(probe),
            reporters: vec![Box::new(FileReporter::new(log_path.clone()))],
        };
        let (tx, rx) = watch::channel(false);
        (Monitor::new(ctx, rx), tx, log_path)
    }

    fn read_lines(path: &PathBuf) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_non_ok_status_is_fatal_after_one_line() {
        for status in [
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::MOVED_PERMANENTLY,
            StatusCode::NO_CONTENT,
        ] {
            let dir = TempDir::new().unwrap();
            let (monitor, _tx, log_path) =
                create_monitor(&dir, Duration::from_secs(60), vec![respond(status)]);

            let outcome = monitor.run().await;

            assert_eq!(outcome, Outcome::Failed(Failure::UnexpectedStatus(status)));
            assert_eq!(outcome.exit_code(), 1);
            let lines = read_lines(&log_path);
            assert_eq!(lines.len(), 1);
            assert!(
                lines[0].contains(&format!(": {} ", status.as_u16())),
                "unexpected line {}",
                lines[0]
            );
        }
    }

    #[tokio::test]
    async fn test_probe_error_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (monitor, _tx, log_path) = create_monitor(
            &dir,
            Duration::from_secs(60),
            vec![ProbeResult::Error("connection refused".to_string())],
        );

        let outcome = monitor.run().await;

        assert_eq!(
            outcome,
            Outcome::Failed(Failure::ProbeError("connection refused".to_string()))
        );
        assert_eq!(outcome.exit_code(), 1);
        let lines = read_lines(&log_path);
        assert_eq!(lines.len(), 1);
        let (_, rest) = lines[0].split_once(": ").unwrap();
        assert!(rest.starts_with("Error - "), "unexpected line {}", lines[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ok_then_unavailable_after_interval() {
        let dir = TempDir::new().unwrap();
        let interval = Duration::from_secs(60);
        let (monitor, _tx, log_path) = create_monitor(
            &dir,
            interval,
            vec![
                respond(StatusCode::OK),
                respond(StatusCode::SERVICE_UNAVAILABLE),
            ],
        );

        let started = tokio::time::Instant::now();
        let outcome = monitor.run().await;

        assert!(started.elapsed() >= interval);
        assert_eq!(
            outcome,
            Outcome::Failed(Failure::UnexpectedStatus(StatusCode::SERVICE_UNAVAILABLE))
        );
        let lines = read_lines(&log_path);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(": 200 OK"));
        assert!(lines[1].ends_with(": 503 Service Unavailable"));
    }

    #[tokio::test]
    async fn test_one_line_per_cycle_in_order() {
        let dir = TempDir::new().unwrap();
        let (monitor, _tx, log_path) = create_monitor(
            &dir,
            Duration::from_millis(10),
            vec![
                respond(StatusCode::OK),
                respond(StatusCode::OK),
                respond(StatusCode::OK),
                ProbeResult::Error("reset by peer".to_string()),
            ],
        );

        let outcome = monitor.run().await;

        assert_eq!(outcome.exit_code(), 1);
        let lines = read_lines(&log_path);
        assert_eq!(lines.len(), 4);
        assert!(lines[..3].iter().all(|l| l.ends_with(": 200 OK")));
        assert!(lines[3].ends_with(": Error - reset by peer"));
    }

    #[tokio::test]
    async fn test_cancel_during_sleep_is_not_a_failure() {
        let dir = TempDir::new().unwrap();
        let (monitor, tx, log_path) =
            create_monitor(&dir, Duration::from_secs(60), vec![respond(StatusCode::OK)]);

        let handle = tokio::spawn(monitor.run());
        // Give the first cycle time to land in the sleep.
        while read_lines(&log_path).is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not stop promptly")
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(read_lines(&log_path).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_probe_writes_nothing() {
        struct HangingProbe;

        #[async_trait::async_trait]
        impl Probe for HangingProbe {
            async fn probe(&self, _url: &str) -> ProbeResult {
                std::future::pending().await
            }
        }

        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("monitor.log");
        let ctx = MonitorContext {
            settings: settings(log_path.clone(), Duration::from_secs(60)),
            probe: Box::new(HangingProbe),
            reporters: vec![Box::new(FileReporter::new(log_path.clone()))],
        };
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(Monitor::new(ctx, rx).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not stop promptly")
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert!(read_lines(&log_path).is_empty());
    }

    #[tokio::test]
    async fn test_already_cancelled_never_probes() {
        let dir = TempDir::new().unwrap();
        let (monitor, tx, log_path) = create_monitor(&dir, Duration::from_secs(60), vec![]);
        tx.send(true).unwrap();

        assert_eq!(monitor.run().await, Outcome::Cancelled);
        assert!(read_lines(&log_path).is_empty());
    }

    #[tokio::test]
    async fn test_log_write_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("missing-dir").join("monitor.log");
        let mut probe = MockProbe::new();
        probe
            .expect_probe()
            .times(1)
            .returning(|_| ProbeResult::Response { status: StatusCode::OK });

        let ctx = MonitorContext {
            settings: settings(log_path.clone(), Duration::from_secs(60)),
            probe: Box::new(probe),
            reporters: vec![Box::new(FileReporter::new(log_path))],
        };
        let (_tx, rx) = watch::channel(false);

        let outcome = Monitor::new(ctx, rx).run().await;

        assert!(matches!(outcome, Outcome::Failed(Failure::LogWrite(_))));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_init_fails_without_certificate() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path().join("monitor.log"), Duration::from_secs(60));
        settings.cert_path = dir.path().join("absent.pem");

        assert!(MonitorContext::init(settings).is_err());
    }

    #[tokio::test]
    async fn test_init_fails_when_file_is_not_a_certificate() {
        let dir = TempDir::new().unwrap();
        let cert_path = dir.path().join("pinned.der");
        std::fs::write(&cert_path, [0x30, 0x00]).unwrap();
        let mut settings = settings(dir.path().join("monitor.log"), Duration::from_secs(60));
        settings.cert_path = cert_path;

        assert!(MonitorContext::init(settings).is_err());
    }

    #[tokio::test]
    async fn test_init_with_pinned_certificate() {
        let dir = TempDir::new().unwrap();
        let cert_path = dir.path().join("pinned.der");
        std::fs::write(&cert_path, self_signed().cert.der()).unwrap();
        let mut settings = settings(dir.path().join("monitor.log"), Duration::from_secs(60));
        settings.cert_path = cert_path;

        let ctx = MonitorContext::init(settings).unwrap();

        assert_eq!(ctx.reporters.len(), 2);
    }
}
