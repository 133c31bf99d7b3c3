use crate::{
    config::Settings,
    monitor::{Failure, Monitor, MonitorContext, Outcome},
};
use anyhow::{Context, Result};
use std::{future::Future, time::Duration};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
    task::JoinHandle,
    time,
};

const SHUTDOWN_TIMEOUT_SECS: Duration = Duration::from_secs(10);

enum Event {
    Finished(Result<Outcome, tokio::task::JoinError>),
    StopRequested(&'static str),
}

/// Hosts the monitor task for the lifetime of the process.
pub struct Service {
    settings: Settings,
}

impl Service {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Builds the monitor context, runs the loop until SIGINT/SIGTERM or a
    /// terminating cycle, and returns the exit code for the process.
    pub async fn start(self) -> Result<i32> {
        let ctx = MonitorContext::init(self.settings)?;

        let mut sigint_stream = signal(SignalKind::interrupt()).context("watch SIGINT failed")?;
        let mut sigterm_stream = signal(SignalKind::terminate()).context("watch SIGTERM failed")?;
        let stop_requested = async move {
            tokio::select! {
                _ = sigint_stream.recv() => "SIGINT",
                _ = sigterm_stream.recv() => "SIGTERM",
            }
        };

        let (tx, rx) = watch::channel(false);
        let outcome = Self::supervise(Monitor::new(ctx, rx), tx, stop_requested).await;

        match &outcome {
            Outcome::Cancelled => tracing::info!("Shutdown complete"),
            Outcome::Failed(failure) => tracing::error!("Monitor terminated: {}", failure),
        }
        Ok(outcome.exit_code())
    }

    /// Runs `monitor` as a task and waits for whichever comes first: the task
    /// ending on its own, or `stop_requested` resolving with a signal name.
    ///
    /// Either way the stop request is broadcast before returning, so the task
    /// is asked to wind down in both the "told to stop" and "decided to stop"
    /// paths.
    async fn supervise<F>(monitor: Monitor, tx: watch::Sender<bool>, stop_requested: F) -> Outcome
    where
        F: Future<Output = &'static str>,
    {
        let mut handle = tokio::spawn(monitor.run());

        let event = tokio::select! {
            joined = &mut handle => Event::Finished(joined),
            signal_name = stop_requested => Event::StopRequested(signal_name),
        };

        match event {
            Event::Finished(joined) => {
                let outcome = Self::joined(joined);
                if let Outcome::Failed(_) = outcome {
                    Self::request_stop(&tx);
                }
                outcome
            }
            Event::StopRequested(signal_name) => {
                tracing::info!("{} received, shutdown initiated...", signal_name);
                Self::request_stop(&tx);
                Self::wait_for_shutdown(SHUTDOWN_TIMEOUT_SECS, handle).await
            }
        }
    }

    fn request_stop(tx: &watch::Sender<bool>) {
        // No receiver left means the task is already gone.
        if tx.send(true).is_err() {
            tracing::debug!("monitor task already stopped");
        }
    }

    fn joined(joined: Result<Outcome, tokio::task::JoinError>) -> Outcome {
        joined.unwrap_or_else(|e| Outcome::Failed(Failure::Aborted(e.to_string())))
    }

    async fn wait_for_shutdown(wait_timeout: Duration, mut handle: JoinHandle<Outcome>) -> Outcome {
        match time::timeout(wait_timeout, &mut handle).await {
            Ok(joined) => Self::joined(joined),
            Err(_) => {
                tracing::warn!(
                    "monitor shutdown timed out after {} seconds, aborting",
                    wait_timeout.as_secs()
                );
                handle.abort();
                Outcome::Cancelled
            }
        }
    }
}
