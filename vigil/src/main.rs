/// Main module for the Vigil health monitor
///
/// Watches one URL over a certificate-pinned client and exits non-zero on the
/// first failed or non-200 probe, leaving restarts to the process supervisor.
mod config;
mod logger;
mod message;
mod monitor;
mod pinning;
mod probe;
mod reporters;
mod service;

use clap::Parser;
use config::Config;
use service::Service;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "VIGIL_CONFIG")]
    config: PathBuf,
}

// Relative log paths are anchored next to the binary, falling back to the
// working directory when the executable path is unavailable.
fn base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    tracing::debug!("Config path: {:?}", cli.config);
    let settings = Config::new(&cli.config)?
        .app_settings
        .resolve_log_path(&base_dir());

    Service::new(settings).start().await
}

/// Entry point. The only place the process is terminated.
#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let logger = logger::init();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Failed to start monitor: {:#}", e);
            eprintln!("Failed to start monitor: {:#}", e);
            1
        }
    };

    // process::exit skips destructors; flush the log writer first.
    drop(logger);
    std::process::exit(code);
}
