//! Trustenv Plane Binary
//!
//! Bootstraps the root of trust from the configured directory and reports
//! what was loaded.

use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use trustenv_plane::{FileSource, Plane, PlaneConfig};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration first, so the log level can come from it
    let config = match PlaneConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("trustenv-plane: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("trustenv-plane: failed to set tracing subscriber: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = trustenv_core::version(),
        root = %config.root.display(),
        "Starting trust plane"
    );

    let plane = Plane::new(config, Arc::new(FileSource::new()));

    match plane.bootstrap().await {
        Ok(report) => {
            info!(
                fingerprint = %report.system_key_fingerprint,
                segments = ?plane.store().segment_names(),
                "Root of trust loaded"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, class = ?e.class(), "Bootstrap failed");
            ExitCode::FAILURE
        }
    }
}
