//! Entry point for the segment travel-time sampler.
//!
//! Loads the static route/stop reference data once, then runs a fixed pool of
//! sampling workers until interrupted. Configuration is environment-only.

use anyhow::Result;
use eta_segment_sampler::governor::Governor;
use eta_segment_sampler::provider::HttpEtaProvider;
use eta_segment_sampler::reference;
use eta_segment_sampler::store::EstimateStore;
use eta_segment_sampler::worker::{self, SamplerContext};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const DEFAULT_REFERENCE_URL: &str = "https://data.hkbus.app";
const DEFAULT_WORKERS: usize = 4;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/eta_segment_sampler.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("eta_segment_sampler.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let reference_url = env_or("REFERENCE_URL", DEFAULT_REFERENCE_URL);
    let eta_api_base = env_or("ETA_API_BASE", DEFAULT_REFERENCE_URL);
    let data_dir = env_or("DATA_DIR", "data");
    let workers: usize = env_or("WORKERS", &DEFAULT_WORKERS.to_string())
        .parse()
        .unwrap_or(DEFAULT_WORKERS);

    info!(reference_url = %reference_url, "Loading reference data");
    let db = Arc::new(reference::load(&reference_url).await?);
    info!(
        routes = db.routes.len(),
        stops = db.stops.len(),
        holidays = db.holidays.len(),
        "Reference data loaded"
    );

    let provider: Arc<HttpEtaProvider> = Arc::new(HttpEtaProvider::new(eta_api_base)?);
    let store = Arc::new(EstimateStore::new(&data_dir));
    let governor = Arc::new(Governor::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(workers, data_dir = %data_dir, "Starting sampling workers. Press Ctrl+C to stop.");
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let ctx = SamplerContext {
            db: db.clone(),
            provider: provider.clone(),
            store: store.clone(),
            governor: governor.clone(),
        };
        handles.push(tokio::spawn(worker::run(ctx, shutdown_rx.clone())));
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping workers");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task join failed");
        }
    }

    info!("Program terminated by user");
    Ok(())
}
