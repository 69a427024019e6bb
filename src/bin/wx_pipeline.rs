// wx_pipeline - weather collection, storage, and aggregation pipeline
//
// Copyright 2025 The wx_pipeline Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use chrono::Duration;
use clap::{Parser, Subcommand};
use prometheus_client::registry::Registry;
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;
use wx_pipeline::aggregate::{Aggregator, RunOutcome, DEFAULT_SIGMA_K, DEFAULT_WINDOW_DAYS};
use wx_pipeline::client::OwmClient;
use wx_pipeline::http::AppState;
use wx_pipeline::ingest::IngestJob;
use wx_pipeline::metrics::PipelineMetrics;
use wx_pipeline::sink::BucketSink;
use wx_pipeline::store::ReadingStore;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);
const DEFAULT_TIMEOUT_MILLIS: u64 = 10000;
const DEFAULT_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const DEFAULT_HISTORY_DAYS: i64 = 7;

#[derive(Debug, Parser)]
#[clap(name = "wx-pipeline", version = clap::crate_version!())]
struct WxPipelineApplication {
    /// City to fetch weather observations for
    #[clap(long)]
    city: String,

    /// OpenWeatherMap API key
    #[clap(long, env = "OWM_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Base URL for the OpenWeatherMap current-weather API
    #[clap(long, default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Directory holding the reading documents (the store collection)
    #[clap(long, env = "WX_DATA_DIR")]
    data_dir: PathBuf,

    /// Directory holding aggregation outputs (the report bucket)
    #[clap(long, env = "WX_BUCKET_DIR")]
    bucket_dir: PathBuf,

    /// Timeout for outbound weather API calls, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the dashboard API, the ingestion trigger, and metrics
    Serve {
        /// Address to bind to. The ingestion trigger and dashboard are meant
        /// to be reached by an external scheduler and frontend, so the
        /// default binds a public address.
        #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
        bind: SocketAddr,

        /// Window served by the /history endpoint, in days.
        #[clap(long, default_value_t = DEFAULT_HISTORY_DAYS)]
        history_days: i64,
    },
    /// Run one aggregation pass and exit (intended for cron)
    Aggregate {
        /// Aggregation window, in days.
        #[clap(long, default_value_t = DEFAULT_WINDOW_DAYS)]
        window_days: i64,

        /// Anomaly threshold: readings at least this many standard
        /// deviations from the window mean are flagged.
        #[clap(long, default_value_t = DEFAULT_SIGMA_K)]
        anomaly_sigma: f64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = WxPipelineApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let timeout = std::time::Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = OwmClient::new(http_client, &opts.api_url, &opts.api_key, &opts.city)
        .unwrap_or_else(|e| {
            tracing::error!(message = "invalid weather API configuration", error = %e);
            process::exit(1)
        });

    let store = ReadingStore::open(&opts.data_dir).unwrap_or_else(|e| {
        tracing::error!(message = "unable to open reading store", path = %opts.data_dir.display(), error = %e);
        process::exit(1)
    });
    let sink = BucketSink::open(&opts.bucket_dir).unwrap_or_else(|e| {
        tracing::error!(message = "unable to open report bucket", path = %opts.bucket_dir.display(), error = %e);
        process::exit(1)
    });

    let mut registry = Registry::default();
    let metrics = Arc::new(PipelineMetrics::new(&mut registry));

    match opts.command {
        Command::Serve { bind, history_days } => {
            serve(client, store, sink, registry, metrics, bind, history_days).await
        }
        Command::Aggregate {
            window_days,
            anomaly_sigma,
        } => {
            let aggregator = Aggregator::new(
                store,
                sink,
                Duration::days(window_days),
                anomaly_sigma,
                metrics,
            );
            match aggregator.run() {
                RunOutcome::Completed { stats, anomalies, .. } => {
                    tracing::info!(
                        message = "aggregation finished",
                        readings = stats.reading_count,
                        anomalies = anomalies.len(),
                    );
                    Ok(())
                }
                RunOutcome::NoData => Ok(()),
                RunOutcome::Failed(_) => process::exit(1),
            }
        }
    }
}

async fn serve(
    client: OwmClient,
    store: ReadingStore,
    sink: BucketSink,
    registry: Registry,
    metrics: Arc<PipelineMetrics>,
    bind: SocketAddr,
    history_days: i64,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    // Make an initial request before serving indefinitely. This surfaces a
    // bad API key or unknown city at startup instead of on the first
    // scheduled tick.
    match client.fetch().await {
        Err(e) if !e.is_transient() => {
            tracing::error!(message = "weather API rejected configuration", error = %e);
            process::exit(1)
        }
        Err(e) => {
            tracing::warn!(message = "initial weather fetch failed", error = %e);
        }
        Ok(reading) => {
            tracing::debug!(message = "verified weather API access", city = %reading.city);
        }
    }

    let city = client.city().to_owned();
    let ingest = IngestJob::new(client, store.clone(), metrics);
    let state = Arc::new(AppState {
        store,
        sink,
        ingest,
        registry,
        history_window: Duration::days(history_days),
    });

    let app = wx_pipeline::http::router(state);
    let server = axum::Server::try_bind(&bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %bind, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        });

    tracing::info!(message = "server started", address = %bind, city = %city);
    server.await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
