//! NOAA GFS acquisition service.
//!
//! Periodically works out the latest published GFS cycle, downloads its
//! 0.50 degree grid file from the NOMADS filter and decodes per-altitude
//! wind, temperature and cloud layers for one coordinate with wgrib2:
//! - cycle polling on a fixed interval with a failure cooldown
//! - one asynchronous download at a time, cancelled cleanly on shutdown
//! - decode runs off the polling loop so a slow wgrib2 never delays it

mod config;
mod cycle;
mod decode;
mod download;
mod state;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::FetcherConfig;
use decode::GridDecoder;
use state::SharedWeather;
use worker::GfsWorker;

#[derive(Parser, Debug)]
#[command(name = "gfs-fetcher")]
#[command(about = "GFS grid downloader and point-profile decoder")]
struct Args {
    /// Latitude of the query point
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude of the query point
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Root directory for cached grid files
    #[arg(long, default_value = "cache")]
    cache_dir: PathBuf,

    /// Path to the wgrib2 binary
    #[arg(long, env = "WGRIB2_BIN", default_value = "wgrib2")]
    wgrib2: PathBuf,

    /// Filter CGI base URL
    #[arg(long, env = "NOMADS_URL", default_value = config::BASE_URL)]
    base_url: String,

    /// Seconds between acquisition loop ticks
    #[arg(long, default_value = "10")]
    poll_interval: u64,

    /// Disable downloads (decode whatever is already cached)
    #[arg(long)]
    no_download: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!(lat = args.lat, lon = args.lon, "starting GFS fetcher");

    tokio::fs::create_dir_all(&args.cache_dir).await?;

    let config = FetcherConfig {
        cache_root: args.cache_dir.clone(),
        wgrib2: args.wgrib2.clone(),
        base_url: args.base_url.clone(),
        poll_interval: Duration::from_secs(args.poll_interval),
        download_enabled: !args.no_download,
        ..FetcherConfig::default()
    };

    let shared = SharedWeather::new();
    let decoder = Arc::new(GridDecoder::new(
        config.wgrib2.clone(),
        config.cache_root.clone(),
        shared.clone(),
    ));
    let worker = GfsWorker::new(config, shared.clone())?;

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_tx_clone.send(()).ok();
    });

    let worker_handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));

    // Consumer side: decode the cached grid whenever a new file lands or
    // a reparse is requested, off the async runtime so the blocking
    // wgrib2 call never stalls polling.
    let mut shutdown_rx = shutdown_tx.subscribe();
    let poll = Duration::from_secs(args.poll_interval);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(poll) => {}
        }

        let new_data = shared.take_new_data();
        let reparse = shared.take_reparse_request();
        if !new_data && !reparse {
            continue;
        }

        let Some(grib) = shared.last_grib() else {
            continue;
        };

        let decoder = decoder.clone();
        let (lat, lon) = (args.lat, args.lon);
        let decoded =
            tokio::task::spawn_blocking(move || decoder.decode(&grib, lat, lon)).await?;

        match decoded {
            Ok(profile) => info!(
                winds = profile.winds.len(),
                clouds = profile.clouds.len(),
                pressure_inhg = ?profile.sea_level_pressure_inhg,
                "published new profile"
            ),
            // Keep showing the last good profile.
            Err(e) => warn!(error = %e, "decode failed"),
        }
    }

    worker_handle.await?;
    info!("GFS fetcher stopped");

    Ok(())
}
