//! Acquisition loop: polls the forecast schedule and drives downloads.
//!
//! Runs on its own task at a fixed interval. Each tick recomputes the
//! expected cycle, drains the fetcher's result slot, and starts a new
//! fetch when the cache is stale, nothing is in flight, any failure
//! cooldown has elapsed and downloads are administratively enabled.
//! Transient failures become cooldown state, never panics.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::FetcherConfig;
use crate::cycle::{CachedGridFile, ForecastCycle};
use crate::download::{FetchError, FetchOutcome, GribFetcher};
use crate::state::SharedWeather;

pub struct GfsWorker {
    config: FetcherConfig,
    fetcher: GribFetcher,
    shared: SharedWeather,
    /// Identity of the file the in-flight fetch is for.
    pending: Option<CachedGridFile>,
    /// Remaining wait after a failed download.
    cooldown: Duration,
}

impl GfsWorker {
    pub fn new(config: FetcherConfig, shared: SharedWeather) -> Result<Self, FetchError> {
        let fetcher = GribFetcher::new(config.request_timeout)?;
        Ok(Self {
            config,
            fetcher,
            shared,
            pending: None,
            cooldown: Duration::ZERO,
        })
    }

    /// Drive the loop until the shutdown channel fires.
    ///
    /// On shutdown any in-flight fetch is cancelled before returning, so
    /// no dangling task or partial cache file is left behind.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            enabled = self.config.download_enabled,
            "starting acquisition loop"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    if self.fetcher.is_active() {
                        info!("cancelling in-flight download");
                        self.fetcher.cancel();
                    }
                    info!("acquisition loop stopped");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.tick(Utc::now()).await {
                error!(error = %e, "poll tick failed");
            }
        }
    }

    /// One pass of the acquisition schedule.
    async fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        let cycle = ForecastCycle::latest(now);
        let candidate = CachedGridFile::for_cycle(&cycle);

        match self.fetcher.poll() {
            Some(FetchOutcome::Succeeded(path)) => {
                if let Some(file) = self.pending.take() {
                    info!(
                        path = %path.display(),
                        cycle = %file.date_cycle,
                        "new grid file available"
                    );
                    // File reference and new-data flag move together.
                    self.shared.publish_grib(file);
                }
            }
            Some(FetchOutcome::Failed) => {
                self.pending = None;
                self.cooldown = self.config.failure_cooldown;
                warn!(
                    cooldown_secs = self.cooldown.as_secs(),
                    "download failed, entering cooldown"
                );
            }
            None => {}
        }

        let up_to_date = self.shared.last_grib().as_ref() == Some(&candidate);

        if !up_to_date
            && !self.fetcher.is_active()
            && self.cooldown.is_zero()
            && self.config.download_enabled
        {
            let dir = self.config.cache_root.join(&candidate.date_cycle);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create cache directory {}", dir.display()))?;

            let url = self.config.request_url(&cycle);
            let dest = candidate.path_under(&self.config.cache_root);
            debug!(cycle = %candidate.date_cycle, offset = cycle.forecast_offset, "starting grid download");

            self.fetcher.start(url, dest)?;
            self.pending = Some(candidate);
        }

        self.cooldown = self.cooldown.saturating_sub(self.config.poll_interval);
        Ok(())
    }
}
