//! Single-slot asynchronous grid file fetcher.
//!
//! One download task at a time runs off the polling loop, streams the
//! response to a `.partial` file and renames it into place only once the
//! transfer is complete and size-verified. The terminal result is handed
//! back through a one-shot channel the loop polls without blocking.
//! Retry policy belongs to the caller; a failure is reported exactly once
//! and the fetcher goes idle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use reqwest::{header, Client};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    /// Contract violation: only one task may be in flight per fetcher.
    #[error("a download is already in flight")]
    AlreadyInFlight,

    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid destination path: {0}")]
    BadDestination(PathBuf),
}

/// Terminal result of a download task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// File fully written and moved to its final path.
    Succeeded(PathBuf),
    /// Network, timeout or filesystem error; nothing left at the final path.
    Failed,
}

enum TaskResult {
    Done(FetchOutcome),
    Cancelled,
}

enum Transfer {
    Complete,
    Cancelled,
}

struct ActiveFetch {
    result: oneshot::Receiver<TaskResult>,
    cancel: Option<oneshot::Sender<()>>,
}

/// Owns at most one in-flight download task.
pub struct GribFetcher {
    client: Client,
    active: Option<ActiveFetch>,
}

impl GribFetcher {
    pub fn new(request_timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            active: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Begin a non-blocking download of `url` to `dest`.
    ///
    /// Errors with [`FetchError::AlreadyInFlight`] if a task is active;
    /// the original task is unaffected.
    pub fn start(&mut self, url: String, dest: PathBuf) -> Result<(), FetchError> {
        if self.active.is_some() {
            return Err(FetchError::AlreadyInFlight);
        }

        let filename = dest
            .file_name()
            .ok_or_else(|| FetchError::BadDestination(dest.clone()))?
            .to_string_lossy()
            .into_owned();
        let temp = dest.with_file_name(format!("{filename}.partial"));

        let (result_tx, result_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let client = self.client.clone();

        tokio::spawn(async move {
            let result = transfer(client, url, temp, dest, cancel_rx).await;
            // The receiver may already be gone on shutdown.
            let _ = result_tx.send(result);
        });

        self.active = Some(ActiveFetch {
            result: result_rx,
            cancel: Some(cancel_tx),
        });

        Ok(())
    }

    /// Poll the in-flight task without blocking.
    ///
    /// Returns `None` while the transfer runs and the terminal outcome
    /// exactly once; afterwards the fetcher is idle again. A cancelled
    /// task never surfaces an outcome.
    pub fn poll(&mut self) -> Option<FetchOutcome> {
        let fetch = self.active.as_mut()?;

        match fetch.result.try_recv() {
            Ok(TaskResult::Done(outcome)) => {
                self.active = None;
                Some(outcome)
            }
            Ok(TaskResult::Cancelled) => {
                self.active = None;
                None
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                // Task died without reporting, e.g. a panic.
                self.active = None;
                Some(FetchOutcome::Failed)
            }
        }
    }

    /// Request cooperative termination of the in-flight task, if any.
    ///
    /// The task removes its partial file on the way out; the destination
    /// path ends up either absent or complete, never truncated.
    pub fn cancel(&mut self) {
        if let Some(fetch) = self.active.as_mut() {
            if let Some(cancel) = fetch.cancel.take() {
                let _ = cancel.send(());
            }
        }
    }
}

/// Run one transfer to completion, cancellation or failure.
async fn transfer(
    client: Client,
    url: String,
    temp: PathBuf,
    dest: PathBuf,
    mut cancel: oneshot::Receiver<()>,
) -> TaskResult {
    match stream_to_temp(&client, &url, &temp, &mut cancel).await {
        Ok(Transfer::Complete) => match fs::rename(&temp, &dest).await {
            Ok(()) => {
                info!(path = %dest.display(), "download completed");
                TaskResult::Done(FetchOutcome::Succeeded(dest))
            }
            Err(e) => {
                warn!(error = %e, path = %dest.display(), "failed to move download into place");
                fs::remove_file(&temp).await.ok();
                TaskResult::Done(FetchOutcome::Failed)
            }
        },
        Ok(Transfer::Cancelled) => {
            debug!(url = %url, "download cancelled");
            fs::remove_file(&temp).await.ok();
            TaskResult::Cancelled
        }
        Err(e) => {
            warn!(error = %e, url = %url, "download failed");
            fs::remove_file(&temp).await.ok();
            TaskResult::Done(FetchOutcome::Failed)
        }
    }
}

/// Stream the response body into the temporary file, checking the cancel
/// signal between awaits and verifying the byte count against
/// Content-Length when the server provided one.
async fn stream_to_temp(
    client: &Client,
    url: &str,
    temp: &Path,
    cancel: &mut oneshot::Receiver<()>,
) -> Result<Transfer> {
    let response = tokio::select! {
        r = client.get(url).send() => r.context("HTTP request failed")?,
        _ = &mut *cancel => return Ok(Transfer::Cancelled),
    };

    if !response.status().is_success() {
        bail!("HTTP error: {}", response.status());
    }

    let expected: Option<u64> = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());

    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(temp)
        .await
        .context("failed to open partial file")?;

    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let chunk = tokio::select! {
            c = stream.next() => c,
            _ = &mut *cancel => return Ok(Transfer::Cancelled),
        };

        let Some(chunk) = chunk else { break };
        let chunk = chunk.context("error reading response chunk")?;

        file.write_all(&chunk)
            .await
            .context("error writing partial file")?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;

    if let Some(expected) = expected {
        if written != expected {
            bail!("size mismatch: expected {expected} bytes, wrote {written}");
        }
    }

    Ok(Transfer::Complete)
}
