//! Poll scheduler
//!
//! The outer loop: load the server list, run every server in order, sleep.
//! A list that fails to load is retried after a shorter backoff; the process
//! never exits because of a cycle's failures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info};
use wavpull_common::{ConfigLoadError, ServerConfig, parse_server_list};

use crate::cycle::{ServerCycleReport, ServerStatus, run_server_cycle};
use crate::session::SessionConnector;

/// Provides the server list at the start of each cycle
#[async_trait]
pub trait ServerSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ServerConfig>, ConfigLoadError>;
}

/// Server list read from a JSON file on every cycle
#[derive(Debug, Clone)]
pub struct JsonServerSource {
    path: PathBuf,
}

impl JsonServerSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ServerSource for JsonServerSource {
    async fn load(&self) -> Result<Vec<ServerConfig>, ConfigLoadError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigLoadError::Read {
                path: self.path.clone(),
                source,
            })?;
        parse_server_list(&contents)
    }
}

/// Totals for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub servers: usize,
    /// Servers whose cycle did not complete
    pub servers_failed: usize,
    /// Files renamed locally (whether or not the remote delete worked)
    pub files_collected: usize,
    /// Files removed from their server
    pub files_deleted: usize,
    /// Pipeline runs that ended without collecting the file
    pub files_failed: usize,
}

impl CycleSummary {
    fn record(&mut self, report: &ServerCycleReport) {
        self.servers += 1;
        if report.status != ServerStatus::Completed {
            self.servers_failed += 1;
        }
        for outcome in &report.files {
            if outcome.state.is_collected() {
                self.files_collected += 1;
            } else {
                self.files_failed += 1;
            }
        }
        self.files_deleted += report.deleted().count();
    }
}

/// Runs cycles forever (or once)
pub struct PollScheduler<S, C> {
    source: S,
    connector: C,
    interval: Duration,
    retry_interval: Duration,
}

impl<S, C> PollScheduler<S, C>
where
    S: ServerSource,
    C: SessionConnector,
{
    /// `retry_interval` is the pause after a failed server list load
    pub fn new(source: S, connector: C, interval: Duration, retry_interval: Duration) -> Self {
        Self {
            source,
            connector,
            interval,
            retry_interval,
        }
    }

    /// Load the server list and process every server once, in order
    ///
    /// # Errors
    ///
    /// Returns the load error if the server list cannot be read; no server
    /// is contacted in that case.
    pub async fn run_cycle(&self) -> Result<CycleSummary, ConfigLoadError> {
        let servers = self
            .source
            .load()
            .await
            .inspect_err(|e| error!(error = %e, "failed to load server list"))?;
        info!(servers = servers.len(), "starting cycle");

        let mut summary = CycleSummary::default();
        for server in &servers {
            let report = run_server_cycle(&self.connector, server).await;
            summary.record(&report);
        }

        info!(
            servers = summary.servers,
            failed_servers = summary.servers_failed,
            collected = summary.files_collected,
            deleted = summary.files_deleted,
            failed_files = summary.files_failed,
            "cycle complete"
        );
        Ok(summary)
    }

    /// Run cycles until `shutdown` becomes `true`
    ///
    /// Shutdown interrupts the sleep between cycles; a cycle already in
    /// progress runs to completion first. Dropping the sender also stops
    /// the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.run_cycle().await {
                Ok(_) => self.interval,
                Err(_) => self.retry_interval,
            };
            debug!(seconds = pause.as_secs(), "sleeping until next cycle");

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
        info!("poll loop stopped");
    }
}
