//! Server cycle runner
//!
//! One pass over one server: open a session, list captures, run each through
//! the [`FilePipeline`] in listing order, close the session. Nothing that
//! goes wrong here escapes to the scheduler; it ends up in the returned
//! [`ServerCycleReport`] and the log.

use std::path::Path;

use tracing::{error, info};
use wavpull_common::{ServerConfig, parse_capture_name};

use crate::pipeline::{FilePipeline, PipelineOutcome};
use crate::session::{SessionConnector, SessionError, TransferSession};

/// How a server's cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    /// Every candidate reached a terminal state (successful or not)
    Completed,
    /// No `local_dir` configured; no session opened
    MissingLocalDir,
    /// The local directory could not be created
    LocalDirUnavailable(String),
    /// Connect, login, or data channel protection failed
    OpenFailed(SessionError),
    /// Changing to the remote directory or listing it failed
    ListFailed(SessionError),
    /// The session broke mid-run; remaining candidates wait for next cycle
    SessionLost(SessionError),
}

/// What happened on one server during one cycle
#[derive(Debug)]
pub struct ServerCycleReport {
    pub host: String,
    pub status: ServerStatus,
    /// Candidates that passed the name filter, in listing order
    pub candidates: Vec<String>,
    /// One outcome per pipeline run, in the order they ran
    pub files: Vec<PipelineOutcome>,
}

impl ServerCycleReport {
    fn new(host: &str, status: ServerStatus) -> Self {
        Self {
            host: host.to_string(),
            status,
            candidates: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Files fully collected and removed from the server
    pub fn deleted(&self) -> impl Iterator<Item = &PipelineOutcome> {
        self.files.iter().filter(|outcome| outcome.is_success())
    }

    /// Candidates not run because the session was lost
    pub fn not_attempted(&self) -> usize {
        self.candidates.len() - self.files.len()
    }
}

/// Process one server
pub async fn run_server_cycle(
    connector: &dyn SessionConnector,
    server: &ServerConfig,
) -> ServerCycleReport {
    let host = server.host.as_str();

    let Some(local_dir) = server.local_dir() else {
        error!(host, "local_dir is not configured, skipping server");
        return ServerCycleReport::new(host, ServerStatus::MissingLocalDir);
    };

    if let Err(e) = tokio::fs::create_dir_all(local_dir).await {
        error!(host, local_dir = %local_dir.display(), error = %e, "cannot create local directory");
        return ServerCycleReport::new(host, ServerStatus::LocalDirUnavailable(e.to_string()));
    }

    info!(host, endpoint = %server.endpoint(), "connecting");
    let mut session = match connector.open(server).await {
        Ok(session) => session,
        Err(e) => {
            error!(host, error = %e, "could not open session");
            return ServerCycleReport::new(host, ServerStatus::OpenFailed(e));
        }
    };
    info!(host, user = %server.username, "logged in");

    let mut report = ServerCycleReport::new(host, ServerStatus::Completed);
    let status = process_files(session.as_mut(), server, local_dir, &mut report).await;
    report.status = status;

    session.close().await;
    info!(host, "connection closed");
    report
}

/// Everything that runs inside an open session
///
/// Kept separate so the caller closes the session on every path.
async fn process_files(
    session: &mut dyn TransferSession,
    server: &ServerConfig,
    local_dir: &Path,
    report: &mut ServerCycleReport,
) -> ServerStatus {
    let host = server.host.as_str();

    if let Err(e) = session.change_directory(&server.remote_dir).await {
        error!(host, remote_dir = %server.remote_dir, error = %e, "cannot enter remote directory");
        return ServerStatus::ListFailed(e);
    }

    let names = match session.list_names().await {
        Ok(names) => names,
        Err(e) => {
            error!(host, error = %e, "listing failed");
            return ServerStatus::ListFailed(e);
        }
    };

    report.candidates = names
        .into_iter()
        .filter(|name| parse_capture_name(name).is_some())
        .collect();

    if report.candidates.is_empty() {
        info!(host, "no matching files");
        return ServerStatus::Completed;
    }
    info!(host, count = report.candidates.len(), "found capture files");

    let pipeline = FilePipeline::new(local_dir, server.prefix(), host);
    for name in &report.candidates {
        let outcome = pipeline.run(session, name).await;
        let lost = outcome.session_lost().cloned();
        report.files.push(outcome);

        if let Some(e) = lost {
            error!(
                host,
                error = %e,
                remaining = report.candidates.len() - report.files.len(),
                "session lost, leaving remaining files for the next cycle"
            );
            return ServerStatus::SessionLost(e);
        }
    }

    ServerStatus::Completed
}
