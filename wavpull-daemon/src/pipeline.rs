//! File pipeline
//!
//! Drives one remote capture through a strictly forward state machine:
//!
//! ```text
//! Candidate -> Downloaded -> SizeVerified -> Renamed -> RemoteDeleted
//!     |             |              |            |
//!     v             v              v            v
//! DownloadFailed SizeMismatch  RenameSkipped RemoteDeleteFailed
//!                              RenameFailed
//! ```
//!
//! The remote file is deleted only after the local copy matched the
//! server-reported size and was renamed to its normalized name. There are no
//! retries within a run; a file left on the server is picked up again next
//! cycle.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use wavpull_common::parse_capture_name;

use crate::session::{SessionError, TransferSession};

// =============================================================================
// States and records
// =============================================================================

/// Position of a file in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Candidate,
    Downloaded,
    SizeVerified,
    Renamed,
    /// Terminal success
    RemoteDeleted,
    DownloadFailed,
    /// Sizes differ or could not be read; local file kept, remote kept
    SizeMismatch,
    /// Name does not parse; local file kept, remote kept
    RenameSkipped,
    /// Local filesystem rename failed; remote kept
    RenameFailed,
    /// Renamed locally but the remote delete failed
    RemoteDeleteFailed,
}

impl FileState {
    /// The following state on the success path, `None` for terminal states
    pub fn next(self) -> Option<FileState> {
        match self {
            FileState::Candidate => Some(FileState::Downloaded),
            FileState::Downloaded => Some(FileState::SizeVerified),
            FileState::SizeVerified => Some(FileState::Renamed),
            FileState::Renamed => Some(FileState::RemoteDeleted),
            _ => None,
        }
    }

    /// Failure states the step leaving this state can end in
    pub fn failures(self) -> &'static [FileState] {
        match self {
            FileState::Candidate => &[FileState::DownloadFailed],
            FileState::Downloaded => &[FileState::SizeMismatch],
            FileState::SizeVerified => &[FileState::RenameSkipped, FileState::RenameFailed],
            FileState::Renamed => &[FileState::RemoteDeleteFailed],
            _ => &[],
        }
    }

    /// Whether `to` is a legal transition from this state
    pub fn can_move_to(self, to: FileState) -> bool {
        self.next() == Some(to) || self.failures().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    /// Whether the file now sits in the local directory under its normalized name
    pub fn is_collected(self) -> bool {
        matches!(
            self,
            FileState::Renamed | FileState::RemoteDeleted | FileState::RemoteDeleteFailed
        )
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileState::Candidate => "candidate",
            FileState::Downloaded => "downloaded",
            FileState::SizeVerified => "size verified",
            FileState::Renamed => "renamed",
            FileState::RemoteDeleted => "remote deleted",
            FileState::DownloadFailed => "download failed",
            FileState::SizeMismatch => "size mismatch",
            FileState::RenameSkipped => "rename skipped",
            FileState::RenameFailed => "rename failed",
            FileState::RemoteDeleteFailed => "remote delete failed",
        };
        f.write_str(name)
    }
}

/// Result of comparing local and remote sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Match,
    Mismatch { local: u64, remote: u64 },
    /// One of the sizes could not be read
    Error(String),
}

/// Everything learned about one file during one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub remote_name: String,
    /// Where the raw download was written
    pub local_path: PathBuf,
    pub bytes_downloaded: Option<u64>,
    pub remote_size: Option<u64>,
    pub local_size: Option<u64>,
    pub verification: Option<Verification>,
    /// Normalized path after a successful rename
    pub renamed_to: Option<PathBuf>,
}

impl TransferRecord {
    fn new(remote_name: &str, local_dir: &Path) -> Self {
        Self {
            remote_name: remote_name.to_string(),
            local_path: local_dir.join(remote_name),
            bytes_downloaded: None,
            remote_size: None,
            local_size: None,
            verification: None,
            renamed_to: None,
        }
    }
}

/// Why a run ended early
#[derive(Debug)]
pub enum StepError {
    Session(SessionError),
    Local(io::Error),
}

impl StepError {
    /// Whether the session can no longer be used for the next file
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, StepError::Session(e) if e.is_session_fatal())
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Session(e) => write!(f, "{}", e),
            StepError::Local(e) => write!(f, "local filesystem: {}", e),
        }
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StepError::Session(e) => Some(e),
            StepError::Local(e) => Some(e),
        }
    }
}

impl From<SessionError> for StepError {
    fn from(e: SessionError) -> Self {
        StepError::Session(e)
    }
}

impl From<io::Error> for StepError {
    fn from(e: io::Error) -> Self {
        StepError::Local(e)
    }
}

/// Final state of one pipeline run
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Terminal state
    pub state: FileState,
    /// Last non-terminal state before `state`
    pub reached: FileState,
    pub record: TransferRecord,
    /// The error behind a failure state, if any
    pub error: Option<StepError>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.state == FileState::RemoteDeleted
    }

    /// The session error that makes further commands pointless, if any
    pub fn session_lost(&self) -> Option<&SessionError> {
        match &self.error {
            Some(StepError::Session(e)) if e.is_session_fatal() => Some(e),
            _ => None,
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Runs files from one server through the state machine
#[derive(Debug, Clone, Copy)]
pub struct FilePipeline<'a> {
    local_dir: &'a Path,
    prefix: &'a str,
    host: &'a str,
}

impl<'a> FilePipeline<'a> {
    /// `host` is only used to label log events
    pub fn new(local_dir: &'a Path, prefix: &'a str, host: &'a str) -> Self {
        Self {
            local_dir,
            prefix,
            host,
        }
    }

    /// Run one file to a terminal state
    pub async fn run(
        &self,
        session: &mut dyn TransferSession,
        remote_name: &str,
    ) -> PipelineOutcome {
        let mut record = TransferRecord::new(remote_name, self.local_dir);
        let host = self.host;
        let mut state = FileState::Candidate;

        // Candidate -> Downloaded
        info!(host, file = remote_name, "downloading");
        match self.download(session, &record).await {
            Ok(bytes) => record.bytes_downloaded = Some(bytes),
            Err(e) => {
                error!(host, file = remote_name, error = %e, "download failed");
                discard_partial(&record.local_path).await;
                return finish(state, FileState::DownloadFailed, record, Some(e));
            }
        }
        state = self.advance(state, remote_name);

        // Downloaded -> SizeVerified
        let (verification, error) = self.verify(session, &mut record).await;
        record.verification = Some(verification.clone());
        match verification {
            Verification::Match => {
                info!(host, file = remote_name, size = record.local_size, "size matches");
            }
            Verification::Mismatch { local, remote } => {
                warn!(
                    host,
                    file = remote_name,
                    local_size = local,
                    remote_size = remote,
                    "size mismatch, keeping local copy"
                );
                return finish(state, FileState::SizeMismatch, record, None);
            }
            Verification::Error(ref reason) => {
                warn!(
                    host,
                    file = remote_name,
                    error = %reason,
                    "could not verify size, keeping local copy"
                );
                return finish(state, FileState::SizeMismatch, record, error);
            }
        }
        state = self.advance(state, remote_name);

        // SizeVerified -> Renamed
        let Some(capture) = parse_capture_name(remote_name) else {
            warn!(
                host,
                file = remote_name,
                "name does not match the capture pattern, not renaming"
            );
            return finish(state, FileState::RenameSkipped, record, None);
        };
        let target = self.local_dir.join(capture.normalize(self.prefix));
        if let Err(e) = tokio::fs::rename(&record.local_path, &target).await {
            error!(
                host,
                file = remote_name,
                target = %target.display(),
                error = %e,
                "rename failed"
            );
            return finish(state, FileState::RenameFailed, record, Some(e.into()));
        }
        info!(
            host,
            from = %record.local_path.display(),
            to = %target.display(),
            "renamed"
        );
        record.renamed_to = Some(target);
        state = self.advance(state, remote_name);

        // Renamed -> RemoteDeleted
        match session.delete_remote(remote_name).await {
            Ok(()) => {
                info!(host, file = remote_name, "deleted from server");
                finish(state, FileState::RemoteDeleted, record, None)
            }
            Err(e) => {
                warn!(
                    host,
                    file = remote_name,
                    error = %e,
                    "remote delete failed, local copy kept"
                );
                finish(state, FileState::RemoteDeleteFailed, record, Some(e.into()))
            }
        }
    }

    /// Move one step along the success path
    fn advance(&self, state: FileState, remote_name: &str) -> FileState {
        let next = state.next().unwrap_or(state);
        debug!(host = self.host, file = remote_name, from = %state, to = %next, "state");
        next
    }

    async fn download(
        &self,
        session: &mut dyn TransferSession,
        record: &TransferRecord,
    ) -> Result<u64, StepError> {
        let mut file = tokio::fs::File::create(&record.local_path).await?;
        let bytes = session.download_to(&record.remote_name, &mut file).await?;
        file.flush().await?;
        Ok(bytes)
    }

    /// Compare the local size with the size the server reports now
    ///
    /// Returns the session error alongside a failed verification so that the
    /// cycle can tell a lost session from a missing file.
    async fn verify(
        &self,
        session: &mut dyn TransferSession,
        record: &mut TransferRecord,
    ) -> (Verification, Option<StepError>) {
        let remote = match session.fetch_size(&record.remote_name).await {
            Ok(size) => size,
            Err(e) => {
                return (Verification::Error(format!("remote size: {}", e)), Some(e.into()));
            }
        };
        record.remote_size = Some(remote);

        let local = match tokio::fs::metadata(&record.local_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return (Verification::Error(format!("local size: {}", e)), Some(e.into()));
            }
        };
        record.local_size = Some(local);

        if local == remote {
            (Verification::Match, None)
        } else {
            (Verification::Mismatch { local, remote }, None)
        }
    }
}

fn finish(
    reached: FileState,
    state: FileState,
    record: TransferRecord,
    error: Option<StepError>,
) -> PipelineOutcome {
    debug_assert!(reached.can_move_to(state), "{} -> {}", reached, state);
    PipelineOutcome {
        state,
        reached,
        record,
        error,
    }
}

/// Remove a partial download; a missing file is fine
async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "could not remove partial download");
    }
}
