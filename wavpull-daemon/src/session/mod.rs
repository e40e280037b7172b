//! Transfer sessions
//!
//! A session is one authenticated connection to a capture server with an
//! encrypted data channel. The rest of the daemon only talks to servers
//! through [`TransferSession`] and [`SessionConnector`], which keeps the
//! pipeline and cycle logic independent of the wire protocol.
//!
//! ## Module Structure
//!
//! - `ftps` - explicit FTP over TLS implementation

pub mod ftps;

use std::fmt;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use wavpull_common::ServerConfig;

pub use ftps::{FtpsConnector, FtpsSession, SessionTimeouts};

// =============================================================================
// Errors
// =============================================================================

/// Error from a session operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Could not reach the server or establish TLS on the control channel
    Connection(String),
    /// The server rejected the credentials
    Auth(String),
    /// Directory or file does not exist on the server
    NotFound(String),
    /// The server refused a command or a data transfer failed
    Transport(String),
    /// The server sent a reply we cannot interpret
    Protocol(String),
    /// A network operation did not complete in time
    Timeout(&'static str),
    /// The control connection was closed by the peer
    Closed,
}

impl SessionError {
    /// Whether the control channel is unusable after this error
    ///
    /// After a timeout or a garbled reply the command/reply sequence is out
    /// of step, so no further command on the same session can be trusted.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(_)
                | SessionError::Auth(_)
                | SessionError::Protocol(_)
                | SessionError::Timeout(_)
                | SessionError::Closed
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connection(msg) => write!(f, "connection failed: {}", msg),
            SessionError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            SessionError::NotFound(msg) => write!(f, "not found: {}", msg),
            SessionError::Transport(msg) => write!(f, "transfer error: {}", msg),
            SessionError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            SessionError::Timeout(op) => write!(f, "{} timed out", op),
            SessionError::Closed => write!(f, "connection closed by server"),
        }
    }
}

impl std::error::Error for SessionError {}

// =============================================================================
// Capabilities
// =============================================================================

/// Operations available on an open session
///
/// Implementations must be used by one pipeline at a time; the daemon never
/// shares a session between tasks.
#[async_trait]
pub trait TransferSession: Send {
    /// Change the working directory
    async fn change_directory(&mut self, path: &str) -> Result<(), SessionError>;

    /// List the names in the working directory, in server order
    async fn list_names(&mut self) -> Result<Vec<String>, SessionError>;

    /// Size of a remote file in bytes
    async fn fetch_size(&mut self, name: &str) -> Result<u64, SessionError>;

    /// Stream a remote file into `sink`, returning the number of bytes copied
    async fn download_to(
        &mut self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, SessionError>;

    /// Delete a remote file
    async fn delete_remote(&mut self, name: &str) -> Result<(), SessionError>;

    /// End the session
    ///
    /// Best-effort: failures are logged by the implementation and never
    /// returned.
    async fn close(&mut self);
}

/// Opens sessions to configured servers
///
/// An opened session is already authenticated and has its data channel
/// protected.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, server: &ServerConfig) -> Result<Box<dyn TransferSession>, SessionError>;
}
