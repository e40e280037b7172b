//! Server list configuration
//!
//! The server list is a JSON array stored on disk and re-read at the start
//! of every polling cycle, so edits take effect without a restart:
//!
//! ```json
//! [
//!   {
//!     "host": "recorder-1.example.net",
//!     "port": 21,
//!     "username": "capture",
//!     "password": "secret",
//!     "remote_dir": "/records",
//!     "local_dir": "/srv/captures/studio",
//!     "z_prefix": "STUDIO"
//!   }
//! ]
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default FTP control port
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Prefix used when a server has no (or an empty) `z_prefix`
pub const DEFAULT_Z_PREFIX: &str = "DEFAULT";

/// One remote capture server
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP address
    pub host: String,

    /// Control port (default: 21)
    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    pub password: String,

    /// Remote directory to list and delete within
    pub remote_dir: String,

    /// Local destination directory
    ///
    /// Optional at parse time so that one incomplete entry only disables
    /// that server instead of the whole list.
    #[serde(default)]
    pub local_dir: Option<String>,

    /// Prefix for renamed local files
    #[serde(default = "default_z_prefix")]
    pub z_prefix: String,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("remote_dir", &self.remote_dir)
            .field("local_dir", &self.local_dir)
            .field("z_prefix", &self.z_prefix)
            .finish()
    }
}

impl ServerConfig {
    /// Local destination directory, if one is configured
    ///
    /// An empty string counts as missing.
    pub fn local_dir(&self) -> Option<&Path> {
        self.local_dir
            .as_deref()
            .filter(|dir| !dir.trim().is_empty())
            .map(Path::new)
    }

    /// Rename prefix, falling back to [`DEFAULT_Z_PREFIX`] when empty
    pub fn prefix(&self) -> &str {
        if self.z_prefix.is_empty() {
            DEFAULT_Z_PREFIX
        } else {
            &self.z_prefix
        }
    }

    /// `host:port` label for diagnostics
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_port() -> u16 {
    DEFAULT_FTP_PORT
}

fn default_z_prefix() -> String {
    DEFAULT_Z_PREFIX.to_string()
}

// =============================================================================
// Loading
// =============================================================================

/// Error loading the server list
#[derive(Debug)]
pub enum ConfigLoadError {
    /// The file could not be read
    Read { path: PathBuf, source: io::Error },
    /// The contents are not a valid server list
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            Self::Parse(e) => write!(f, "invalid server list: {}", e),
        }
    }
}

impl std::error::Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
        }
    }
}

/// Parse a server list from JSON text
///
/// # Errors
///
/// Returns [`ConfigLoadError::Parse`] if the text is not a JSON array of
/// server records or a record lacks a required field.
pub fn parse_server_list(json: &str) -> Result<Vec<ServerConfig>, ConfigLoadError> {
    serde_json::from_str(json).map_err(ConfigLoadError::Parse)
}
