//! wavpull Common Library
//!
//! Capture file naming and server configuration shared by the wavpull
//! daemon and its tests.

pub mod config;
pub mod naming;

pub use config::{
    ConfigLoadError, DEFAULT_FTP_PORT, DEFAULT_Z_PREFIX, ServerConfig, parse_server_list,
};
pub use naming::{CaptureName, NAME_PATTERN, parse_capture_name};

/// Default server list file, relative to the working directory
pub const DEFAULT_SERVERS_FILE: &str = "servers.json";

/// Default delay between two polling cycles (5 minutes)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5 * 60;

/// Default delay before retrying after the server list failed to load
///
/// Shorter than the poll interval: a broken server list is usually fixed by
/// an operator within a minute or two.
pub const DEFAULT_CONFIG_RETRY_SECS: u64 = 60;
