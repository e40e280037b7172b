//! Daemon constants

use std::time::Duration;

/// Default timeout for connecting and for each control channel exchange
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default longest gap between reads on a data connection
pub const DEFAULT_DATA_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default `--timeout` in seconds
pub const DEFAULT_CONTROL_TIMEOUT_SECS: u64 = DEFAULT_CONTROL_TIMEOUT.as_secs();

/// Default `--data-timeout` in seconds
pub const DEFAULT_DATA_TIMEOUT_SECS: u64 = DEFAULT_DATA_IDLE_TIMEOUT.as_secs();

// =============================================================================
// Messages
// =============================================================================

pub const MSG_BANNER: &str = "wavpulld v";
pub const MSG_SHUTDOWN: &str = "Shutdown signal received";

pub const ERR_SIGNAL_SIGTERM: &str = "Failed to install SIGTERM handler";
pub const ERR_SIGNAL_SIGINT: &str = "Failed to install SIGINT handler";
pub const ERR_SIGNAL_CTRLC: &str = "Failed to listen for Ctrl-C";
