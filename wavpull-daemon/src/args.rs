//! Command-line argument parsing

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use wavpull_common::{DEFAULT_CONFIG_RETRY_SECS, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SERVERS_FILE};

use crate::constants::{DEFAULT_CONTROL_TIMEOUT_SECS, DEFAULT_DATA_TIMEOUT_SECS};
use crate::logging::LogFormat;
use crate::session::SessionTimeouts;

/// Collects audio captures from FTPS recorders
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON file listing the servers to poll (re-read every cycle)
    #[arg(short, long, default_value = DEFAULT_SERVERS_FILE)]
    pub servers: PathBuf,

    /// Seconds to sleep between cycles
    #[arg(short, long, default_value_t = DEFAULT_POLL_INTERVAL_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Seconds to wait before retrying when the server list cannot be loaded
    #[arg(long, default_value_t = DEFAULT_CONFIG_RETRY_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub retry_interval: u64,

    /// Seconds allowed for connecting and for each FTP command
    #[arg(short, long, default_value_t = DEFAULT_CONTROL_TIMEOUT_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Seconds a data connection may stay silent before the transfer fails
    #[arg(long, default_value_t = DEFAULT_DATA_TIMEOUT_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub data_timeout: u64,

    /// Also append log output to this file
    #[arg(short, long)]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Enable debug logging (shows FTP commands and replies)
    #[arg(long, default_value = "false")]
    pub debug: bool,

    /// Run a single cycle and exit
    #[arg(long, default_value = "false")]
    pub once: bool,
}

impl Args {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Backoff after a failed config load, never longer than the poll interval
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval.min(self.interval))
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            control: Duration::from_secs(self.timeout),
            data_idle: Duration::from_secs(self.data_timeout),
        }
    }
}
