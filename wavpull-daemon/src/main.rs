//! wavpull daemon

use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use wavpull_daemon::args::Args;
use wavpull_daemon::constants::*;
use wavpull_daemon::logging::init_logging;
use wavpull_daemon::scheduler::{JsonServerSource, PollScheduler};
use wavpull_daemon::session::FtpsConnector;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.debug, args.log_file.as_deref(), args.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("{}{}", MSG_BANNER, env!("CARGO_PKG_VERSION"));

    let source = JsonServerSource::new(&args.servers);
    info!(
        servers = %source.path().display(),
        interval = args.poll_interval().as_secs(),
        "polling"
    );

    let scheduler = PollScheduler::new(
        source,
        FtpsConnector::new(args.session_timeouts()),
        args.poll_interval(),
        args.retry_interval(),
    );

    if args.once {
        return match scheduler.run_cycle().await {
            Ok(_) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        };
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        setup_shutdown_signal().await;
        info!("{}", MSG_SHUTDOWN);
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    ExitCode::SUCCESS
}

/// Wait for SIGINT/SIGTERM (Ctrl-C elsewhere)
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect(ERR_SIGNAL_SIGTERM);
        let mut sigint = signal(SignalKind::interrupt()).expect(ERR_SIGNAL_SIGINT);

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect(ERR_SIGNAL_CTRLC);
    }
}
