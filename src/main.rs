//! pcap-broker binary
//!
//! ```bash
//! pcap-broker --cmd "tcpdump -U -w - -i eth0" --listen 0.0.0.0:4242
//! PCAP_COMMAND="tcpdump -U -w -" pcap-broker -n
//! ```

mod cli;

use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pcap_broker::{Broker, Error};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.json);

    let config = cli.broker_config();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return ExitCode::from(1);
    }

    tracing::info!(
        command = %config.capture_command,
        listen = %config.server.listen_addr,
        "Starting pcap-broker"
    );

    match Broker::new(config).run(wait_for_shutdown()).await {
        Ok(report) => {
            tracing::info!(
                status = %report.capture_exit.status(),
                records = report.stats.records_read,
                deliveries = report.stats.deliveries,
                "Broker stopped"
            );
            ExitCode::from(report.exit_code())
        }
        Err(Error::Interrupted) => {
            tracing::info!("Interrupted before startup completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Broker failed");
            ExitCode::from(1)
        }
    }
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
