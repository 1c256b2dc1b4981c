//! linkwatch command-line entry point

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use linkwatch::{Config, CsvSink, Linkwatch};

/// Observe a tunnel interface and the physical interface beneath it, and log
/// tunnel traffic with recovered link-layer metadata.
#[derive(Debug, Parser)]
#[command(name = "linkwatch", version, about)]
struct Cli {
    /// Tunnel interface (or pcap file with --replay)
    tunnel: String,

    /// Physical interface (or pcap file with --replay)
    physical: String,

    /// Treat both positionals as classic pcap files
    #[arg(long)]
    replay: bool,

    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for the CSV output files
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Seconds between statistics reports
    #[arg(long, value_name = "SECS")]
    stats_interval: Option<u64>,

    /// Disable the periodic statistics report
    #[arg(long)]
    no_stats: bool,

    /// Log filter, e.g. `debug` or `linkwatch=trace` (default: RUST_LOG, else info)
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

impl Cli {
    /// File configuration with command-line overrides applied
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(dir) = &self.output_dir {
            config.output.directory = dir.clone();
        }
        if let Some(secs) = self.stats_interval {
            config.stats.interval_secs = secs;
        }
        if self.no_stats {
            config.stats.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            if let Some(err) = e.downcast_ref::<linkwatch::LinkwatchError>() {
                for suggestion in err.recovery_suggestions() {
                    error!("  - {}", suggestion);
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config()?;

    let session = if cli.replay {
        Linkwatch::replay(&cli.tunnel, &cli.physical, &config)
            .context("opening capture files")?
    } else {
        Linkwatch::capture(&cli.tunnel, &cli.physical, &config)
            .context("opening interfaces")?
    };
    let sink = CsvSink::create(&config.output).context("opening output files")?;

    let stop = session.stop_handle();
    let pipeline = session.run(sink);
    let cancel = pipeline.cancellation_token();

    let signals = tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown requested, draining");
                stop.stop();
            }
            _ = cancel.cancelled() => {}
        }
    });

    pipeline.join().await;
    signals.abort();
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
