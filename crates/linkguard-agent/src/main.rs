//! linkguard: radio link supervisor
//!
//! Polls the UE's SINR from InfluxDB and, when the link degrades after it
//! was established, restarts the Docker Compose group with the alternate UE
//! config. On exit (signal or otherwise) it restores the original config and
//! stops the group.
//!
//! - `run` (default): supervise until interrupted
//! - `restore`: put the original UE config back and exit
//! - `probe`: print one metric sample as JSON

mod docker;
mod influx;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use linkguard_core::Supervisor;
use linkguard_core::config_switch::{ConfigSwitcher, ConfigVariant};
use linkguard_core::metric::MetricFeed;
use linkguard_core::settings::Settings;

use crate::docker::DockerCompose;
use crate::influx::InfluxFeed;

/// Radio link supervisor.
#[derive(Parser, Debug)]
#[command(name = "linkguard", about = "Radio link supervisor for a containerized UE stack")]
struct Cli {
    /// Settings file (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// InfluxDB API token.
    #[arg(long, env = "LINKGUARD_INFLUX_TOKEN", hide_env_values = true, global = true)]
    influx_token: Option<String>,

    /// Allow runtime-wide cleanup when managed containers survive a stop.
    #[arg(long, default_value_t = false, global = true)]
    nuclear: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Supervise the link until interrupted.
    Run,
    /// Restore the original UE config and exit.
    Restore,
    /// Fetch one sample and print it as JSON.
    Probe,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path).map_err(anyhow::Error::msg)?,
        None => Settings::default(),
    };
    if cli.nuclear {
        settings.runtime.nuclear = true;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let token = resolve_token(cli.influx_token, &settings)?;
            run(settings, token).await
        }
        Command::Restore => restore(&settings),
        Command::Probe => {
            let token = resolve_token(cli.influx_token, &settings)?;
            probe(&settings, token).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// The command line (or environment) wins over the settings file.
fn resolve_token(cli: Option<String>, settings: &Settings) -> anyhow::Result<String> {
    cli.map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| settings.influx.token.clone())
        .context("no InfluxDB token: set LINKGUARD_INFLUX_TOKEN or pass --influx-token")
}

async fn run(settings: Settings, token: String) -> anyhow::Result<()> {
    let feed = Arc::new(InfluxFeed::new(&settings.influx, token)?);
    let runtime = Arc::new(DockerCompose::new(&settings.runtime));
    let Supervisor {
        monitor,
        coordinator,
    } = Supervisor::new(&settings, feed, runtime);

    tracing::info!(
        influx = %settings.influx.url,
        bucket = %settings.influx.bucket,
        field = %settings.influx.field,
        process_config = %settings.process_config.path.display(),
        nuclear = settings.runtime.nuclear,
        "linkguard starting"
    );

    let mut monitor_handle = tokio::spawn(monitor.run());

    // ── Shutdown handling ───────────────────────────────────────
    let (signal_tx, mut signal_rx) = mpsc::channel::<&'static str>(1);
    tokio::spawn(async move {
        let mut received = 0u32;
        loop {
            let signal = shutdown_signal().await;
            received += 1;
            match escalation(received) {
                Escalation::Graceful => {
                    let _ = signal_tx.send(signal).await;
                }
                Escalation::Remind => tracing::warn!(
                    signal,
                    "shutdown already in progress, signal again to exit without finishing it"
                ),
                Escalation::Abort => {
                    tracing::error!(signal, "exiting before teardown finished");
                    std::process::exit(130);
                }
            }
        }
    });

    let finished = tokio::select! {
        Some(signal) = signal_rx.recv() => {
            tracing::info!(signal, "received signal, shutting down");
            None
        }
        joined = &mut monitor_handle => Some(joined),
    };

    // Exit hook: runs the teardown unless a signal path already did.
    coordinator.shutdown().await;

    let joined = match finished {
        Some(joined) => joined,
        None => {
            let grace = settings.influx.request_timeout + settings.monitor.tick * 2;
            match tokio::time::timeout(grace, &mut monitor_handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!("monitor loop did not stop in time, abandoning it");
                    monitor_handle.abort();
                    return Ok(());
                }
            }
        }
    };

    match joined {
        Ok(stats) => tracing::info!(
            polls = stats.polls,
            absent = stats.absent,
            feed_errors = stats.feed_errors,
            remediations = stats.remediations,
            failed_remediations = stats.failed_remediations,
            "linkguard stopped"
        ),
        Err(e) => tracing::error!("monitor task failed: {e}"),
    }
    Ok(())
}

fn restore(settings: &Settings) -> anyhow::Result<()> {
    let switcher = ConfigSwitcher::new(settings.process_config.clone());
    let outcome = switcher
        .switch(ConfigVariant::Original)
        .context("restoring the original UE config")?;
    if outcome.changed {
        tracing::info!(
            path = %switcher.path().display(),
            previous = outcome.previous.as_deref().unwrap_or("<unset>"),
            current = %outcome.current,
            "original UE config restored"
        );
    } else {
        tracing::info!(current = %outcome.current, "original UE config already active");
    }
    Ok(())
}

async fn probe(settings: &Settings, token: String) -> anyhow::Result<()> {
    let feed = InfluxFeed::new(&settings.influx, token)?;
    let sample = feed
        .latest(&settings.influx.query())
        .await
        .context("check the InfluxDB URL, token, org and bucket")?;
    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    Graceful,
    Remind,
    Abort,
}

/// What the `received`-th termination signal does.
fn escalation(received: u32) -> Escalation {
    match received {
        0 | 1 => Escalation::Graceful,
        2 => Escalation::Remind,
        _ => Escalation::Abort,
    }
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM, SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
