use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fornax_common::config::AppConfig;
use fornax_core::device::DeviceConfig;
use fornax_core::status::StatusUpdate;
use fornax_core::warning::WarningSettings;
use std::io::{BufRead, BufReader};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon address, host:port. Defaults to the configured listen_addr.
    #[arg(long)]
    addr: Option<String>,

    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Current lifecycle state of every known oven.
    Statuses,
    /// Registered ovens and their control-limit configuration.
    Devices,
    /// Tail the live observer feed (SSE) to stdout.
    Watch,
    /// Show or toggle per-oven warning settings.
    Warnings {
        device: String,
        #[arg(long)]
        enable: Option<bool>,
    },
    /// Highest run id recorded for an oven.
    LatestRun { device: String },
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn base_url(cli: &Cli) -> String {
    let addr = cli.addr.clone().unwrap_or_else(|| {
        AppConfig::load()
            .map(|c| c.listen_addr)
            .unwrap_or_else(|_| AppConfig::default().listen_addr)
    });
    format!("http://{addr}")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let base = base_url(&cli);
    let client = reqwest::blocking::Client::new();

    match &cli.command {
        Commands::Statuses => {
            let statuses: Vec<StatusUpdate> = client
                .get(format!("{base}/v1/statuses"))
                .send()
                .context("request statuses")?
                .json()
                .context("decode statuses")?;
            if statuses.is_empty() {
                println!("no known devices");
            }
            for status in statuses {
                println!(
                    "{:<24} {:<12} {}",
                    status.device_id,
                    format!("{:?}", status.status),
                    status.timestamp
                );
            }
        }
        Commands::Devices => {
            let devices: Vec<DeviceConfig> = client
                .get(format!("{base}/v1/devices"))
                .send()
                .context("request devices")?
                .json()
                .context("decode devices")?;
            for device in devices {
                println!(
                    "{:<24} {:<12} boards={} limits={}",
                    device.name,
                    device.category,
                    device.board_count,
                    device.limits.len()
                );
            }
        }
        Commands::Watch => {
            let response = client
                .get(format!("{base}/v1/stream"))
                .send()
                .context("open event stream")?;
            let reader = BufReader::new(response);
            for line in reader.lines() {
                let line = line.context("read event stream")?;
                if let Some(data) = line.strip_prefix("data: ") {
                    println!("{data}");
                }
            }
        }
        Commands::Warnings { device, enable } => {
            let settings: WarningSettings = match enable {
                Some(enabled) => client
                    .put(format!("{base}/v1/devices/{device}/warnings"))
                    .json(&serde_json::json!({ "warningsEnabled": enabled }))
                    .send()
                    .context("update warnings")?
                    .json()
                    .context("decode warnings")?,
                None => client
                    .get(format!("{base}/v1/devices/{device}/warnings"))
                    .send()
                    .context("request warnings")?
                    .json()
                    .context("decode warnings")?,
            };
            println!(
                "{device}: enabled={} count={} failures={:?}",
                settings.warnings_enabled,
                settings.failure_tracker.count,
                settings.failure_tracker.failures
            );
        }
        Commands::LatestRun { device } => {
            let latest: serde_json::Value = client
                .get(format!("{base}/v1/devices/{device}/runs/latest"))
                .send()
                .context("request latest run")?
                .json()
                .context("decode latest run")?;
            println!("{device}: run {}", latest["runId"]);
        }
    }

    Ok(())
}
