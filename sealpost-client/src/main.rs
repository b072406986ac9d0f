// Sealpost client: register or reconnect, then send one encrypted file.

mod config;
mod store;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use sealpost_core::{
    OutgoingFile, RunReport, Session, TransferConfig, TransferOutcome, X25519Crypto,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::store::FileIdentityStore;
use crate::transport::TcpTransport;

#[derive(Debug, Parser)]
#[command(name = "sealpost", version, about = "Send one file to a sealpost server, encrypted")]
struct Cli {
    /// Settings file (default: ~/.config/sealpost/config.toml, then /etc/sealpost/config.toml).
    #[arg(long, env = "SEALPOST_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Three-line transfer file (host:port, name, file path). Overrides a [transfer] table.
    #[arg(long, value_name = "PATH")]
    transfer_info: Option<PathBuf>,
    /// Directory holding me.info and priv.key.
    #[arg(long, value_name = "DIR")]
    identity_dir: Option<PathBuf>,
    /// Connect/read/write timeout in seconds; 0 disables it.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Log filter, e.g. "debug" or "sealpost_core=trace". RUST_LOG wins.
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
    /// Log as JSON lines.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match settings(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sealpost: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings);

    // The settings table wins unless a transfer file was named explicitly.
    let from_file = cli.transfer_info.is_some();
    match run(&settings, from_file) {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Defaults < settings file < environment < flags.
fn settings(cli: &Cli) -> Result<Settings> {
    let mut s = config::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(p) = &cli.transfer_info {
        s.transfer_info = p.clone();
    }
    if let Some(d) = &cli.identity_dir {
        s.identity_dir = d.clone();
    }
    if let Some(t) = cli.timeout {
        s.io_timeout_secs = t;
    }
    if let Some(l) = &cli.log_level {
        s.log_level = l.clone();
    }
    if cli.json {
        s.log_json = true;
    }
    Ok(s)
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if settings.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn transfer_config(settings: &Settings, from_file: bool) -> Result<TransferConfig> {
    if let (Some(input), false) = (&settings.transfer, from_file) {
        return TransferConfig::try_from(input.clone()).context("invalid [transfer] settings");
    }
    let path = &settings.transfer_info;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    TransferConfig::parse(&text).with_context(|| format!("invalid {}", path.display()))
}

fn run(settings: &Settings, from_file: bool) -> Result<RunReport> {
    let transfer = transfer_config(settings, from_file)?;
    let content = std::fs::read(&transfer.file_path)
        .with_context(|| format!("reading {}", transfer.file_path.display()))?;
    let file_name = transfer
        .file_path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", transfer.file_path.display()))?
        .to_owned();
    info!(
        server = %transfer.address(),
        name = %transfer.name,
        file = %file_name,
        bytes = content.len(),
        "starting transfer"
    );

    let store = FileIdentityStore::new(&settings.identity_dir);
    let transport = TcpTransport::connect(&transfer.host, transfer.port, settings.io_timeout())
        .with_context(|| format!("connecting to {}", transfer.address()))?;
    if let Ok(peer) = transport.peer_addr() {
        info!(%peer, identity_dir = %store.dir().display(), "connected");
    }
    let mut session = Session::new(transport, X25519Crypto::new(), store, transfer.name.clone())
        .with_policy(settings.retry.policy());
    let report = session.run(&OutgoingFile {
        name: file_name,
        content,
    })?;
    Ok(report)
}

fn print_report(report: &RunReport) {
    let outcome = match report.outcome {
        TransferOutcome::Confirmed => "checksum confirmed",
        TransferOutcome::AcceptedWithMismatch => "checksum mismatch, accepted as-is",
    };
    println!(
        "client {}: {} after {} pass(es), {} chunk(s) sent{}",
        report.client_id,
        outcome,
        report.transfer_passes,
        report.chunks_sent,
        if report.registered { ", new registration" } else { "" }
    );
}
