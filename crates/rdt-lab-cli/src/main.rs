use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rdt_lab_abstract::{ClientConfig, ServerConfig};
use rdt_lab_core::{Client, FileService, Server, ServerSummary, TransferReport, compressor_for};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reliable data transfer over a simulated lossy UDP channel")]
struct Args {
    /// Log per-packet events (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve file requests until the idle timeout elapses.
    Server {
        #[arg(long, default_value = "server.toml")]
        config: PathBuf,
    },
    /// Request one file and write it as R<name>.
    Client {
        #[arg(long, default_value = "client.toml")]
        config: PathBuf,

        /// Write a JSON transfer report.
        #[arg(long)]
        report_out: Option<PathBuf>,
    },
    /// Run a server and a client in one process.
    Run {
        #[arg(long, default_value = "server.toml")]
        server_config: PathBuf,
        #[arg(long, default_value = "client.toml")]
        client_config: PathBuf,

        /// Write a JSON transfer report.
        #[arg(long)]
        report_out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!("rdt-lab starting…");

    match args.command {
        Command::Server { config } => {
            let config = load_server_config(&config)?;
            let summary = start_server(config).await?.run().await?;
            drain_sessions(summary).await;
        }
        Command::Client { config, report_out } => {
            let config = load_client_config(&config)?;
            let report = run_client(config).await?;
            if let Some(path) = &report_out {
                write_report(path, &report)?;
            }
        }
        Command::Run {
            server_config,
            client_config,
            report_out,
        } => {
            let server_config = load_server_config(&server_config)?;
            let client_config = load_client_config(&client_config)?;
            if server_config.compression != client_config.compression {
                anyhow::bail!("server and client must use the same compression");
            }

            let started = Instant::now();
            let server = tokio::spawn(start_server(server_config).await?.run());
            let report = run_client(client_config).await?;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "transfer finished");

            let summary = server.await.context("Server task panicked")??;
            drain_sessions(summary).await;
            if let Some(path) = &report_out {
                write_report(path, &report)?;
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn start_server(config: ServerConfig) -> Result<Server> {
    let files = FileService::from_config(&config);
    Server::bind(config, files)
        .await
        .context("Failed to start server")
}

async fn run_client(config: ClientConfig) -> Result<TransferReport> {
    let compressor = compressor_for(config.compression);
    let client = Client::bind(config, compressor)
        .await
        .context("Failed to start client")?;
    client.run().await.context("Transfer failed")
}

/// Sessions keep running after the dispatcher stops; wait for each.
async fn drain_sessions(summary: ServerSummary) {
    info!(
        sessions = summary.sessions_started,
        outstanding = summary.outstanding.len(),
        "dispatcher stopped"
    );
    for handle in summary.outstanding {
        match handle.await {
            Ok(Some(report)) => info!(
                client = %report.client,
                retransmissions = report.retransmissions,
                "session drained"
            ),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "session task failed"),
        }
    }
}

fn load_server_config(path: &Path) -> Result<ServerConfig> {
    let config: ServerConfig = load_toml(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid server config {}", path.display()))?;
    Ok(config)
}

fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let config: ClientConfig = load_toml(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid client config {}", path.display()))?;
    Ok(config)
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

fn write_report(path: &Path, report: &TransferReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize transfer report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}
