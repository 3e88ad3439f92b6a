#![forbid(unsafe_code)]

//! `mcp-probe` — command-line MCP client binary.
//!
//! Classifies the target (server command vs. HTTP URL), opens the matching
//! transport, runs the `initialize` handshake, and logs every message the
//! server sends until the stream closes or ctrl-c.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_probe::session::Session;
use mcp_probe::transport::Target;
use mcp_probe::{AppError, ClientConfig, Inbound, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-probe", about = "Command-line MCP client", version, long_about = None)]
struct Cli {
    /// Server command to spawn, or an http(s) URL to connect to via SSE.
    command_or_url: String,

    /// Arguments passed to the server command (ignored for URLs).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Environment variable for the spawned server; repeatable.
    #[arg(short = 'e', long = "env", num_args = 2, value_names = ["KEY", "VALUE"], action = clap::ArgAction::Append)]
    env: Vec<String>,

    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    let env: HashMap<String, String> = args
        .env
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let target = Target::classify(&args.command_or_url, args.args.clone(), env);
    info!(target = %args.command_or_url, "opening transport");

    // Transport-open failure is fatal: surface it and exit non-zero.
    let handle = target.open(&config).await?;
    let session = Session::connect(handle, &config);

    let mut feed = session.incoming_messages().await;
    let receive_loop = tokio::spawn(async move {
        info!("starting receive loop");
        while let Some(item) = feed.recv().await {
            match item {
                Inbound::Message(message) => info!(?message, "received message from server"),
                Inbound::Error(err) => error!(%err, "error on incoming stream"),
            }
        }
        info!("incoming stream ended");
    });

    info!("initializing session");
    let negotiated = session.initialize().await?;
    match &negotiated.server_info {
        Some(server) => info!(
            server = %server.name,
            version = %server.version,
            protocol = %negotiated.protocol_version,
            "initialized"
        ),
        None => info!(protocol = %negotiated.protocol_version, "initialized"),
    }

    // Keep draining the feed until the server goes away or the user stops us.
    tokio::select! {
        _ = receive_loop => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(%err, "ctrl-c signal handler failed");
            }
            info!("interrupt received, shutting down");
        }
    }

    session.close().await;
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
