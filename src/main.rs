//! Request Mock Engine - CLI Entry Point

use anyhow::{Context, Result};
use apinspect_mock_engine::config::Header;
use apinspect_mock_engine::{MockServer, MockServerConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "apinspect-mock-engine",
    about = "Mock server engine - dispatch a request against configured mocks",
    version
)]
struct Args {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Mock id to activate, overriding the configuration
    #[arg(short, long, value_name = "ID")]
    activate: Option<String>,

    /// Request URL to dispatch
    #[arg(short, long)]
    url: Option<String>,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long)]
    body: Option<String>,

    /// Print the request log after dispatching
    #[arg(long)]
    show_logs: bool,
}

fn parse_header(raw: &str) -> Result<Header> {
    let (key, value) = raw
        .split_once(':')
        .with_context(|| format!("Header must look like \"Name: value\": {}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Header name cannot be empty: {}", raw);
    }
    Ok(Header::new(key, value.trim()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no mocks)");
        MockServerConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} mocks defined)",
            config.mocks.len()
        );
        return Ok(());
    }

    let server = MockServer::from_config(config)?;
    if let Some(id) = &args.activate {
        server.activate(id)?;
    }

    let Some(url) = &args.url else {
        match server.active_mock() {
            Some(mock) => println!("Active mock: {} ({} {})", mock.id, mock.method, mock.path),
            None => println!("No active mock ({} mocks defined)", server.mocks().len()),
        }
        return Ok(());
    };

    let headers = args
        .headers
        .iter()
        .map(|h| parse_header(h))
        .collect::<Result<Vec<_>>>()?;

    match server
        .handle(url, &args.method, &headers, args.body.as_deref())
        .await
    {
        Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
        None => println!("No mock matched {} {}; the request would go to the network", args.method, url),
    }

    if args.show_logs {
        println!("{}", serde_json::to_string_pretty(&server.logs())?);
    }

    Ok(())
}
