mod commands;
mod config;
mod logging;
mod token;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, CliOverrides};
use pacx_http::{HttpTransport, HttpTransportBuilder};
use std::path::PathBuf;
use std::process::ExitCode;
use token::EnvToken;

/// pacx - OData batch, request and operation polling client
#[derive(Parser)]
#[command(name = "pacx")]
#[command(about = "OData batch, request and operation polling client")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Service root URL (overrides config)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a JSON array of operations as one $batch request
    Batch {
        /// File holding `[{"method", "url", "body"?, "headers"?}, ...]`
        #[arg(short, long)]
        file: PathBuf,

        /// Batch endpoint relative to the service root
        #[arg(long)]
        path: Option<String>,
    },
    /// Poll an operation status URL until it reaches a terminal state
    Wait {
        url: String,

        #[arg(long)]
        interval_ms: Option<u64>,

        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// GET a resource and print the JSON body
    Get { path: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(&CliOverrides {
        base_url: cli.base_url.clone(),
        verbose: cli.verbose,
        json_logs: cli.json_logs,
    });

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    logging::init(&config.logging);

    let Some(command) = cli.command else {
        anyhow::bail!("no command given; see `pacx --help`");
    };

    let transport = build_transport(&config)?;
    match command {
        Commands::Batch { file, path } => {
            commands::batch(transport, &config, &file, path.as_deref()).await
        }
        Commands::Wait {
            url,
            interval_ms,
            timeout_secs,
        } => commands::wait(transport, &config, &url, interval_ms, timeout_secs).await,
        Commands::Get { path } => commands::get(&transport, &path).await,
    }
}

fn build_transport(config: &AppConfig) -> Result<HttpTransport> {
    let base_url = config.base_url()?;
    let builder = HttpTransport::builder(base_url)
        .with_config(config.transport_config())
        .bearer_auth(EnvToken::default());

    allow_plain_http(builder, base_url)
        .build()
        .with_context(|| format!("failed to build HTTP transport for {base_url}"))
}

#[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
fn allow_plain_http(builder: HttpTransportBuilder, base_url: &str) -> HttpTransportBuilder {
    if base_url.starts_with("http://") {
        builder.allow_insecure_http()
    } else {
        builder
    }
}

#[cfg(not(any(debug_assertions, feature = "allow-insecure-http")))]
fn allow_plain_http(builder: HttpTransportBuilder, _base_url: &str) -> HttpTransportBuilder {
    builder
}
