use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use parley_core::config::Config;
use parley_gateway::GatewayState;

mod logging;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Voice session orchestrator: turns caller audio into AI agent conversations",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8080)
        #[arg(long)]
        port: Option<u16>,

        /// Start even when speech or AI providers are not configured
        #[arg(long)]
        allow_missing: bool,
    },

    /// Query a running gateway's health
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value by dotted path
    Get { key: String },
    /// Validate configuration and report problems
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            allow_missing,
        } => serve(config, port, allow_missing).await?,
        Commands::Status => status(&config).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Check => {
                println!("Config: {}", config_path.display());
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("  warning: {w}");
                }
                for e in &errors {
                    println!("  error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Configuration OK");
            }
        },
    }

    Ok(())
}

async fn serve(config: Config, port: Option<u16>, allow_missing: bool) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for w in &warnings {
        tracing::warn!("{w}");
    }
    if !errors.is_empty() {
        for e in &errors {
            tracing::error!("{e}");
        }
        if !allow_missing {
            anyhow::bail!(
                "refusing to start with {} configuration error(s); pass --allow-missing to start degraded",
                errors.len()
            );
        }
        tracing::warn!("Starting degraded; sessions cannot be created until providers are configured");
    }

    let port = port.unwrap_or_else(|| config.gateway_port());
    let state = GatewayState::from_config(config);

    #[cfg(feature = "metrics")]
    let state = state.with_metrics(parley_gateway::metrics::install_prometheus_recorder()?);

    tracing::info!("Starting Parley gateway on port {port}");
    parley_gateway::start_gateway(Arc::new(state), port).await
}

async fn status(config: &Config) -> anyhow::Result<()> {
    let bind = match config.gateway_bind().as_str() {
        "0.0.0.0" => "127.0.0.1".to_string(),
        other => other.to_string(),
    };
    let url = format!("http://{bind}:{}/health", config.gateway_port());

    println!("Parley v{}", env!("CARGO_PKG_VERSION"));
    println!("Gateway: {url}");

    match reqwest::get(&url).await {
        Ok(resp) => {
            let body: serde_json::Value = resp.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Err(_) => println!("Status: not running"),
    }
    Ok(())
}
