//! xbull: xBull Wallet Connect simulator.
//!
//! Drives the connector end to end against a simulated wallet over the
//! in-memory transport: prints popup URLs, runs connect and sign, and shows
//! rejection and popup-closure handling.

mod commands;
mod config;

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;

use xbull_connect::{ConnectConfig, PreferredTarget};

/// xBull Wallet Connect simulator
#[derive(Parser)]
#[command(name = "xbull", version = "0.1.0", about = "xBull Wallet Connect simulator")]
struct Cli {
    /// Wallet connect page opened in the popup
    #[arg(long = "wallet-url", global = true)]
    wallet_url: Option<String>,

    /// Preferred transport: extension or website
    #[arg(short = 't', long = "target", global = true)]
    target: Option<String>,

    /// Popup liveness poll interval in milliseconds
    #[arg(long = "watchdog-ms", global = true)]
    watchdog_ms: Option<u64>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the popup URL for a fresh session
    Url,

    /// Request the wallet's public key
    Connect {
        /// Address the simulated wallet answers with
        #[arg(long, default_value = commands::SIMULATED_ADDRESS)]
        address: String,

        /// Make the simulated wallet decline
        #[arg(long)]
        reject: bool,
    },

    /// Request a transaction signature
    Sign {
        /// Transaction envelope (base64 XDR)
        #[arg(long)]
        xdr: String,

        /// Network passphrase
        #[arg(long)]
        network: Option<String>,

        /// Account expected to sign
        #[arg(long = "public-key")]
        public_key: Option<String>,

        /// Make the simulated wallet decline
        #[arg(long, conflicts_with = "abandon")]
        reject: bool,

        /// Make the simulated user close the popup without answering
        #[arg(long)]
        abandon: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("xbull=debug,xbull_cli=debug,xbull_connect=debug,xbull_core=debug")
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_target(false)
            .init();
    }

    // Load config file.
    let config_path = cli.config.clone().unwrap_or_else(|| {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".xbull").join("config.toml").to_string_lossy().to_string()
    });

    let result = match effective_config(&cli, &config_path) {
        Ok(connect_config) => match cli.command {
            Command::Url => commands::url::run(connect_config).await,
            Command::Connect { address, reject } => {
                commands::connect::run(connect_config, &address, reject).await
            }
            Command::Sign {
                xdr,
                network,
                public_key,
                reject,
                abandon,
            } => {
                let behaviour = commands::sign::Behaviour::from_flags(reject, abandon);
                commands::sign::run(connect_config, xdr, network, public_key, behaviour).await
            }
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("xbull: {e:#}");
        std::process::exit(1);
    }
}

/// Merge the config file with command-line overrides.
fn effective_config(cli: &Cli, config_path: &str) -> anyhow::Result<ConnectConfig> {
    let file = config::Config::load(config_path)?;
    let mut connect_config = file.to_connect_config()?;

    if let Some(url) = &cli.wallet_url {
        connect_config.wallet_url = url.clone();
    }
    if let Some(target) = &cli.target {
        connect_config.preferred_target = target.parse::<PreferredTarget>()?;
    }
    if let Some(ms) = cli.watchdog_ms {
        connect_config.watchdog_interval = Duration::from_millis(ms);
    }

    connect_config.validate()?;
    Ok(connect_config)
}
