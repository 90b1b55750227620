//! Raindrop CLI - command-line client for Raindrop.io
//!
//! Handles authentication (test token or OAuth) and talks to the REST API.

mod api;
mod auth;
mod config;
mod exit;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::AuthEnv;
use config::Config;

#[derive(Parser)]
#[command(name = "raindrop")]
#[command(about = "Command-line client for Raindrop.io", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage authentication
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show the authenticated user
    Whoami,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Configure OAuth client credentials
    Setup {
        /// OAuth client ID
        client_id: String,

        /// OAuth client secret (omit to prompt securely)
        #[arg(long)]
        client_secret: Option<String>,

        /// OAuth redirect URI (default: http://localhost:<oauth_port>/callback)
        #[arg(long)]
        redirect_uri: Option<String>,
    },

    /// Set test token for authentication
    Token {
        /// Test token from raindrop.io/settings/integrations
        token: String,
    },

    /// Authenticate with OAuth
    Login {
        /// Paste the redirect URL instead of running the callback server
        #[arg(long)]
        manual: bool,

        /// Seconds to wait for authorization
        #[arg(long, default_value_t = auth::oauth::DEFAULT_AUTHORIZE_TIMEOUT.as_secs())]
        timeout: u64,
    },

    /// Show authentication status
    Status,

    /// Remove stored tokens
    Logout {
        /// Also remove the OAuth client credentials
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show configuration paths
    Path,

    /// Get a configuration value
    Get {
        /// Configuration key (oauth_port)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit::USAGE
            } else {
                exit::SUCCESS
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    // Logs go to stderr; stdout carries command output
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli.command).await {
        Ok(()) => ExitCode::from(exit::SUCCESS),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(hint) = exit::hint(&e) {
                eprintln!("  {}", hint);
            }
            ExitCode::from(exit::exit_code(&e))
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let env = AuthEnv::from_env();

    match command {
        Commands::Auth { command } => match command {
            AuthCommands::Setup {
                client_id,
                client_secret,
                redirect_uri,
            } => {
                let config = Config::load()?;
                auth::commands::setup(&env, &config, client_id, client_secret, redirect_uri)
                    .await?;
            }
            AuthCommands::Token { token } => {
                auth::commands::set_token(&env, token).await?;
            }
            AuthCommands::Login { manual, timeout } => {
                let config = Config::load()?;
                auth::commands::login(&env, &config, manual, Duration::from_secs(timeout))
                    .await?;
            }
            AuthCommands::Status => {
                auth::commands::status(&env).await?;
            }
            AuthCommands::Logout { all } => {
                auth::commands::logout(&env, all).await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                println!("Config dir:  {}", Config::config_dir()?.display());
                println!("Config file: {}", Config::config_path()?.display());
                println!("Keyring dir: {}", Config::keyring_dir()?.display());
            }
            ConfigCommands::Get { key } => {
                println!("{}", Config::load()?.get(&key)?);
            }
            ConfigCommands::Set { key, value } => {
                let mut config = Config::load()?;
                config.set(&key, &value)?;
                config.save()?;
                println!("Set {} = {}", key, value);
            }
        },
        Commands::Whoami => {
            api::whoami(&env).await?;
        }
    }

    Ok(())
}
