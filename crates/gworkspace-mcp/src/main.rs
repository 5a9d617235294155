mod commands;
mod initialize;
mod prompt;
mod protocol;
mod server;
mod tools;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::BufReader;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use gworkspace_auth::{AuthContext, BrokerConfig, CredentialSource};

use commands::{ConfigFormat, ConfigScope};
use server::McpServer;

/// Log filter variable (EnvFilter syntax).
const LOG_ENV: &str = "GWORKSPACE_MCP_LOG";

#[derive(Parser, Debug)]
#[command(name = "g-workspace-mcp", version, about = "Read-only Google Workspace MCP server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate with Google (OAuth or gcloud ADC)
    Setup {
        /// Use our own OAuth token
        #[arg(long, conflicts_with = "adc")]
        oauth: bool,
        /// Use gcloud application-default credentials
        #[arg(long)]
        adc: bool,
        /// OAuth client secret JSON to install before signing in
        #[arg(long, value_name = "FILE", conflicts_with = "adc")]
        client_secret: Option<PathBuf>,
    },
    /// Show local authentication state
    Status,
    /// Remove the stored OAuth token
    Logout {
        /// Also show how to clear ADC credentials
        #[arg(long)]
        all: bool,
    },
    /// Run the MCP server on stdio
    Run,
    /// Print or install MCP client configuration
    Config {
        #[arg(short = 'f', long = "format", value_enum)]
        format: Option<ConfigFormat>,
        #[arg(short, long, value_enum, default_value = "user")]
        scope: ConfigScope,
    },
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    // stdout carries MCP frames
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let loaded = BrokerConfig::load();

    if let Command::Status = cli.command {
        return Ok(match loaded {
            Ok(config) => commands::status(&config),
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::SUCCESS
            }
        });
    }
    let config = loaded?;

    match cli.command {
        Command::Setup {
            oauth,
            adc,
            client_secret,
        } => {
            let requested = if oauth {
                Some(CredentialSource::Delegated)
            } else if adc {
                Some(CredentialSource::Ambient)
            } else {
                None
            };
            commands::setup(&config, requested, client_secret.as_deref()).await
        }
        Command::Status => Ok(commands::status(&config)),
        Command::Logout { all } => commands::logout(&config, all).await,
        Command::Run => {
            let server = McpServer::new(AuthContext::new(config));
            server
                .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { format, scope } => commands::config(format, scope).await,
    }
}
