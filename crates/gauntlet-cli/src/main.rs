//! Gauntlet CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::GauntletConfig;

#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(author, version, about = "Matrix-driven pipeline orchestrator", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, env = "GAUNTLET_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = GauntletConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { path } => handlers::init(&path).await?,
        Commands::Validate { path } => handlers::validate(path).await?,
        Commands::Plan { path, event, json } => handlers::plan(path, &event, json).await?,
        Commands::Run {
            path,
            event,
            json,
            keep_workspaces,
        } => {
            let succeeded = handlers::run(&config, path, &event, json, keep_workspaces).await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => {
                handlers::set_config(cli.config.as_deref(), &key, &value)?
            }
        },
    }

    Ok(())
}
