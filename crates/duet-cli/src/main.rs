//! Duet CLI - inspect the model catalog, filter tools and run hybrid completions

mod cli;
mod commands;
mod context;
mod download;
mod error;
mod output;

use clap::Parser;
use cli::{Cli, Commands, TelemetryCommands};
use context::CliContext;
use duet_foundation::config::DuetConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command(cli))?;
    Ok(())
}

async fn run_command(cli: Cli) -> error::CliResult<()> {
    let format = cli.output;
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Models { refresh } => {
            let ctx = CliContext::new(load_config(config_path)?, false).await?;
            commands::models::run_list(&ctx, refresh, format).await
        }

        Commands::VoiceModels => {
            let ctx = CliContext::new(load_config(config_path)?, false).await?;
            commands::models::run_voice_list(&ctx, format).await
        }

        Commands::Download { slug, voice } => {
            let ctx = CliContext::new(load_config(config_path)?, true).await?;
            commands::models::run_download(&ctx, &slug, voice).await
        }

        Commands::FilterTools {
            query,
            tools,
            max_tools,
            threshold,
        } => {
            let config = load_config(config_path)?;
            commands::tools::run(&config, &query, &tools, max_tools, threshold, format).await
        }

        Commands::Complete {
            prompt,
            system,
            mode,
            model,
            max_tokens,
            temperature,
            token,
            stream,
        } => {
            let ctx = CliContext::new(load_config(config_path)?, true).await?;
            let args = commands::complete::CompleteArgs {
                prompt,
                system,
                mode,
                model,
                max_tokens,
                temperature,
                token,
                stream,
            };
            commands::complete::run(&ctx, args, format).await
        }

        Commands::Telemetry { action } => {
            let ctx = CliContext::new(load_config(config_path)?, false).await?;
            match action {
                TelemetryCommands::Status => commands::telemetry::run_status(&ctx, format).await,
                TelemetryCommands::Flush => commands::telemetry::run_flush(&ctx).await,
                TelemetryCommands::Clear => commands::telemetry::run_clear(&ctx).await,
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> error::CliResult<DuetConfig> {
    DuetConfig::load(path.and_then(Path::to_str))
        .map_err(|e| error::CliError::ConfigError(e.to_string()))
}
