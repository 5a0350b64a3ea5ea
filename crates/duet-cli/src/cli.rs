//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Parser, Subcommand, ValueEnum};
use duet_kernel::inference::InferenceMode;
use std::path::PathBuf;

/// Duet CLI - hybrid local/remote LLM inference
#[derive(Parser)]
#[command(name = "duet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json, table)
    #[arg(short = 'o', long, global = true, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "DUET_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List text models from the catalog
    Models {
        /// Skip the cache and query the catalog
        #[arg(short, long)]
        refresh: bool,
    },

    /// List speech models from the catalog
    VoiceModels,

    /// Download a model into the models directory
    Download {
        /// Model slug
        slug: String,

        /// Treat the slug as a speech model
        #[arg(long)]
        voice: bool,
    },

    /// Show which tools a query would be offered
    FilterTools {
        /// User query
        query: String,

        /// JSON file holding an array of tool descriptors
        #[arg(short, long)]
        tools: PathBuf,

        /// Maximum number of tools to keep
        #[arg(short, long)]
        max_tools: Option<usize>,

        /// Minimum keyword score
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Run a chat completion
    Complete {
        /// User prompt
        prompt: String,

        /// Optional system prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Routing mode
        #[arg(short, long, value_enum, default_value_t = ModeArg::Remote)]
        mode: ModeArg,

        /// Local model slug
        #[arg(long)]
        model: Option<String>,

        /// Maximum tokens to generate
        #[arg(long, default_value_t = 512)]
        max_tokens: u32,

        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f64>,

        /// Bearer token for the remote chat endpoint
        #[arg(long, env = "DUET_REMOTE_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Print tokens as they arrive
        #[arg(long)]
        stream: bool,
    },

    /// Telemetry maintenance
    Telemetry {
        #[command(subcommand)]
        action: TelemetryCommands,
    },
}

#[derive(Subcommand)]
pub enum TelemetryCommands {
    /// Show buffered records and the device id
    Status,
    /// Retry buffered records now
    Flush,
    /// Drop every buffered record
    Clear,
}

/// Routing mode accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Local,
    Remote,
    LocalFirst,
    RemoteFirst,
}

impl From<ModeArg> for InferenceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Local => InferenceMode::Local,
            ModeArg::Remote => InferenceMode::Remote,
            ModeArg::LocalFirst => InferenceMode::LocalFirst,
            ModeArg::RemoteFirst => InferenceMode::RemoteFirst,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_complete_defaults_to_remote() {
        let cli = Cli::try_parse_from(["duet", "complete", "hello"]).unwrap();
        match cli.command {
            Commands::Complete {
                mode, max_tokens, ..
            } => {
                assert_eq!(InferenceMode::from(mode), InferenceMode::Remote);
                assert_eq!(max_tokens, 512);
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn test_mode_names_are_kebab_case() {
        let cli =
            Cli::try_parse_from(["duet", "complete", "hi", "--mode", "local-first"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Complete {
                mode: ModeArg::LocalFirst,
                ..
            }
        ));
    }
}
