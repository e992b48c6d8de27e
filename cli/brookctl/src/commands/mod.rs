//! CLI commands.

mod config;
mod demo;
mod soak;

use anyhow::{Context, Result};
use brook_engine::EngineConfig;
use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

/// brookctl - exercise a brook engine against an in-memory backend.
#[derive(Debug, Parser)]
#[command(name = "brookctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, env = "BROOK_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long, global = true, env = "BROOK_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Walk through every resource kind step by step.
    Demo(demo::DemoCommand),

    /// Run synthetic load and report counters.
    Soak(soak::SoakCommand),

    /// Show the configuration read from BROOK_* variables.
    Config(config::ConfigCommand),

    /// Show CLI version.
    Version,
}

/// Context shared by all commands.
#[derive(Debug)]
pub struct CommandContext {
    pub config: EngineConfig,
    pub format: OutputFormat,
}

impl Cli {
    pub fn log_level(&self) -> String {
        self.log_level.clone()
    }

    pub fn json_logs(&self) -> bool {
        self.json_logs
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let config = EngineConfig::from_env().context("failed to read BROOK_* configuration")?;
        let ctx = CommandContext {
            config,
            format: OutputFormat::parse(&self.format),
        };

        match self.command {
            Commands::Demo(cmd) => cmd.run(ctx).await,
            Commands::Soak(cmd) => cmd.run(ctx).await,
            Commands::Config(cmd) => cmd.run(ctx),
            Commands::Version => {
                println!("brookctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}
