//! Error display for the CLI.

use brook_engine::{CommandError, ConfigError, EngineError};
use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("demo step failed: {step}")]
    Step {
        step: &'static str,
        #[source]
        source: CommandError,
    },
}

impl CliError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn step(step: &'static str) -> impl FnOnce(CommandError) -> Self {
        move |source| Self::Step { step, source }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
    }

    if let Some(ConfigError::InvalidValue { var, .. }) = err.downcast_ref::<ConfigError>() {
        eprintln!(
            "\n{}",
            format!("Hint: unset {var} or fix its value.").yellow()
        );
    }
    if let Some(EngineError::KeyTypeMismatch { id }) = err.downcast_ref::<EngineError>() {
        eprintln!(
            "\n{}",
            format!("Hint: {id} is registered by a key with another data type.").yellow()
        );
    }
}
