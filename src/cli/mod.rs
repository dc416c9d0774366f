//! Non-interactive command line front-end for the engine.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use thiserror::Error;

use crate::errors::LedgerError;
use crate::LedgerEngine;

use commands::CommandRegistry;

/// Process exit status when a reconciliation reports drift.
pub const EXIT_RECONCILIATION_FAILED: i32 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] LedgerError),
    #[error("Invalid input: {0}")]
    Input(String),
    #[error("Command failed: {0}")]
    Command(String),
}

/// Parses `std::env::args` and runs the requested command. Returns the exit code.
pub fn run_cli() -> Result<i32, CliError> {
    run_with_args(std::env::args().skip(1))
}

pub fn run_with_args<I>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = String>,
{
    let invocation = Invocation::parse(args)?;
    let registry = CommandRegistry::new();
    let Some(name) = invocation.command.as_deref() else {
        registry.print_usage();
        return Ok(0);
    };
    let definition = registry
        .get(name)
        .ok_or_else(|| CliError::Input(format!("unknown command `{name}`; try `help`")))?;

    if !definition.needs_engine {
        return (definition.handler)(None, &invocation.args);
    }
    let engine = LedgerEngine::open_default(invocation.data_dir)?;
    (definition.handler)(Some(&engine), &invocation.args)
}

/// Global options followed by a command name and its arguments.
#[derive(Debug, Default, PartialEq)]
struct Invocation {
    data_dir: Option<PathBuf>,
    command: Option<String>,
    args: Vec<String>,
}

impl Invocation {
    fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut invocation = Invocation::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if invocation.command.is_some() {
                invocation.args.push(arg);
                continue;
            }
            match arg.as_str() {
                "--data-dir" => {
                    let value = args
                        .next()
                        .ok_or_else(|| CliError::Input("--data-dir needs a path".into()))?;
                    invocation.data_dir = Some(PathBuf::from(value));
                }
                "-h" | "--help" => invocation.command = Some("help".into()),
                other if other.starts_with('-') => {
                    return Err(CliError::Input(format!("unknown option `{other}`")));
                }
                _ => invocation.command = Some(arg),
            }
        }
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, CliError> {
        Invocation::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn data_dir_precedes_command() {
        let invocation = parse(&["--data-dir", "/tmp/ledger", "reconcile", "--all"]).unwrap();
        assert_eq!(invocation.data_dir, Some(PathBuf::from("/tmp/ledger")));
        assert_eq!(invocation.command.as_deref(), Some("reconcile"));
        assert_eq!(invocation.args, vec!["--all".to_string()]);
    }

    #[test]
    fn missing_data_dir_value_is_rejected() {
        assert!(matches!(parse(&["--data-dir"]), Err(CliError::Input(_))));
    }

    #[test]
    fn unknown_command_is_input_error() {
        let err = run_with_args(vec!["frobnicate".to_string()]).unwrap_err();
        assert!(matches!(err, CliError::Input(ref msg) if msg.contains("frobnicate")));
    }
}
