//! Embeddable command-line surface.
//!
//! seqloom cannot discover user functions at runtime the way a scripting
//! host would, so the CLI is invoked *from* a binary that links its own
//! [`FunctionLibrary`]:
//!
//! ```no_run
//! use seqloom::cli;
//! use seqloom::registry::{FunctionLibrary, LibraryModule};
//! use serde_json::json;
//! use std::process::ExitCode;
//!
//! #[tokio::main]
//! async fn main() -> ExitCode {
//!     let library = FunctionLibrary::new().with_module(
//!         LibraryModule::new("tasks")
//!             .function("hello", |_| async move { Ok(json!("Hello world!")) }),
//!     );
//!     cli::run(library).await
//! }
//! ```
//!
//! Subcommands:
//!
//! - `check <SEQUENCE_FILE>`: validate the file; exit 0 when valid.
//! - `run <SEQUENCE_FILE> [--constant NAME TYPE VALUE]... [--no-log]`:
//!   run blocking; exits non-zero when the run raises.

use clap::{ArgAction, Parser, Subcommand};
use miette::Diagnostic;
use serde_json::Value;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use crate::registry::FunctionLibrary;
use crate::runner::SequenceRunner;
use crate::sequence::Sequence;
use crate::types::VarMap;

#[derive(Debug, Parser)]
#[command(name = "seqloom", about = "Validate and run sequence files", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check content validity of a sequence file.
    Check {
        /// Path to the sequence file to check.
        sequence_file: PathBuf,
    },
    /// Run a sequence with the functions linked into this binary.
    Run {
        /// Path to the sequence file to run.
        sequence_file: PathBuf,
        /// Define a read-only constant for this run; repeatable.
        #[arg(
            long = "constant",
            num_args = 3,
            value_names = ["NAME", "TYPE", "VALUE"],
            action = ArgAction::Append
        )]
        constants: Vec<String>,
        /// Disable progress logging.
        #[arg(long)]
        no_log: bool,
    },
}

/// Errors of the CLI surface itself.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("unknown constant type `{ty}`")]
    #[diagnostic(
        code(seqloom::cli::constant_type),
        help("Supported types are: str, int, float, bool.")
    )]
    UnknownConstantType { ty: String },

    #[error("cannot parse `{value}` as {ty} for constant `{name}`")]
    #[diagnostic(code(seqloom::cli::constant_value))]
    BadConstantValue {
        name: String,
        ty: String,
        value: String,
    },
}

/// Parse the process arguments and execute.
pub async fn run(library: FunctionLibrary) -> ExitCode {
    let cli = Cli::parse();
    finish(execute(cli, library).await)
}

/// Like [`run`], but over explicit arguments. Useful for tests and for
/// hosts that pre-process their command line.
pub async fn run_from<I, T>(args: I, library: FunctionLibrary) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };
    finish(execute(cli, library).await)
}

/// Parse explicit arguments and execute, surfacing the failure report to
/// the caller instead of the process exit code.
pub async fn try_run_from<I, T>(args: I, library: FunctionLibrary) -> miette::Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|err| miette::miette!("{err}"))?;
    execute(cli, library).await
}

fn finish(result: miette::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli, library: FunctionLibrary) -> miette::Result<()> {
    match cli.command {
        Command::Check { sequence_file } => {
            Sequence::check_file(&sequence_file)?;
            println!("Sequence file is valid.");
            Ok(())
        }
        Command::Run {
            sequence_file,
            constants,
            no_log,
        } => {
            crate::telemetry::init(no_log);
            let constants = parse_constants(&constants)?;
            let mut runner = SequenceRunner::from_path(&sequence_file, &library, constants)?;
            runner.run().await?;
            Ok(())
        }
    }
}

fn parse_constants(raw: &[String]) -> Result<VarMap, CliError> {
    let mut constants = VarMap::default();
    for chunk in raw.chunks(3) {
        if let [name, ty, value] = chunk {
            let parsed = parse_constant(name, ty, value)?;
            constants.insert(name.clone(), parsed);
        }
    }
    Ok(constants)
}

fn parse_constant(name: &str, ty: &str, value: &str) -> Result<Value, CliError> {
    let bad = || CliError::BadConstantValue {
        name: name.to_string(),
        ty: ty.to_string(),
        value: value.to_string(),
    };
    match ty {
        "str" => Ok(Value::String(value.to_string())),
        "int" => value
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| bad()),
        "float" => value
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| bad()),
        "bool" => value
            .parse::<bool>()
            .map(Value::Bool)
            .map_err(|_| bad()),
        other => Err(CliError::UnknownConstantType {
            ty: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typed_constants() {
        assert_eq!(parse_constant("a", "str", "egg").unwrap(), json!("egg"));
        assert_eq!(parse_constant("a", "int", "42").unwrap(), json!(42));
        assert_eq!(parse_constant("a", "float", "1.5").unwrap(), json!(1.5));
        assert_eq!(parse_constant("a", "bool", "true").unwrap(), json!(true));
    }

    #[test]
    fn rejects_bad_constants() {
        assert!(matches!(
            parse_constant("a", "int", "egg"),
            Err(CliError::BadConstantValue { .. })
        ));
        assert!(matches!(
            parse_constant("a", "list", "1"),
            Err(CliError::UnknownConstantType { .. })
        ));
    }

    #[test]
    fn collects_repeated_constant_flags() {
        let raw: Vec<String> = ["spam", "str", "egg", "count", "int", "3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let constants = parse_constants(&raw).unwrap();
        assert_eq!(constants.get("spam"), Some(&json!("egg")));
        assert_eq!(constants.get("count"), Some(&json!(3)));
    }
}
