//! CLI command implementations

use std::path::Path;

use serde_json::json;

use crate::backend::MemoryBackend;
use crate::config::FactoryConfig;
use crate::connection::Factory;
use crate::key::Value;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_script, write_line};
use super::script::{open_database, run_step};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Run { script, config } => run_script(&script, config.as_deref()),
        Command::Cmp { a, b } => cmp(&a, &b),
    }
}

/// Replay a script, writing one line per step and a final metrics line
pub fn run_script(script_path: &Path, config_path: Option<&Path>) -> CliResult<()> {
    let config = match config_path {
        Some(path) => FactoryConfig::load(path)?,
        None => FactoryConfig::default(),
    };
    let script = read_script(script_path)?;
    let factory = Factory::new(MemoryBackend::new(), config);

    let (db, opened) = open_database(&factory, &script)?;
    write_line(&opened)?;
    let Some(db) = db else {
        return Err(CliError::script_error(format!(
            "database '{}' could not be opened",
            script.database
        )));
    };

    for (index, step) in script.steps.iter().enumerate() {
        write_line(&run_step(&factory, &db, index, step))?;
    }
    db.close();
    factory.run_until_idle();

    let metrics = serde_json::to_value(factory.metrics())?;
    write_line(&json!({ "metrics": metrics }))
}

/// Compare two JSON-encoded keys
pub fn cmp(a: &str, b: &str) -> CliResult<()> {
    let parse = |raw: &str| -> CliResult<Value> {
        let json: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| CliError::script_error(format!("invalid key JSON '{}': {}", raw, e)))?;
        Ok(Value::from(json))
    };
    let (a, b) = (parse(a)?, parse(b)?);
    let factory = Factory::in_memory();
    let result = factory.cmp(&a, &b)?;
    write_line(&json!({ "result": result }))
}
