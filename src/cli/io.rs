//! JSON I/O handling for CLI
//!
//! - Input: a script file holding one JSON object
//! - Output: one JSON object per line on stdout
//! - UTF-8 only

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde_json::Value;

use super::errors::{CliError, CliResult};
use super::script::Script;

/// Read and parse a script file
pub fn read_script(path: &Path) -> CliResult<Script> {
    let content = fs::read_to_string(path)?;
    parse_script(&content)
}

pub fn parse_script(content: &str) -> CliResult<Script> {
    if content.trim().is_empty() {
        return Err(CliError::script_error("empty script"));
    }
    serde_json::from_str(content).map_err(|e| CliError::script_error(e.to_string()))
}

/// Write one JSON line to stdout
pub fn write_line(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

/// Write an error line to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_line(&serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    }))
}
