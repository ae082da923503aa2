//! CLI module for aerostore
//!
//! Provides command-line interface for:
//! - run: replay a JSON script against an in-memory database
//! - cmp: compare two keys

mod args;
mod commands;
mod errors;
mod io;
mod script;

pub use args::{Cli, Command};
pub use commands::{cmp, run, run_command, run_script};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{parse_script, read_script, write_error, write_line};
pub use script::{open_database, run_step, IndexSchema, RangeArgs, Script, Step, StoreSchema};
