//! aerostore CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`; errors go to stdout
//! as a JSON line and stderr as text, and the process exits non-zero.

use aerostore::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
