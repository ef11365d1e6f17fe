//! livelog CLI Binary
//!
//! Records workspaces, imports archived histories and plays timelines back.
//! Failed commands print an `ErrorResponse` JSON line on stderr.

use anyhow::Context;
use clap::Parser;
use livelog::tooling::cli::{error_json, Cli, CliContext};
use std::process;

fn main() {
    let cli = Cli::parse();

    let context = match CliContext::new(&cli).context("Failed to initialize livelog") {
        Ok(context) => context,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    match context.execute(&cli.command) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("{}", error_json(&e));
            process::exit(1);
        }
    }
}
