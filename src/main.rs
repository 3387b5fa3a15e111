// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the substrun tool.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for the substrun drive-substitution tool.

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{debug, LevelFilter};
use substrun::policy::resolve_policy;
use substrun::run::render_command_line;
use substrun::subst::SubstTool;
use substrun::substitute;
use substrun::table::parse_invocation;

/// Substitute drive letters, run a command, then unwind the substitutions.
#[derive(Debug, Parser)]
#[command(
    author = "Lukas Bower",
    version,
    about = "Run a command inside coordinated drive substitutions"
)]
struct Cli {
    /// Emit verbose diagnostics.
    #[arg(long)]
    verbose: bool,

    /// `<letter>=<dir>` mappings followed by the command to execute.
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        value_name = "MAPPINGS-AND-COMMAND"
    )]
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let policy = resolve_policy(cli.verbose)?;
    init_logging(policy.verbose);
    let invocation = parse_invocation(&cli.args)?;
    debug!(
        "substituting {} drive(s), then starting {}",
        invocation.table.len(),
        render_command_line(&invocation.command)
    );

    // Absorb the interrupt signal so the child keeps the terminal while it
    // runs; a forceful termination still kills everything and a later
    // instance repairs whatever mapping is left behind.
    if let Err(err) = ctrlc::set_handler(|| {}) {
        debug!("could not install interrupt handler: {err}");
    }

    let tool = SubstTool::new(policy.subst_program.clone());
    let mut table = invocation.table;
    substitute::execute(&mut table, &tool, &invocation.command, &policy)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}
