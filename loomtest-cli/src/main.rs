// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `loomtest` binary: parses arguments, then either runs the test suite
//! as the dispatching process or, if re-exec'd with the hidden
//! `__loomtest-worker` subcommand, runs as a worker speaking the IPC
//! protocol over stdin/stdout.

mod cli;
mod dispatch;
mod errors;
mod harness;
mod logging;
mod worker_main;

use clap::Parser;
use cli::{Command, Opts};
use errors::CliError;
use miette::Report;

fn main() {
    let opts = Opts::parse();
    logging::init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: failed to start the async runtime: {error}");
            std::process::exit(loomtest_metadata::exit_codes::CONFIG_ERROR_EXIT_CODE);
        }
    };

    match opts.command {
        Some(Command::Worker(worker_opts)) => {
            if let Err(error) = runtime.block_on(worker_main::run(worker_opts)) {
                eprintln!("error: worker failed: {error}");
                std::process::exit(loomtest_metadata::exit_codes::RUN_INTERRUPTED_EXIT_CODE);
            }
        }
        Some(Command::Run(run_opts)) => exit_with(runtime.block_on(dispatch::run(run_opts))),
        None => exit_with(runtime.block_on(dispatch::run(opts.run))),
    }
}

fn exit_with(result: Result<i32, CliError>) -> ! {
    match result {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            let code = error.process_exit_code();
            eprintln!("{:?}", Report::new(error));
            std::process::exit(code)
        }
    }
}
