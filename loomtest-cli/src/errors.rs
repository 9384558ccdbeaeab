// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI-boundary errors: every way `loomtest` fails before or outside of
//! running a test, mapped to the exit-code contract in
//! `loomtest_metadata::exit_codes`.

use camino::Utf8PathBuf;
use loomtest_metadata::exit_codes;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(code(loomtest::config))]
    Config(#[from] loomtest_runner::ConfigParseError),

    #[error(transparent)]
    #[diagnostic(code(loomtest::tree_build))]
    TreeBuild(#[from] loomtest_runner::TreeBuildError),

    #[error(transparent)]
    #[diagnostic(code(loomtest::dispatch))]
    Dispatch(#[from] loomtest_runner::DispatchError),

    #[error("invalid --shard value `{value}`: expected `current/total`")]
    #[diagnostic(code(loomtest::cli::shard))]
    InvalidShard { value: String },

    #[error("invalid --grep pattern `{pattern}`")]
    #[diagnostic(code(loomtest::cli::grep))]
    InvalidGrep {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to determine the current executable's path, needed to spawn worker processes")]
    #[diagnostic(code(loomtest::cli::current_exe))]
    CurrentExe(#[source] std::io::Error),

    #[error("failed to open report output file `{path}`")]
    #[diagnostic(code(loomtest::cli::output_file))]
    OutputFile {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown reporter in --reporter: {0}")]
    #[diagnostic(code(loomtest::cli::reporter))]
    UnknownReporter(String),
}

impl CliError {
    pub fn process_exit_code(&self) -> i32 {
        exit_codes::CONFIG_ERROR_EXIT_CODE
    }
}
