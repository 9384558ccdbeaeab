// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Argument parsing (spec.md §6.5), via `clap` derive.

use crate::errors::CliError;
use camino::Utf8PathBuf;
use clap::Parser;
use loomtest_runner::Shard;
use loomtest_runner::reporter::ReporterKind;
use regex::Regex;
use std::time::Duration;

/// A parallel, fixture-aware test runner.
#[derive(Debug, Parser)]
#[command(name = "loomtest", version)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Option<Command>,

    #[clap(flatten)]
    pub run: RunOpts,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run the test suite (the default when no subcommand is given).
    Run(RunOpts),

    /// Hidden worker entry point; re-exec'd by the dispatcher, never run
    /// directly by a user.
    #[clap(name = "__loomtest-worker", hide = true)]
    Worker(WorkerOpts),
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunOpts {
    /// Path to the loomtest config file [default: <workspace>/.config/loomtest.toml]
    #[arg(long, value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Number of worker processes to run concurrently.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Per-test timeout, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Number of times to retry a failing test before marking it failed.
    #[arg(long, value_name = "N")]
    pub retries: Option<usize>,

    /// Comma-separated list of reporters to run: dot, line, list, json, junit.
    #[arg(long, value_delimiter = ',', default_value = "list")]
    pub reporter: Vec<String>,

    /// Directory results (JSON/JUnit reports, attachments) are written to.
    #[arg(long, value_name = "DIR")]
    pub output: Option<Utf8PathBuf>,

    /// Only run tests whose full title matches this regular expression.
    #[arg(long, value_name = "RE")]
    pub grep: Option<String>,

    /// Only run tests belonging to these named projects.
    #[arg(long = "project", value_name = "NAME")]
    pub project: Vec<String>,

    /// Run shard `CURRENT` of `TOTAL`, e.g. `--shard=1/4`.
    #[arg(long, value_name = "CURRENT/TOTAL")]
    pub shard: Option<String>,

    /// Fail the run if any test is marked `only`.
    #[arg(long)]
    pub forbid_only: bool,

    /// Rewrite stored snapshots to match the current run instead of failing on mismatch.
    #[arg(long)]
    pub update_snapshots: bool,

    /// Stop dispatching new tests after this many failures.
    #[arg(long, value_name = "N")]
    pub max_failures: Option<usize>,

    /// Abort the whole run after this many milliseconds.
    #[arg(long, value_name = "MS")]
    pub global_timeout: Option<u64>,
}

#[derive(Debug, clap::Args)]
pub struct WorkerOpts {
    /// This worker's index, assigned by the dispatcher.
    #[arg(long)]
    pub worker_index: usize,
}

impl RunOpts {
    pub fn grep_regex(&self) -> Result<Option<Regex>, CliError> {
        self.grep
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| CliError::InvalidGrep {
                    pattern: pattern.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    pub fn shard(&self) -> Result<Option<Shard>, CliError> {
        let Some(raw) = &self.shard else { return Ok(None) };
        let (current, total) = raw.split_once('/').ok_or_else(|| CliError::InvalidShard { value: raw.clone() })?;
        let current: usize = current.parse().map_err(|_| CliError::InvalidShard { value: raw.clone() })?;
        let total: usize = total.parse().map_err(|_| CliError::InvalidShard { value: raw.clone() })?;
        if current == 0 || current > total {
            return Err(CliError::InvalidShard { value: raw.clone() });
        }
        Ok(Some(Shard { current, total }))
    }

    pub fn reporters(&self) -> Result<Vec<ReporterKind>, CliError> {
        self.reporter
            .iter()
            .map(|name| name.parse().map_err(CliError::UnknownReporter))
            .collect()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout.map(Duration::from_millis)
    }
}
