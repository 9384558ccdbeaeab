// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires the loader/config seam, the dispatcher, and the reporters together
//! for the default `run` command (mirrors `cargo-nextest`'s
//! `dispatch::execution`).

use crate::cli::RunOpts;
use crate::errors::CliError;
use camino::Utf8PathBuf;
use loomtest_metadata::{exit_codes, RunEndStatus};
use loomtest_runner::reporter::{self, DotReporter, JsonReporter, JunitReporter, LineReporter, ListReporter, Reporter, ReporterKind};
use loomtest_runner::runner::{self, process_spawner};
use loomtest_runner::test_tree::RunConfig;
use loomtest_runner::SignalHandlerKind;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const WORKER_SUBCOMMAND: &str = "__loomtest-worker";

/// Env var a re-exec'd worker reads to rebuild the identical project list
/// the dispatching process planned against: `TestId`s are assigned by a
/// process-local counter walked in `(spec, project)` order, so a worker
/// that planned against a *different* project count would compute the
/// wrong id for every test after the first. Inherited by child processes
/// automatically (`tokio::process::Command` doesn't clear the environment).
pub const WORKSPACE_ROOT_ENV: &str = "LOOMTEST_WORKSPACE_ROOT";
pub const PROJECT_COUNT_ENV: &str = "LOOMTEST_PROJECT_COUNT";

/// Default worker count when `--workers` is not given: the number of
/// available CPUs, mirroring `nextest-runner::config::get_num_cpus`.
fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

pub async fn run(run_opts: RunOpts) -> Result<i32, CliError> {
    let workspace_root =
        Utf8PathBuf::from_path_buf(std::env::current_dir().map_err(CliError::CurrentExe)?).unwrap_or_default();

    let file_config = match &run_opts.config {
        Some(path) => loomtest_runner::config::load(path.parent().unwrap_or(&workspace_root))?,
        None => loomtest_runner::config::load(&workspace_root)?,
    };

    let mut projects = file_config.resolve_projects();
    if let Some(timeout) = run_opts.timeout() {
        for project in &mut projects {
            project.timeout = timeout;
        }
    }
    if let Some(retries) = run_opts.retries {
        for project in &mut projects {
            project.retries = retries;
        }
    }

    // Re-exec'd workers plan against their own hardcoded project list
    // (`worker_main::run`) rather than reloading the config file; what they
    // need from us is just how many projects we resolved, so their `TestId`
    // assignment (one id per `(spec, project)` pair, in that nested order)
    // lines up with ours. Content differences between projects (timeouts,
    // retries, test filters) don't affect id assignment, only count and
    // order, so propagating the count is sufficient.
    std::env::set_var(WORKSPACE_ROOT_ENV, workspace_root.as_str());
    std::env::set_var(PROJECT_COUNT_ENV, projects.len().to_string());

    let (registry, suite) = crate::harness::build();
    let bodies_by_identity = crate::harness::index_bodies(&suite);

    let config = RunConfig {
        workers: run_opts.workers.unwrap_or_else(default_workers).max(1),
        forbid_only: run_opts.forbid_only,
        grep: run_opts.grep_regex()?,
        project_filter: (!run_opts.project.is_empty()).then(|| run_opts.project.clone()),
        max_failures: run_opts.max_failures,
        global_timeout: run_opts.global_timeout(),
        update_snapshots: run_opts.update_snapshots,
        shard: run_opts.shard()?,
    };

    let tests = loomtest_runner::test_tree::plan(&suite, &projects, &registry, &config)?;

    let test_bodies: std::collections::HashMap<u64, loomtest_runner::loader::TestBody> = tests
        .iter()
        .filter_map(|test| {
            bodies_by_identity
                .get(&(test.suite_path.clone(), test.spec_title.clone()))
                .map(|body| (test.id.0, body.clone()))
        })
        .collect();

    // `test_bodies` isn't sent over IPC: each re-exec'd worker calls
    // `harness::build`/`harness::index_bodies` itself to reconstruct the same
    // mapping deterministically (see `worker_main`). It's computed here only
    // to validate that every planned test resolved to a body.
    if test_bodies.len() != tests.len() {
        tracing::warn!(
            planned = tests.len(),
            resolved = test_bodies.len(),
            "some planned tests had no matching harness body"
        );
    }

    let current_exe = std::env::current_exe().map_err(CliError::CurrentExe)?;
    let spawn_worker = process_spawner(current_exe, WORKER_SUBCOMMAND);

    let interrupted = Arc::new(AtomicBool::new(false));
    let mut signal_handler = SignalHandlerKind::Standard.build();
    let signal_interrupted = interrupted.clone();
    tokio::spawn(async move {
        signal_handler.recv().await;
        tracing::warn!("received interrupt signal, draining in-flight tests");
        signal_interrupted.store(true, Ordering::Relaxed);
    });

    let outcome = runner::run(tests, &config, spawn_worker, interrupted).await?;

    let reporters = build_reporters(&run_opts)?;
    reporter::report_all(&reporters, &outcome.tests, outcome.end_status);

    Ok(match outcome.end_status {
        RunEndStatus::Passed => exit_codes::NO_TESTS_FAILED_EXIT_CODE,
        RunEndStatus::Failed => exit_codes::TESTS_FAILED_EXIT_CODE,
        RunEndStatus::Interrupted => exit_codes::RUN_INTERRUPTED_EXIT_CODE,
        RunEndStatus::Timedout => exit_codes::RUN_INTERRUPTED_EXIT_CODE,
    })
}

fn build_reporters(run_opts: &RunOpts) -> Result<Vec<Arc<dyn Reporter>>, CliError> {
    let kinds = run_opts.reporters()?;
    let output_dir = run_opts.output.clone().unwrap_or_else(|| "test-results".into());

    let mut reporters: Vec<Arc<dyn Reporter>> = Vec::new();
    for kind in kinds {
        let reporter: Arc<dyn Reporter> = match kind {
            ReporterKind::Dot => Arc::new(DotReporter::new(Box::new(std::io::stdout()))),
            ReporterKind::Line => Arc::new(LineReporter::new(Box::new(std::io::stdout()))),
            ReporterKind::List => Arc::new(ListReporter::new(Box::new(std::io::stdout()))),
            ReporterKind::Json => {
                let path = output_dir.join("report.json");
                Arc::new(JsonReporter::new(Box::new(open_report_file(&path)?), serde_json::json!({}), vec![]))
            }
            ReporterKind::Junit => {
                let path = output_dir.join("junit.xml");
                Arc::new(JunitReporter::new(Box::new(open_report_file(&path)?)))
            }
        };
        reporters.push(reporter);
    }
    Ok(reporters)
}

fn open_report_file(path: &Utf8PathBuf) -> Result<File, CliError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    File::create(path.as_std_path()).map_err(|source| CliError::OutputFile {
        path: path.clone(),
        source,
    })
}
