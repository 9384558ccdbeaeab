// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Project configuration, loaded from `.config/loomtest.toml` (spec.md §2,
//! ambient configuration layer).

use crate::errors::ConfigParseError;
use crate::test_tree::Project;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::time::Duration;

/// The on-disk shape of `.config/loomtest.toml`. Deserialized once at
/// startup and turned into the richer [`Project`] values the rest of the
/// engine works with.
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: Utf8PathBuf,
    #[serde(default)]
    pub projects: Vec<FileProject>,
}

#[derive(Debug, Deserialize)]
pub struct FileProject {
    pub name: String,
    #[serde(default)]
    pub test_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub test_match: Vec<String>,
    #[serde(default)]
    pub test_ignore: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<usize>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_output_dir() -> Utf8PathBuf {
    "test-results".into()
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            workers: None,
            timeout_ms: default_timeout_ms(),
            retries: 0,
            output_dir: default_output_dir(),
            projects: Vec::new(),
        }
    }
}

/// Loads `.config/loomtest.toml` relative to `workspace_root`, if present;
/// falls back to an all-defaults [`FileConfig`] otherwise (spec.md §7:
/// config parse failures, not missing files, are fatal).
pub fn load(workspace_root: &Utf8Path) -> Result<FileConfig, ConfigParseError> {
    let config_file = workspace_root.join(".config").join("loomtest.toml");
    if !config_file.as_std_path().exists() {
        return Ok(FileConfig::default());
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(config_file.as_std_path()))
        .build()
        .map_err(|source| ConfigParseError {
            config_file: config_file.clone(),
            source,
        })?;

    settings.try_deserialize().map_err(|source| ConfigParseError { config_file, source })
}

impl FileConfig {
    /// Resolves the configured projects into [`Project`] values, applying
    /// top-level defaults to any field a project doesn't override. Yields a
    /// single default project when none are configured.
    pub fn resolve_projects(&self) -> Vec<Project> {
        if self.projects.is_empty() {
            return vec![Project {
                timeout: Duration::from_millis(self.timeout_ms),
                retries: self.retries,
                output_dir: self.output_dir.clone(),
                ..Project::default()
            }];
        }

        self.projects
            .iter()
            .map(|project| Project {
                name: project.name.clone(),
                output_dir: self.output_dir.join(&project.name),
                test_dir: project.test_dir.clone().unwrap_or_else(|| ".".into()),
                test_match: if project.test_match.is_empty() {
                    vec!["**/*.rs".to_owned()]
                } else {
                    project.test_match.clone()
                },
                test_ignore: project.test_ignore.clone(),
                timeout: Duration::from_millis(project.timeout_ms.unwrap_or(self.timeout_ms)),
                retries: project.retries.unwrap_or(self.retries),
                ..Project::default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = camino::Utf8PathBuf::from("/nonexistent/loomtest-workspace");
        let config = load(&dir).unwrap();
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.resolve_projects().len(), 1);
    }

    #[test]
    fn projects_inherit_top_level_defaults() {
        let config = FileConfig {
            timeout_ms: 5_000,
            retries: 2,
            projects: vec![
                FileProject {
                    name: "chromium".to_owned(),
                    test_dir: None,
                    test_match: vec![],
                    test_ignore: vec![],
                    timeout_ms: None,
                    retries: None,
                },
                FileProject {
                    name: "firefox".to_owned(),
                    test_dir: None,
                    test_match: vec![],
                    test_ignore: vec![],
                    timeout_ms: Some(9_000),
                    retries: Some(0),
                },
            ],
            ..FileConfig::default()
        };
        let projects = config.resolve_projects();
        assert_eq!(projects[0].timeout, Duration::from_millis(5_000));
        assert_eq!(projects[0].retries, 2);
        assert_eq!(projects[1].timeout, Duration::from_millis(9_000));
        assert_eq!(projects[1].retries, 0);
    }
}
