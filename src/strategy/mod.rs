// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Acquisition strategies
//!
//! This module provides the provisioner trait and its two implementations:
//! downloading a prebuilt vendor artifact, or building from pinned sources.
//! Both end by running an installer through the same canned-answer driver.

pub mod installer;
mod prebuilt;
mod source;

pub use installer::{run_installer, InstallerOutput};
pub use prebuilt::PrebuiltProvisioner;
pub use source::{BuildArtifacts, SourceBuildProvisioner};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::errors::ProvisionError;
use crate::pipeline::{InstallAnswer, Stage};
use crate::profile::{fill_runtime, AcquisitionMode};

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed(String),
}

/// Result of provisioning one stage
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningResult {
    pub stage_name: String,
    pub outcome: Outcome,
    /// Paths the stage left under its install root
    pub artifacts_installed: BTreeSet<PathBuf>,
    pub duration: Duration,
}

impl ProvisioningResult {
    /// Create a successful result
    pub fn success(stage: &Stage, artifacts_installed: BTreeSet<PathBuf>, duration: Duration) -> Self {
        Self {
            stage_name: stage.name.clone(),
            outcome: Outcome::Success,
            artifacts_installed,
            duration,
        }
    }

    /// Create a failed result
    pub fn failed(stage: &Stage, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            stage_name: stage.name.clone(),
            outcome: Outcome::Failed(reason.into()),
            artifacts_installed: BTreeSet::new(),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Scratch space shared by all stages of a run
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Where prebuilt artifacts are downloaded to
    pub download_dir: PathBuf,
    /// Where source trees are checked out
    pub source_dir: PathBuf,
    /// Draw progress bars and spinners
    pub show_progress: bool,
}

impl StageContext {
    /// Context rooted at `work_dir`
    pub fn new(work_dir: &Path) -> Self {
        Self {
            download_dir: work_dir.join("downloads"),
            source_dir: work_dir.join("src"),
            show_progress: false,
        }
    }

    /// Context under the user's cache directory
    pub fn in_cache_dir() -> Result<Self, ProvisionError> {
        let dirs = directories::ProjectDirs::from("", "", "teeprov")
            .ok_or_else(|| ProvisionError::config("could not determine a cache directory"))?;
        Ok(Self::new(dirs.cache_dir()))
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

/// Trait for acquisition strategies
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// The mode this provisioner implements
    fn mode(&self) -> AcquisitionMode;

    /// Acquire and install a stage.
    ///
    /// Leaves files under `stage.install_root`; the installed-file contract
    /// (environment script and profile line) is committed by the pipeline.
    async fn provision(&self, stage: &Stage, ctx: &StageContext) -> Result<ProvisioningResult, ProvisionError>;

    /// Check that the external tools this strategy needs are present
    async fn check_available(&self) -> Result<bool, ProvisionError>;

    /// Validate stage configuration
    fn validate_stage(&self, stage: &Stage) -> Result<(), ProvisionError>;
}

/// Create the standard provisioner setup with both built-in strategies
pub fn create_default_provisioners() -> HashMap<AcquisitionMode, Box<dyn Provisioner>> {
    let mut provisioners: HashMap<AcquisitionMode, Box<dyn Provisioner>> = HashMap::new();
    provisioners.insert(AcquisitionMode::Prebuilt, Box::new(PrebuiltProvisioner::new()));
    provisioners.insert(AcquisitionMode::SourceBuild, Box::new(SourceBuildProvisioner::new()));
    provisioners
}

/// Fill runtime placeholders in a command line
pub(crate) fn fill_command(
    command: &[String],
    runtime: &[(&str, String)],
) -> Result<Vec<String>, ProvisionError> {
    command.iter().map(|arg| fill_runtime(arg, runtime)).collect()
}

/// Fill runtime placeholders in installer replies
pub(crate) fn fill_answers(
    answers: &[InstallAnswer],
    runtime: &[(&str, String)],
) -> Result<Vec<InstallAnswer>, ProvisionError> {
    answers
        .iter()
        .map(|answer| {
            Ok(InstallAnswer {
                expect: answer.expect.clone(),
                reply: fill_runtime(&answer.reply, runtime)?,
            })
        })
        .collect()
}

/// Top-level entries under an install root, with their modification times.
///
/// Install roots can be shared (the SDK installs into the parent of the other
/// SGX roots), so a stage reports only what changed while it ran.
pub(crate) struct InstallSnapshot {
    root: PathBuf,
    before: BTreeMap<PathBuf, Option<SystemTime>>,
}

impl InstallSnapshot {
    pub(crate) fn take(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            before: top_level_entries(root),
        }
    }

    /// Entries created or modified since the snapshot was taken
    pub(crate) fn installed(&self) -> BTreeSet<PathBuf> {
        top_level_entries(&self.root)
            .into_iter()
            .filter(|(path, modified)| self.before.get(path) != Some(modified))
            .map(|(path, _)| path)
            .collect()
    }
}

fn top_level_entries(root: &Path) -> BTreeMap<PathBuf, Option<SystemTime>> {
    std::fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| (e.path(), e.metadata().and_then(|m| m.modified()).ok()))
                .collect()
        })
        .unwrap_or_default()
}

/// Last `lines` lines of tool output
pub(crate) fn tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
