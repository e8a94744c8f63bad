// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Source-build acquisition
//!
//! Clones pinned sources recursively, builds the declared make targets in
//! order and runs the freshly built installer. The source tree is removed
//! once the install succeeded.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Instant;

use tokio::process::Command;

use super::{fill_answers, fill_command, InstallSnapshot, run_installer, tail, Provisioner, ProvisioningResult, StageContext};
use crate::errors::ProvisionError;
use crate::pipeline::{AcquisitionStrategy, SourceBuildStrategy, Stage};
use crate::profile::AcquisitionMode;
use crate::utils::create_spinner;

/// Output of a successful build
#[derive(Debug, Clone)]
pub struct BuildArtifacts {
    pub source_tree: PathBuf,
    /// The built installer, when the stage names one
    pub installer: Option<PathBuf>,
}

/// Clone-build-install provisioner
pub struct SourceBuildProvisioner {
    show_progress: bool,
}

impl SourceBuildProvisioner {
    /// Create a new source-build provisioner
    pub fn new() -> Self {
        Self { show_progress: false }
    }

    /// Clone `repo_url` recursively into `dest` and check out `reference`
    pub async fn checkout(&self, repo_url: &str, reference: &str, dest: &Path) -> Result<PathBuf, ProvisionError> {
        which::which("git").map_err(|_| ProvisionError::tool_not_found("git"))?;

        let fetch_error = |reason: String, status: Option<i32>| ProvisionError::SourceFetch {
            repo: repo_url.to_string(),
            reference: reference.to_string(),
            reason,
            status,
        };

        // A tree left behind by an earlier failed run is not trusted
        if dest.exists() {
            tokio::fs::remove_dir_all(dest).await?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(repo = %repo_url, reference = %reference, "cloning sources");

        let dest_path = dest.to_string_lossy().to_string();
        let dest_arg = dest_path.as_str();
        let steps: [(&str, Vec<&str>); 3] = [
            ("clone", vec!["clone", "--recursive", "--quiet", repo_url, dest_arg]),
            ("checkout", vec!["-C", dest_arg, "checkout", "--quiet", reference]),
            (
                "submodule update",
                vec!["-C", dest_arg, "submodule", "update", "--init", "--recursive", "--quiet"],
            ),
        ];

        for (step, args) in steps {
            let output = run("git", &args, None)
                .await
                .map_err(|e| fetch_error(format!("could not run git: {}", e), None))?;

            if !output.status.success() {
                return Err(fetch_error(
                    format!("git {} failed: {}", step, tail(&String::from_utf8_lossy(&output.stderr), 5)),
                    output.status.code(),
                ));
            }
        }

        Ok(dest.to_path_buf())
    }

    /// Build the declared targets in order inside `source_tree`
    pub async fn build(
        &self,
        source_tree: &Path,
        strategy: &SourceBuildStrategy,
    ) -> Result<BuildArtifacts, ProvisionError> {
        let build_dir = match &strategy.build_dir {
            Some(dir) => source_tree.join(dir),
            None => source_tree.to_path_buf(),
        };
        let runtime = runtime_vars(source_tree, strategy, None);

        if !strategy.prepare.is_empty() {
            let prepare = fill_command(&strategy.prepare, &runtime)?;
            let (program, args) = prepare
                .split_first()
                .ok_or_else(|| ProvisionError::config("empty prepare command"))?;
            let args: Vec<&str> = args.iter().map(String::as_str).collect();

            tracing::info!(command = %program, "preparing build");
            let output = run(program, &args, Some(&build_dir))
                .await
                .map_err(|e| build_error("prepare", None, e.to_string()))?;
            if !output.status.success() {
                return Err(build_error("prepare", output.status.code(), stderr_tail(&output)));
            }
        }

        if !strategy.build_targets.is_empty() {
            which::which("make").map_err(|_| ProvisionError::tool_not_found("make"))?;
        }

        let jobs = format!("-j{}", strategy.jobs);
        for target in &strategy.build_targets {
            tracing::info!(make_target = %target, jobs = strategy.jobs, "building");
            let spinner = self.show_progress.then(|| create_spinner(&format!("make {}", target)));

            let output = run("make", &[jobs.as_str(), target.as_str()], Some(&build_dir))
                .await
                .map_err(|e| build_error(target, None, e.to_string()))?;

            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }

            if !output.status.success() {
                return Err(build_error(target, output.status.code(), stderr_tail(&output)));
            }
        }

        let installer = match &strategy.installer {
            Some(pattern) => Some(find_installer(source_tree, pattern)?),
            None => None,
        };

        Ok(BuildArtifacts {
            source_tree: source_tree.to_path_buf(),
            installer,
        })
    }

    /// Run the built installer, then reclaim the source tree
    pub async fn install(
        &self,
        stage: &Stage,
        strategy: &SourceBuildStrategy,
        artifacts: &BuildArtifacts,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let start = Instant::now();
        tokio::fs::create_dir_all(&stage.install_root).await?;
        let snapshot = InstallSnapshot::take(&stage.install_root);

        let runtime = runtime_vars(&artifacts.source_tree, strategy, artifacts.installer.as_deref());
        let command = match (&strategy.install_command, &artifacts.installer) {
            (Some(command), _) => Some(fill_command(command, &runtime)?),
            (None, Some(installer)) => Some(vec![installer.to_string_lossy().to_string()]),
            // The build targets installed everything themselves
            (None, None) => None,
        };

        if let Some(mut command) = command {
            command.extend(fill_command(&strategy.installer_args, &runtime)?);
            let answers = fill_answers(&strategy.answers, &runtime)?;

            tracing::info!(stage = %stage.name, installer = %command.join(" "), "running installer");
            run_installer(&command, &answers, strategy.prompt_timeout, Some(&artifacts.source_tree)).await?;
        }

        if !strategy.keep_source {
            if let Err(e) = tokio::fs::remove_dir_all(&artifacts.source_tree).await {
                tracing::warn!(
                    stage = %stage.name,
                    path = %artifacts.source_tree.display(),
                    error = %e,
                    "could not remove source tree"
                );
            }
        }

        Ok(ProvisioningResult::success(
            stage,
            snapshot.installed(),
            start.elapsed(),
        ))
    }
}

impl Default for SourceBuildProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provisioner for SourceBuildProvisioner {
    fn mode(&self) -> AcquisitionMode {
        AcquisitionMode::SourceBuild
    }

    async fn provision(&self, stage: &Stage, ctx: &StageContext) -> Result<ProvisioningResult, ProvisionError> {
        let AcquisitionStrategy::SourceBuild(strategy) = &stage.strategy else {
            return Err(ProvisionError::config(format!(
                "stage '{}' is not a source stage",
                stage.name
            )));
        };

        let start = Instant::now();
        let provisioner = Self {
            show_progress: ctx.show_progress,
        };

        let source_tree = provisioner
            .checkout(&strategy.repo_url, &strategy.reference, &ctx.source_dir.join(&stage.name))
            .await?;
        let artifacts = provisioner.build(&source_tree, strategy).await?;
        let mut result = provisioner.install(stage, strategy, &artifacts).await?;

        result.duration = start.elapsed();
        Ok(result)
    }

    async fn check_available(&self) -> Result<bool, ProvisionError> {
        Ok(which::which("git").is_ok() && which::which("make").is_ok())
    }

    fn validate_stage(&self, stage: &Stage) -> Result<(), ProvisionError> {
        let AcquisitionStrategy::SourceBuild(strategy) = &stage.strategy else {
            return Err(ProvisionError::config(format!(
                "stage '{}' is not a source stage",
                stage.name
            )));
        };

        if strategy.repo_url.is_empty() || strategy.reference.is_empty() {
            return Err(ProvisionError::config(format!(
                "stage '{}' needs both a repository and a ref",
                stage.name
            )));
        }

        if strategy.install_command.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(ProvisionError::config(format!(
                "stage '{}' has an empty install command",
                stage.name
            )));
        }

        Ok(())
    }
}

fn runtime_vars(
    source_tree: &Path,
    strategy: &SourceBuildStrategy,
    installer: Option<&Path>,
) -> Vec<(&'static str, String)> {
    let mut vars = vec![
        ("source_tree", source_tree.to_string_lossy().to_string()),
        ("jobs", strategy.jobs.to_string()),
    ];
    if let Some(installer) = installer {
        vars.push(("installer", installer.to_string_lossy().to_string()));
    }
    vars
}

/// First match, in sorted order, of `pattern` below `source_tree`
fn find_installer(source_tree: &Path, pattern: &str) -> Result<PathBuf, ProvisionError> {
    let full = source_tree.join(pattern).to_string_lossy().to_string();
    let mut matches: Vec<PathBuf> = glob::glob(&full)
        .map_err(|e| ProvisionError::config(format!("invalid installer pattern '{}': {}", pattern, e)))?
        .filter_map(Result::ok)
        .collect();
    matches.sort();

    matches.into_iter().next().ok_or_else(|| {
        build_error(
            "installer",
            None,
            format!("no built installer matches '{}'", pattern),
        )
    })
}

async fn run(program: &str, args: &[&str], cwd: Option<&Path>) -> std::io::Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(std::process::Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.output().await
}

fn build_error(target: &str, status: Option<i32>, stderr: String) -> ProvisionError {
    ProvisionError::Build {
        target: target.to_string(),
        status,
        stderr,
    }
}

fn stderr_tail(output: &Output) -> String {
    tail(&String::from_utf8_lossy(&output.stderr), 20)
}
