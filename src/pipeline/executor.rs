// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Pipeline executor
//!
//! Runs resolved stages one at a time in dependency order, halting on the
//! first failure, and persists the environment once every stage succeeded.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use colored::Colorize;

use crate::environment::{self, contract_holds, expand_home, ShellProfile};
use crate::errors::ProvisionError;
use crate::pipeline::{DagBuilder, Manifest, ManifestValidator, Stage};
use crate::profile::{AcquisitionMode, DistributionProfile};
use crate::strategy::{create_default_provisioners, Provisioner, ProvisioningResult, StageContext};

/// Exit code when a failure carries no tool status
pub const GENERIC_FAILURE: i32 = 1;

/// Resolved stages, owned together with the profile that parameterizes them
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    profile: DistributionProfile,
    /// Stages in execution order
    stages: Vec<Stage>,
    shell_profile: PathBuf,
    environment_file: PathBuf,
    work_dir: Option<PathBuf>,
}

impl Pipeline {
    /// Validate `manifest` and resolve every stage against `profile`
    pub fn new(manifest: &Manifest, profile: DistributionProfile) -> Result<Self, ProvisionError> {
        if let Some(err) = ManifestValidator::validate(manifest).into_error() {
            return Err(err);
        }

        let order = DagBuilder::build(manifest)?.topological_order()?;
        let stages = order
            .into_iter()
            .map(|idx| Stage::resolve(&manifest.stages[idx], &profile))
            .collect::<Result<Vec<_>, _>>()?;

        let path = |p: &Path| -> Result<PathBuf, ProvisionError> {
            Ok(expand_home(&profile.expand(&p.to_string_lossy())?))
        };

        Ok(Self {
            name: manifest.name.clone(),
            shell_profile: path(&manifest.shell_profile)?,
            environment_file: path(&manifest.environment_file)?,
            work_dir: manifest.work_dir.as_deref().map(path).transpose()?,
            profile,
            stages,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> &DistributionProfile {
        &self.profile
    }

    /// Stages in execution order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn shell_profile(&self) -> &Path {
        &self.shell_profile
    }

    pub fn environment_file(&self) -> &Path {
        &self.environment_file
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Scratch context for this pipeline's stages
    pub fn context(&self) -> Result<StageContext, ProvisionError> {
        match &self.work_dir {
            Some(dir) => Ok(StageContext::new(dir)),
            None => StageContext::in_cache_dir(),
        }
    }
}

/// Pipeline execution options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Only show what would be done
    pub dry_run: bool,
    /// Re-run a single stage
    pub only: Option<String>,
    /// Suppress the human-readable output
    pub quiet: bool,
}

/// Lifecycle of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Lifecycle of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Pending,
    Running,
    Aborted,
    Completed,
}

/// What happened to one stage during a run
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub mode: AcquisitionMode,
    pub state: StageState,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub result: Option<ProvisioningResult>,
}

/// The failure that aborted a run
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: String,
    pub operation: String,
    pub message: String,
    /// Exit status of the failing tool, verbatim
    pub exit_status: Option<i32>,
    /// Last lines of the failing tool's stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl StageFailure {
    fn new(stage: &str, error: &ProvisionError) -> Self {
        Self {
            stage: stage.to_string(),
            operation: error.operation().to_string(),
            message: error.to_string(),
            exit_status: error.exit_status(),
            output: error.tool_output().map(str::to_string),
        }
    }
}

/// Result of executing a pipeline
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub name: String,
    pub state: PipelineState,
    pub records: Vec<StageRecord>,
    pub exit_code: i32,
    pub duration: Duration,
    pub failure: Option<StageFailure>,
    /// Variables persisted by finalization
    pub environment: BTreeMap<String, String>,
    /// The error behind `failure`
    #[serde(skip)]
    pub error: Option<ProvisionError>,
}

impl PipelineReport {
    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.name == stage)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn to_json(&self) -> Result<String, ProvisionError> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }
}

/// Process exit code for a failed run
pub fn exit_code_for(error: &ProvisionError) -> i32 {
    match error.exit_status() {
        Some(code) if code != 0 => code.clamp(1, 255),
        _ => GENERIC_FAILURE,
    }
}

/// Pipeline executor
pub struct PipelineExecutor {
    /// Registered provisioners by acquisition mode
    provisioners: HashMap<AcquisitionMode, Box<dyn Provisioner>>,
}

impl PipelineExecutor {
    /// Create an executor without provisioners
    pub fn new() -> Self {
        Self {
            provisioners: HashMap::new(),
        }
    }

    /// Create an executor with both built-in strategies
    pub fn with_default_provisioners() -> Self {
        Self {
            provisioners: create_default_provisioners(),
        }
    }

    /// Register a provisioner for a mode
    pub fn register_provisioner(&mut self, mode: AcquisitionMode, provisioner: Box<dyn Provisioner>) {
        self.provisioners.insert(mode, provisioner);
    }

    /// Execute a pipeline.
    ///
    /// Returns an error only for problems found before any stage runs; a
    /// failing stage yields an `Aborted` report instead.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        ctx: &StageContext,
        options: &ExecutionOptions,
    ) -> Result<PipelineReport, ProvisionError> {
        let start = Instant::now();

        let selected: Vec<&Stage> = match &options.only {
            Some(name) => vec![pipeline
                .stage(name)
                .ok_or_else(|| ProvisionError::StageNotFound { stage: name.clone() })?],
            None => pipeline.stages().iter().collect(),
        };

        for stage in &selected {
            let provisioner = self.provisioner_for(stage)?;
            provisioner.validate_stage(stage)?;
            if !provisioner.check_available().await.unwrap_or(false) {
                tracing::warn!(stage = %stage.name, mode = %stage.mode(), "required tools are missing");
            }
        }

        if !options.quiet {
            print_execution_plan(pipeline, &selected, options.dry_run);
        }

        let mut report = PipelineReport {
            name: pipeline.name().to_string(),
            state: PipelineState::Pending,
            records: selected
                .iter()
                .map(|stage| StageRecord {
                    name: stage.name.clone(),
                    mode: stage.mode(),
                    state: StageState::Pending,
                    started_at: None,
                    finished_at: None,
                    result: None,
                })
                .collect(),
            exit_code: 0,
            duration: Duration::ZERO,
            failure: None,
            environment: BTreeMap::new(),
            error: None,
        };

        if options.dry_run {
            report.duration = start.elapsed();
            if !options.quiet {
                print_summary(&report);
            }
            return Ok(report);
        }

        report.state = PipelineState::Running;
        let shell_profile = ShellProfile::new(pipeline.shell_profile());

        for (i, stage) in selected.iter().enumerate() {
            if let Err(e) = self.check_dependencies(pipeline, stage, &report) {
                report.records[i].state = StageState::Failed;
                report.records[i].finished_at = Some(SystemTime::now());
                self.abort(&mut report, stage, e, options);
                break;
            }

            report.records[i].state = StageState::Running;
            report.records[i].started_at = Some(SystemTime::now());
            if !options.quiet {
                println!("  {} {} ({})", "→".blue(), stage.name.bold(), stage.mode());
            }
            tracing::info!(stage = %stage.name, mode = %stage.mode(), origin = %stage.strategy.origin(), "stage running");

            let stage_start = Instant::now();
            let outcome = self.run_stage(stage, ctx, &shell_profile).await;
            report.records[i].finished_at = Some(SystemTime::now());

            match outcome {
                Ok(result) => {
                    report.records[i].state = StageState::Succeeded;
                    if !options.quiet {
                        println!(
                            "  {} {} ({:.2}s)",
                            "✓".green(),
                            stage.name.bold(),
                            result.duration.as_secs_f64()
                        );
                    }
                    report.records[i].result = Some(result);
                }
                Err(e) => {
                    report.records[i].state = StageState::Failed;
                    report.records[i].result =
                        Some(ProvisioningResult::failed(stage, e.to_string(), stage_start.elapsed()));
                    self.abort(&mut report, stage, e, options);
                    break;
                }
            }
        }

        if report.state == PipelineState::Running {
            report.state = PipelineState::Completed;

            // A single-stage retry leaves the persisted environment alone
            if options.only.is_none() {
                let scripts: Vec<PathBuf> = pipeline.stages().iter().map(|s| s.environment.clone()).collect();
                match environment::finalize(&scripts, pipeline.environment_file()).await {
                    Ok(vars) => report.environment = vars,
                    Err(e) => {
                        report.state = PipelineState::Aborted;
                        report.exit_code = exit_code_for(&e);
                        report.failure = Some(StageFailure::new("environment", &e));
                        if !options.quiet {
                            println!("  {} {} - {}", "✗".red(), "environment".bold(), e.to_string().dimmed());
                        }
                        report.error = Some(e);
                    }
                }
            }
        }

        report.duration = start.elapsed();

        if !options.quiet {
            print_summary(&report);
        }

        Ok(report)
    }

    /// Run a stage's provisioner and commit its installed-file contract
    async fn run_stage(
        &self,
        stage: &Stage,
        ctx: &StageContext,
        shell_profile: &ShellProfile,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let provisioner = self.provisioner_for(stage)?;
        let mut result = provisioner.provision(stage, ctx).await?;

        let script = environment::commit(stage, shell_profile)?;
        result.artifacts_installed.insert(script);
        Ok(result)
    }

    /// A stage may only run once every dependency succeeded and left its contract on disk
    fn check_dependencies(
        &self,
        pipeline: &Pipeline,
        stage: &Stage,
        report: &PipelineReport,
    ) -> Result<(), ProvisionError> {
        for dep_name in &stage.depends_on {
            let dep = pipeline.stage(dep_name).ok_or_else(|| ProvisionError::UnknownDependency {
                stage: stage.name.clone(),
                dependency: dep_name.clone(),
            })?;

            // Within a full run the dependency must have succeeded in this run
            if let Some(record) = report.record(dep_name) {
                if record.state != StageState::Succeeded {
                    return Err(ProvisionError::ContractViolation {
                        stage: dep.name.clone(),
                        path: dep.environment.clone(),
                    });
                }
            }

            if !contract_holds(dep) {
                return Err(ProvisionError::ContractViolation {
                    stage: dep.name.clone(),
                    path: dep.environment.clone(),
                });
            }
        }

        Ok(())
    }

    fn abort(&self, report: &mut PipelineReport, stage: &Stage, error: ProvisionError, options: &ExecutionOptions) {
        tracing::error!(
            stage = %stage.name,
            operation = error.operation(),
            status = ?error.exit_status(),
            "stage failed: {}",
            error
        );

        report.state = PipelineState::Aborted;
        report.exit_code = exit_code_for(&error);
        report.failure = Some(StageFailure::new(&stage.name, &error));

        if !options.quiet {
            println!("  {} {} failed during {}", "✗".red(), stage.name.bold(), error.operation());
        }
        report.error = Some(error);
    }

    fn provisioner_for(&self, stage: &Stage) -> Result<&dyn Provisioner, ProvisionError> {
        self.provisioners
            .get(&stage.mode())
            .map(|p| p.as_ref())
            .ok_or_else(|| {
                ProvisionError::config(format!(
                    "no provisioner registered for mode '{}' (stage '{}')",
                    stage.mode(),
                    stage.name
                ))
            })
    }
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::with_default_provisioners()
    }
}

/// Print the execution plan
fn print_execution_plan(pipeline: &Pipeline, stages: &[&Stage], dry_run: bool) {
    println!();
    println!("{}: {}", "Pipeline".bold(), pipeline.name());
    println!("{}", "═".repeat(50));
    println!(
        "Execution plan ({} stage{}){}:",
        stages.len(),
        if stages.len() == 1 { "" } else { "s" },
        if dry_run { ", dry run" } else { "" }
    );
    println!();

    for (i, stage) in stages.iter().enumerate() {
        print!("  {}. {} ({})", i + 1, stage.name.bold(), stage.mode());

        if !stage.depends_on.is_empty() {
            print!(" {}", format!("[depends: {}]", stage.depends_on.join(", ")).dimmed());
        }
        println!();
        println!("     {}", stage.strategy.origin().dimmed());
        println!("     {} {}", "→".dimmed(), stage.install_root.display().to_string().dimmed());
    }

    println!();
}

/// Print the run summary
fn print_summary(report: &PipelineReport) {
    println!();
    match report.state {
        PipelineState::Completed => println!(
            "{}",
            format!("Pipeline completed successfully in {:.2}s", report.duration.as_secs_f64()).green()
        ),
        PipelineState::Aborted => println!(
            "{}",
            format!(
                "Pipeline aborted after {:.2}s (exit code {})",
                report.duration.as_secs_f64(),
                report.exit_code
            )
            .red()
        ),
        PipelineState::Pending | PipelineState::Running => {
            println!("{}", "Dry run: nothing was changed".dimmed())
        }
    }
}
