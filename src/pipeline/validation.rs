// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Manifest validation
//!
//! Validates a stage manifest before any profile is applied to it.

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

use crate::errors::ProvisionError;
use crate::pipeline::{DagBuilder, InstallAnswer, Manifest, PrebuiltSpec, SourceSpec, StageSpec};
use crate::profile::AcquisitionMode;

/// Manifest validator
pub struct ManifestValidator;

impl ManifestValidator {
    /// Validate a manifest
    pub fn validate(manifest: &Manifest) -> ValidationResult {
        let mut result = ValidationResult::new();

        if manifest.stages.is_empty() {
            result.add_error("Manifest has no stages defined");
        }

        let mut seen_names = HashSet::new();
        for stage in &manifest.stages {
            if !seen_names.insert(&stage.name) {
                result.add_error(&format!("Duplicate stage name: '{}'", stage.name));
            }
        }

        // Checks for cycles and unknown dependencies
        match DagBuilder::build(manifest) {
            Ok(_) => {}
            Err(ProvisionError::CircularDependency { stages }) => {
                result.add_error(&format!("Circular dependency: {}", stages.join(" → ")));
            }
            Err(ProvisionError::UnknownDependency { stage, dependency }) => {
                result.add_error(&format!(
                    "Stage '{}' depends on unknown stage '{}'",
                    stage, dependency
                ));
            }
            Err(e) => {
                result.add_error(&format!("DAG validation error: {}", e));
            }
        }

        for stage in &manifest.stages {
            Self::validate_stage(stage, &mut result);
        }

        result
    }

    /// Validate a single stage
    fn validate_stage(stage: &StageSpec, result: &mut ValidationResult) {
        if stage.name.trim().is_empty() {
            result.add_error("Stage with an empty name");
        }

        if stage.install_root.trim().is_empty() {
            result.add_error(&format!("Stage '{}': install_root is empty", stage.name));
        }

        if Path::new(&stage.environment).is_absolute() {
            result.add_error(&format!(
                "Stage '{}': environment must be relative to install_root",
                stage.name
            ));
        }

        if stage.prebuilt.is_none() && stage.source.is_none() {
            result.add_error(&format!(
                "Stage '{}': no acquisition strategy defined",
                stage.name
            ));
            return;
        }

        let default_missing = match stage.default_mode {
            AcquisitionMode::Prebuilt => stage.prebuilt.is_none(),
            AcquisitionMode::SourceBuild => stage.source.is_none(),
        };
        if default_missing {
            result.add_error(&format!(
                "Stage '{}': default mode '{}' has no matching strategy block",
                stage.name, stage.default_mode
            ));
        }

        if let Some(prebuilt) = &stage.prebuilt {
            Self::validate_prebuilt(stage, prebuilt, result);
        }

        if let Some(source) = &stage.source {
            Self::validate_source(stage, source, result);
        }
    }

    /// Validate prebuilt-specific settings
    fn validate_prebuilt(stage: &StageSpec, prebuilt: &PrebuiltSpec, result: &mut ValidationResult) {
        if prebuilt.command.is_empty() {
            result.add_error(&format!("Stage '{}': prebuilt command is empty", stage.name));
        }

        if prebuilt.artifact_url.starts_with("http://") {
            result.add_warning(&format!(
                "Stage '{}': artifact is fetched over plain HTTP",
                stage.name
            ));
        }

        if let Some(digest) = &prebuilt.blake3 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                result.add_error(&format!(
                    "Stage '{}': blake3 digest must be 64 hex characters",
                    stage.name
                ));
            }
        }

        Self::validate_answers(stage, &prebuilt.answers, result);
    }

    /// Validate source-build-specific settings
    fn validate_source(stage: &StageSpec, source: &SourceSpec, result: &mut ValidationResult) {
        if source.repo_url.trim().is_empty() {
            result.add_error(&format!("Stage '{}': source repo_url is empty", stage.name));
        }

        if source.reference.trim().is_empty() {
            result.add_error(&format!("Stage '{}': source ref is empty", stage.name));
        }

        if source.jobs == Some(0) {
            result.add_error(&format!("Stage '{}': jobs must be at least 1", stage.name));
        }

        if let Some(command) = &source.install_command {
            if command.is_empty() {
                result.add_error(&format!("Stage '{}': install_command is empty", stage.name));
            }

            let uses_installer = command.iter().any(|arg| arg.contains("{installer}"));
            if uses_installer && source.installer.is_none() {
                result.add_error(&format!(
                    "Stage '{}': install_command uses {{installer}} but no installer is declared",
                    stage.name
                ));
            }
        }

        if source.build_targets.is_empty()
            && source.prepare.is_empty()
            && source.installer.is_none()
            && source.install_command.is_none()
        {
            result.add_warning(&format!(
                "Stage '{}': source strategy builds and installs nothing",
                stage.name
            ));
        }

        if source.installer.is_none() && source.install_command.is_none() && !source.answers.is_empty() {
            result.add_warning(&format!(
                "Stage '{}': answers are ignored without an installer",
                stage.name
            ));
        }

        Self::validate_answers(stage, &source.answers, result);
    }

    fn validate_answers(stage: &StageSpec, answers: &[InstallAnswer], result: &mut ValidationResult) {
        for (i, answer) in answers.iter().enumerate() {
            if let Some(pattern) = &answer.expect {
                if let Err(e) = Regex::new(pattern) {
                    result.add_error(&format!(
                        "Stage '{}': answer {} has an invalid prompt pattern: {}",
                        stage.name,
                        i + 1,
                        e
                    ));
                }
            }
        }
    }
}

/// Result of manifest validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// The first error as an [`ProvisionError::InvalidManifest`]
    pub fn into_error(self) -> Option<ProvisionError> {
        let count = self.errors.len();
        self.errors.into_iter().next().map(|reason| ProvisionError::InvalidManifest {
            reason,
            help: (count > 1).then(|| {
                format!("{} more problem(s); run 'teeprov validate' for the full list", count - 1)
            }),
        })
    }
}
