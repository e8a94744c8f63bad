// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from a failed run.

use super::ProvisionError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Pick a suggestion for an error raised while running `stage`
    pub fn for_error(error: &ProvisionError, stage: &str) -> Option<Self> {
        match error {
            ProvisionError::Download { url, .. } => Some(Self::retry_download(url, stage)),
            ProvisionError::SourceFetch { reference, repo, .. } => {
                Some(Self::check_ref(repo, reference))
            }
            ProvisionError::InstallerProtocol { answered, expected, .. } => {
                Some(Self::update_answers(stage, *answered, *expected))
            }
            ProvisionError::Build { target, .. } => Some(Self::rebuild(stage, target)),
            ProvisionError::ContractViolation { stage: dependency, .. } => {
                Some(Self::provision_dependency(dependency))
            }
            ProvisionError::CircularDependency { stages } => {
                Some(Self::fix_circular_dependency(stages))
            }
            ProvisionError::ManifestNotFound { .. } => Some(Self::create_manifest()),
            _ => None,
        }
    }

    /// Suggest re-running a stage after a failed download
    pub fn retry_download(url: &str, stage: &str) -> Self {
        Self {
            action: "Check the artifact URL and retry the stage".into(),
            steps: vec![
                format!("The artifact could not be downloaded from {}", url),
                "Downloads are never retried automatically".into(),
            ],
            commands: vec![
                "# Check the artifact is reachable:".into(),
                format!("curl -fsSIL {}", url),
                "".into(),
                "# Re-run only this stage:".into(),
                format!("teeprov provision --only {}", stage),
            ],
        }
    }

    /// Suggest verifying a source ref
    pub fn check_ref(repo: &str, reference: &str) -> Self {
        Self {
            action: format!("Verify that '{}' exists upstream", reference),
            steps: vec![
                "The pinned ref could not be checked out".into(),
                "Tags for SDK releases usually follow the sgx_<version> pattern".into(),
            ],
            commands: vec![
                "# List remote refs:".into(),
                format!("git ls-remote --tags {}", repo),
            ],
        }
    }

    /// Suggest updating pinned installer answers
    pub fn update_answers(stage: &str, answered: usize, expected: usize) -> Self {
        Self {
            action: format!("Update the pinned installer answers for '{}'", stage),
            steps: vec![
                format!(
                    "{} of {} pinned answers were consumed before the installer diverged",
                    answered, expected
                ),
                "Run the installer by hand once and record its prompts".into(),
            ],
            commands: vec![],
        }
    }

    /// Suggest inspecting a failed build
    pub fn rebuild(stage: &str, target: &str) -> Self {
        Self {
            action: format!("Inspect the '{}' build output", target),
            steps: vec![
                "The source tree is left in place after a failed build".into(),
                "Fix the toolchain issue, then re-run the stage".into(),
            ],
            commands: vec![format!("teeprov provision --only {} -v", stage)],
        }
    }

    /// Suggest installing a dependency whose contract is missing
    pub fn provision_dependency(dependency: &str) -> Self {
        Self {
            action: format!("Provision '{}' first", dependency),
            steps: vec![
                format!("'{}' has not left its environment script on disk", dependency),
                "Single-stage runs rely on dependencies installed by earlier runs".into(),
            ],
            commands: vec![format!("teeprov provision --only {}", dependency)],
        }
    }

    /// Suggest fixing a circular dependency
    pub fn fix_circular_dependency(stages: &[String]) -> Self {
        Self {
            action: "Remove circular dependency".into(),
            steps: vec![
                format!("Detected cycle: {}", stages.join(" → ")),
                "Review your stage dependencies".into(),
                "Ensure stages form a directed acyclic graph (DAG)".into(),
            ],
            commands: vec![
                "# Visualize the stage graph:".into(),
                "teeprov graph --format mermaid".into(),
            ],
        }
    }

    /// Suggest creating a manifest file
    pub fn create_manifest() -> Self {
        Self {
            action: "Create a stage manifest".into(),
            steps: vec!["No manifest found at the given path".into()],
            commands: vec!["teeprov init".into()],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_suggests_updating_answers() {
        let err = ProvisionError::InstallerProtocol {
            installer: "sgx_linux_x64_sdk.bin".into(),
            reason: "installer exited early".into(),
            answered: 1,
            expected: 2,
        };

        let suggestion = RecoverySuggestion::for_error(&err, "sdk").unwrap();
        assert!(suggestion.action.contains("sdk"));
        assert!(suggestion.to_string().contains("1 of 2"));
    }

    #[test]
    fn test_contract_violation_points_at_dependency() {
        let err = ProvisionError::ContractViolation {
            stage: "psw".into(),
            path: "/opt/intel/sgxpsw/environment".into(),
        };

        let suggestion = RecoverySuggestion::for_error(&err, "dcap").unwrap();
        assert_eq!(suggestion.commands, vec!["teeprov provision --only psw".to_string()]);
    }

    #[test]
    fn test_io_error_has_no_suggestion() {
        let err = ProvisionError::Io { message: "disk full".into() };
        assert!(RecoverySuggestion::for_error(&err, "sdk").is_none());
    }
}
