// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Error types for provisioning runs
//!
//! Every failure surfaces the stage, the operation that failed and, where a
//! child process was involved, the tool's exit status verbatim.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for teeprov operations
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Main error type for teeprov
#[derive(Error, Debug, Diagnostic)]
pub enum ProvisionError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Configuration error: {reason}")]
    #[diagnostic(code(teeprov::configuration))]
    Configuration {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Manifest file not found: {path}")]
    #[diagnostic(
        code(teeprov::manifest_not_found),
        help("Write the built-in manifest with 'teeprov init' or pass --manifest")
    )]
    ManifestNotFound { path: PathBuf },

    #[error("Invalid manifest: {reason}")]
    #[diagnostic(code(teeprov::invalid_manifest))]
    InvalidManifest {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Circular dependency detected")]
    #[diagnostic(
        code(teeprov::circular_dependency),
        help("Review the depends_on lists of your stages to remove the cycle")
    )]
    CircularDependency { stages: Vec<String> },

    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    #[diagnostic(
        code(teeprov::unknown_dependency),
        help("Check that '{dependency}' is defined in your manifest")
    )]
    UnknownDependency { stage: String, dependency: String },

    #[error("Stage '{stage}' not found in manifest")]
    #[diagnostic(code(teeprov::stage_not_found))]
    StageNotFound { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Acquisition Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Download of '{url}' failed: {reason}")]
    #[diagnostic(
        code(teeprov::download),
        help("Downloads are not retried; check the URL and network, then re-run the stage")
    )]
    Download {
        url: String,
        reason: String,
        http_status: Option<u16>,
    },

    #[error("Fetching '{reference}' from '{repo}' failed: {reason}")]
    #[diagnostic(code(teeprov::source_fetch))]
    SourceFetch {
        repo: String,
        reference: String,
        reason: String,
        status: Option<i32>,
    },

    #[error("Installer '{installer}' did not follow the expected prompt sequence: {reason}")]
    #[diagnostic(
        code(teeprov::installer_protocol),
        help("The pinned installer answers no longer match this installer version; update the manifest answers")
    )]
    InstallerProtocol {
        installer: String,
        reason: String,
        answered: usize,
        expected: usize,
    },

    #[error("Build target '{target}' failed{}", format_status(.status))]
    #[diagnostic(code(teeprov::build))]
    Build {
        target: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Installer '{installer}' failed{}", format_status(.status))]
    #[diagnostic(code(teeprov::install_failed))]
    InstallFailed {
        installer: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Stage '{stage}' did not leave its environment script at {path}")]
    #[diagnostic(
        code(teeprov::contract_violation),
        help("Every stage must install an environment script under its install root")
    )]
    ContractViolation { stage: String, path: PathBuf },

    #[error("Environment finalization failed: {reason}")]
    #[diagnostic(code(teeprov::finalization))]
    Finalization { reason: String, status: Option<i32> },

    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(teeprov::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(teeprov::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(teeprov::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(teeprov::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(teeprov::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(teeprov::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(teeprov::toml_error))]
    Toml { message: String },
}

fn format_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" with exit status {}", code),
        None => String::new(),
    }
}

impl From<std::io::Error> for ProvisionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ProvisionError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ProvisionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for ProvisionError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl ProvisionError {
    /// Create a configuration error without a help line
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
            help: None,
        }
    }

    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "git" => "Install git: apt-get install -y git".to_string(),
            "make" => "Install build tools: apt-get install -y build-essential".to_string(),
            "bash" => "A bash shell is required to source environment scripts".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Exit status of the underlying tool, when one ran
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            Self::SourceFetch { status, .. }
            | Self::Build { status, .. }
            | Self::InstallFailed { status, .. }
            | Self::Finalization { status, .. } => *status,
            _ => None,
        }
    }

    /// Captured tail of the failing tool's stderr
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::Build { stderr, .. } | Self::InstallFailed { stderr, .. } if !stderr.trim().is_empty() => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }

    /// Name of the operation this error belongs to
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Download { .. } => "fetch",
            Self::SourceFetch { .. } => "checkout",
            Self::Build { .. } => "build",
            Self::InstallerProtocol { .. } | Self::InstallFailed { .. } => "install",
            Self::ContractViolation { .. } => "verify",
            Self::Finalization { .. } => "finalize",
            Self::Configuration { .. }
            | Self::ManifestNotFound { .. }
            | Self::InvalidManifest { .. }
            | Self::CircularDependency { .. }
            | Self::UnknownDependency { .. }
            | Self::StageNotFound { .. } => "configure",
            _ => "provision",
        }
    }

    /// Whether this error happens before any stage could run
    pub fn is_configuration(&self) -> bool {
        self.operation() == "configure"
    }
}
