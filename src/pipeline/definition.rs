// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Stage manifest structures
//!
//! Defines the schema for .teeprov.yaml files. A manifest describes both
//! acquisition strategies for each stage; the resolved profile picks one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::ProvisionError;
use crate::profile::AcquisitionMode;

/// Built-in manifest for the SGX enclave toolchain
pub const BUILTIN_MANIFEST: &str = include_str!("builtin.yaml");

/// Default manifest file name
pub const DEFAULT_MANIFEST_FILE: &str = ".teeprov.yaml";

/// Stage manifest from .teeprov.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Manifest name
    pub name: String,

    /// Manifest description
    #[serde(default)]
    pub description: Option<String>,

    /// Shell profile that receives one `source` line per stage
    #[serde(default = "default_shell_profile")]
    pub shell_profile: PathBuf,

    /// File the finalized environment is persisted to
    #[serde(default = "default_environment_file")]
    pub environment_file: PathBuf,

    /// Scratch space for downloads and source trees (defaults to the user cache dir)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Stages in declaration order
    pub stages: Vec<StageSpec>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_shell_profile() -> PathBuf {
    PathBuf::from("~/.bashrc")
}

fn default_environment_file() -> PathBuf {
    PathBuf::from("/etc/profile.d/teeprov.sh")
}

impl Manifest {
    /// The manifest shipped with teeprov
    pub fn builtin() -> Self {
        Self::from_yaml(BUILTIN_MANIFEST).expect("Invalid built-in manifest")
    }

    /// Load a manifest from a YAML or TOML file
    pub fn from_file(path: &Path) -> Result<Self, ProvisionError> {
        if !path.exists() {
            return Err(ProvisionError::ManifestNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ProvisionError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Load `path` if given, otherwise the default file or the built-in manifest
    pub fn load(path: Option<&Path>) -> Result<Self, ProvisionError> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_MANIFEST_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_MANIFEST_FILE))
            }
            None => Ok(Self::builtin()),
        }
    }

    /// Parse manifest from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ProvisionError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse manifest from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ProvisionError> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Serialize manifest to YAML
    pub fn to_yaml(&self) -> Result<String, ProvisionError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Get all stage names
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Declaration of a single provisioning stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name (must be unique within the manifest)
    pub name: String,

    /// Stage description
    #[serde(default)]
    pub description: Option<String>,

    /// Stages whose installed artifacts this stage needs
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Mode used when no `<STAGE>_DIST` selector is given
    #[serde(default = "default_mode")]
    pub default_mode: AcquisitionMode,

    /// Root the stage installs under (template)
    pub install_root: String,

    /// Environment script, relative to `install_root` (template)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Variables written to the environment script when the installer leaves none
    #[serde(default)]
    pub exports: BTreeMap<String, String>,

    /// Download-and-install strategy
    #[serde(default)]
    pub prebuilt: Option<PrebuiltSpec>,

    /// Clone-build-install strategy
    #[serde(default)]
    pub source: Option<SourceSpec>,
}

fn default_mode() -> AcquisitionMode {
    AcquisitionMode::Prebuilt
}

fn default_environment() -> String {
    "environment".to_string()
}

/// Prebuilt acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrebuiltSpec {
    /// Versioned artifact URL (template)
    pub artifact_url: String,

    /// Expected BLAKE3 digest of the artifact, hex encoded
    #[serde(default)]
    pub blake3: Option<String>,

    /// Installer command line; `{artifact}` is the downloaded file
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Canned answers fed to the installer, in prompt order
    #[serde(default)]
    pub answers: Vec<InstallAnswer>,

    /// Seconds to wait for each expected prompt
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,
}

fn default_command() -> Vec<String> {
    vec!["{artifact}".to_string()]
}

fn default_prompt_timeout() -> u64 {
    300
}

/// Source-build acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Repository to clone (template)
    pub repo_url: String,

    /// Branch, tag or commit to check out (template)
    #[serde(rename = "ref")]
    pub reference: String,

    /// Subdirectory of the source tree the build runs in
    #[serde(default)]
    pub build_dir: Option<String>,

    /// Command run once in the build directory before any target (templates)
    #[serde(default)]
    pub prepare: Vec<String>,

    /// Make targets, built in declaration order
    #[serde(default)]
    pub build_targets: Vec<String>,

    /// Parallel build jobs; defaults to the number of CPUs
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Glob locating the built installer, relative to the source tree (template)
    ///
    /// Without an installer and install command the build targets are
    /// expected to install into `install_root` themselves.
    #[serde(default)]
    pub installer: Option<String>,

    /// Install command line; defaults to running `{installer}` itself
    #[serde(default)]
    pub install_command: Option<Vec<String>>,

    /// Extra arguments appended to the install command (templates)
    #[serde(default)]
    pub installer_args: Vec<String>,

    /// Canned answers fed to the installer, in prompt order
    #[serde(default)]
    pub answers: Vec<InstallAnswer>,

    /// Seconds to wait for each expected prompt
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,

    /// Keep the source tree after a successful install
    #[serde(default)]
    pub keep_source: bool,
}

/// One pinned response to an installer prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallAnswer {
    /// Regex the installer output must match before the reply is sent
    #[serde(default)]
    pub expect: Option<String>,

    /// Line written to the installer's stdin (template)
    pub reply: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_manifest_parses() {
        let manifest = Manifest::builtin();
        assert_eq!(
            manifest.stage_names(),
            vec!["binutils", "sdk", "psw", "dcap", "rust"]
        );

        let sdk = manifest.get_stage("sdk").unwrap();
        assert_eq!(sdk.depends_on, vec!["binutils"]);
        assert!(sdk.prebuilt.is_some());
        assert!(sdk.source.is_some());
        assert_eq!(sdk.prebuilt.as_ref().unwrap().answers.len(), 2);
    }

    #[test]
    fn test_parse_minimal_stage() {
        let yaml = r#"
name: "minimal"
stages:
  - name: "tools"
    install_root: "/opt/tools"
    prebuilt:
      artifact_url: "https://example/tools-{version}.bin"
"#;

        let manifest = Manifest::from_yaml(yaml).unwrap();
        let stage = &manifest.stages[0];

        assert_eq!(manifest.version, "1");
        assert_eq!(manifest.shell_profile, PathBuf::from("~/.bashrc"));
        assert_eq!(stage.default_mode, AcquisitionMode::Prebuilt);
        assert_eq!(stage.environment, "environment");

        let prebuilt = stage.prebuilt.as_ref().unwrap();
        assert_eq!(prebuilt.command, vec!["{artifact}"]);
        assert_eq!(prebuilt.prompt_timeout_secs, 300);
        assert!(stage.source.is_none());
    }

    #[test]
    fn test_parse_source_stage() {
        let yaml = r#"
name: "src"
stages:
  - name: "sdk"
    default_mode: source
    install_root: "/opt/intel"
    environment: "sgxsdk/environment"
    source:
      repo_url: "https://github.com/intel/linux-sgx.git"
      ref: "sgx_{version}"
      build_targets: ["preparation", "sdk_install_pkg"]
      installer: "linux/installer/bin/sgx_linux_x64_sdk_*.bin"
      answers:
        - expect: "\\[yes/no\\]"
          reply: "no"
        - reply: "/opt/intel"
"#;

        let manifest = Manifest::from_yaml(yaml).unwrap();
        let stage = &manifest.stages[0];
        let source = stage.source.as_ref().unwrap();

        assert_eq!(stage.default_mode, AcquisitionMode::SourceBuild);
        assert_eq!(source.reference, "sgx_{version}");
        assert_eq!(source.build_targets, vec!["preparation", "sdk_install_pkg"]);
        assert_eq!(source.answers[1].expect, None);
        assert!(!source.keep_source);
    }

    #[test]
    fn test_parse_toml_manifest() {
        let content = r#"
name = "toml"

[[stages]]
name = "rust"
install_root = "~/.cargo"
environment = "env"

[stages.prebuilt]
artifact_url = "https://sh.rustup.rs"
command = ["sh", "{artifact}", "-y"]
"#;

        let manifest = Manifest::from_toml(content).unwrap();
        assert_eq!(manifest.stages[0].environment, "env");
        assert_eq!(
            manifest.stages[0].prebuilt.as_ref().unwrap().command,
            vec!["sh", "{artifact}", "-y"]
        );
    }

    #[test]
    fn test_missing_manifest_file() {
        let err = Manifest::from_file(Path::new("/nonexistent/.teeprov.yaml")).unwrap_err();
        assert!(matches!(err, ProvisionError::ManifestNotFound { .. }));
    }
}
