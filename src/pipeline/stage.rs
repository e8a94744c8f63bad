// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Resolved stages
//!
//! A [`Stage`] is a manifest entry with its acquisition strategy chosen and
//! every profile placeholder expanded. Stages are created once, when the
//! pipeline is defined, and never mutated afterwards.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::environment::expand_home;
use crate::errors::ProvisionError;
use crate::pipeline::{InstallAnswer, StageSpec};
use crate::profile::{expand, AcquisitionMode, DistributionProfile};

/// Placeholders still open after a stage is defined
const STAGE_RUNTIME_PLACEHOLDERS: &[&str] = &["artifact", "installer", "source_tree", "jobs"];

/// A single provisioning unit
#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub name: String,
    pub description: Option<String>,
    pub depends_on: Vec<String>,
    /// Root the stage installs under
    pub install_root: PathBuf,
    /// Absolute path of the stage's environment script
    pub environment: PathBuf,
    /// Variables for a generated environment script
    pub exports: BTreeMap<String, String>,
    pub strategy: AcquisitionStrategy,
}

/// How a stage obtains its software
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AcquisitionStrategy {
    Prebuilt(PrebuiltStrategy),
    #[serde(rename = "source")]
    SourceBuild(SourceBuildStrategy),
}

/// Download a versioned artifact and run its installer
#[derive(Debug, Clone, Serialize)]
pub struct PrebuiltStrategy {
    pub artifact_url: String,
    pub blake3: Option<String>,
    pub command: Vec<String>,
    pub answers: Vec<InstallAnswer>,
    pub prompt_timeout: Duration,
}

/// Clone pinned sources, build them and run the built installer
#[derive(Debug, Clone, Serialize)]
pub struct SourceBuildStrategy {
    pub repo_url: String,
    pub reference: String,
    pub build_dir: Option<PathBuf>,
    pub prepare: Vec<String>,
    pub build_targets: Vec<String>,
    pub jobs: usize,
    pub installer: Option<String>,
    pub install_command: Option<Vec<String>>,
    pub installer_args: Vec<String>,
    pub answers: Vec<InstallAnswer>,
    pub prompt_timeout: Duration,
    pub keep_source: bool,
}

impl AcquisitionStrategy {
    pub fn mode(&self) -> AcquisitionMode {
        match self {
            Self::Prebuilt(_) => AcquisitionMode::Prebuilt,
            Self::SourceBuild(_) => AcquisitionMode::SourceBuild,
        }
    }

    /// Where the software comes from, for plans and logs
    pub fn origin(&self) -> String {
        match self {
            Self::Prebuilt(p) => p.artifact_url.clone(),
            Self::SourceBuild(s) => format!("{}@{}", s.repo_url, s.reference),
        }
    }
}

impl Stage {
    /// Resolve a manifest entry against the profile
    pub fn resolve(spec: &StageSpec, profile: &DistributionProfile) -> Result<Self, ProvisionError> {
        let mode = profile.mode(&spec.name).ok_or_else(|| {
            ProvisionError::config(format!("no acquisition mode resolved for stage '{}'", spec.name))
        })?;

        let install_root = expand_home(&profile.expand(&spec.install_root)?);

        let mut vars = profile.template_vars();
        vars.insert("install_root", install_root.to_string_lossy().to_string());
        let fill = |template: &str| expand(template, &vars, STAGE_RUNTIME_PLACEHOLDERS);
        let fill_all = |templates: &[String]| -> Result<Vec<String>, ProvisionError> {
            templates.iter().map(|t| fill(t)).collect()
        };
        let fill_answers = |answers: &[InstallAnswer]| -> Result<Vec<InstallAnswer>, ProvisionError> {
            answers
                .iter()
                .map(|answer| -> Result<InstallAnswer, ProvisionError> {
                    Ok(InstallAnswer {
                        expect: answer.expect.clone(),
                        reply: fill(&answer.reply)?,
                    })
                })
                .collect()
        };

        let environment = install_root.join(fill(&spec.environment)?);
        let exports = spec
            .exports
            .iter()
            .map(|(key, value)| -> Result<(String, String), ProvisionError> {
                Ok((key.clone(), fill(value)?))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let missing = |what: &str| {
            ProvisionError::config(format!("stage '{}' has no {} strategy", spec.name, what))
        };

        let strategy = match mode {
            AcquisitionMode::Prebuilt => {
                let p = spec.prebuilt.as_ref().ok_or_else(|| missing("prebuilt"))?;
                AcquisitionStrategy::Prebuilt(PrebuiltStrategy {
                    artifact_url: fill(&p.artifact_url)?,
                    blake3: p.blake3.as_ref().map(|digest| digest.to_lowercase()),
                    command: fill_all(&p.command)?,
                    answers: fill_answers(&p.answers)?,
                    prompt_timeout: Duration::from_secs(p.prompt_timeout_secs),
                })
            }
            AcquisitionMode::SourceBuild => {
                let s = spec.source.as_ref().ok_or_else(|| missing("source"))?;
                AcquisitionStrategy::SourceBuild(SourceBuildStrategy {
                    repo_url: fill(&s.repo_url)?,
                    reference: fill(&s.reference)?,
                    build_dir: s.build_dir.as_deref().map(fill).transpose()?.map(PathBuf::from),
                    prepare: fill_all(&s.prepare)?,
                    build_targets: fill_all(&s.build_targets)?,
                    jobs: s.jobs.unwrap_or_else(num_cpus::get).max(1),
                    installer: s.installer.as_deref().map(fill).transpose()?,
                    install_command: s.install_command.as_deref().map(fill_all).transpose()?,
                    installer_args: fill_all(&s.installer_args)?,
                    answers: fill_answers(&s.answers)?,
                    prompt_timeout: Duration::from_secs(s.prompt_timeout_secs),
                    keep_source: s.keep_source,
                })
            }
        };

        Ok(Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            depends_on: dedup(&spec.depends_on),
            install_root,
            environment,
            exports,
            strategy,
        })
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.strategy.mode()
    }
}

fn dedup(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Manifest;
    use crate::profile::{ProfileResolver, RawConfig};

    fn profile(extra: &[(&str, &str)]) -> DistributionProfile {
        let mut pairs = vec![
            ("TEE_CODENAME", "focal"),
            ("SGX_VERSION", "2.15"),
            ("DCAP_VERSION", "1.12.1"),
            ("SGX_SDK_URL", "https://example/sdk-2.15.bin"),
        ];
        pairs.extend_from_slice(extra);
        let raw = RawConfig::from_vars(pairs.into_iter().map(|(k, v)| (k, v.to_string())));
        ProfileResolver::resolve(&raw, &Manifest::builtin()).unwrap()
    }

    #[test]
    fn test_prebuilt_sdk_stage() {
        let manifest = Manifest::builtin();
        let stage = Stage::resolve(manifest.get_stage("sdk").unwrap(), &profile(&[])).unwrap();

        assert_eq!(stage.mode(), AcquisitionMode::Prebuilt);
        assert_eq!(stage.environment, PathBuf::from("/opt/intel/sgxsdk/environment"));

        let AcquisitionStrategy::Prebuilt(p) = &stage.strategy else {
            panic!("Expected prebuilt strategy");
        };
        assert_eq!(p.artifact_url, "https://example/sdk-2.15.bin");
        assert_eq!(p.command, vec!["{artifact}"]);
        assert_eq!(p.answers[0].reply, "no");
        assert_eq!(p.answers[1].reply, "/opt/intel");
    }

    #[test]
    fn test_source_sdk_stage() {
        let manifest = Manifest::builtin();
        let profile = profile(&[("SDK_DIST", "source")]);
        let stage = Stage::resolve(manifest.get_stage("sdk").unwrap(), &profile).unwrap();

        let AcquisitionStrategy::SourceBuild(s) = &stage.strategy else {
            panic!("Expected source strategy");
        };
        assert_eq!(s.reference, "sgx_2.15");
        assert_eq!(s.build_targets, vec!["preparation", "sdk_install_pkg"]);
        assert!(s.jobs >= 1);
        assert_eq!(
            stage.strategy.origin(),
            "https://github.com/intel/linux-sgx.git@sgx_2.15"
        );
    }

    #[test]
    fn test_exports_and_commands_are_expanded() {
        let manifest = Manifest::builtin();
        let profile = profile(&[]);

        let binutils = Stage::resolve(manifest.get_stage("binutils").unwrap(), &profile).unwrap();
        assert_eq!(
            binutils.exports["PATH"],
            "/opt/intel/sgxbinutils/external/toolset/ubuntu20.04:$PATH"
        );

        let psw = Stage::resolve(manifest.get_stage("psw").unwrap(), &profile).unwrap();
        let AcquisitionStrategy::Prebuilt(p) = &psw.strategy else {
            panic!("Expected prebuilt strategy");
        };
        assert!(p.artifact_url.contains("/2.15/distro/ubuntu20.04-server/"));
        assert!(p.command[2].contains("tar -xzf {artifact} -C /opt/intel/sgxpsw"));
        assert!(p.command[2].contains(" focal main"));
    }

    #[test]
    fn test_home_relative_install_root() {
        let manifest = Manifest::builtin();
        let stage = Stage::resolve(manifest.get_stage("rust").unwrap(), &profile(&[])).unwrap();

        assert!(stage.install_root.ends_with(".cargo"));
        assert!(!stage.install_root.starts_with("~"));
        assert!(stage.environment.ends_with(".cargo/env"));
    }
}
