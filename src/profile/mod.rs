// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Distribution profile resolution
//!
//! Raw configuration arrives as environment-style key/value pairs. The
//! resolver turns it into a validated, immutable [`DistributionProfile`]
//! or fails on the first inconsistency it finds. Resolution is pure: it
//! never touches the filesystem.

pub mod template;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::errors::ProvisionError;
use crate::pipeline::Manifest;

pub use template::{expand, fill_runtime, RUNTIME_PLACEHOLDERS};

/// Configuration keys read from the environment
pub mod keys {
    pub const OS_FAMILY: &str = "TEE_OS_FAMILY";
    pub const CODENAME: &str = "TEE_CODENAME";
    pub const ARCH: &str = "TEE_ARCH";
    pub const COMPONENT_VERSION: &str = "SGX_VERSION";
    pub const ATTESTATION_VERSION: &str = "DCAP_VERSION";
    pub const SDK_URL: &str = "SGX_SDK_URL";
    pub const TOOLCHAIN_CHANNEL: &str = "RUST_TOOLCHAIN";
    pub const MODE_SUFFIX: &str = "_DIST";
}

/// Supported OS families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsFamily {
    DebianLike,
}

impl OsFamily {
    /// Codenames this family can target, with their distribution ids
    pub fn codenames(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::DebianLike => &[
                ("bionic", "ubuntu18.04"),
                ("focal", "ubuntu20.04"),
                ("jammy", "ubuntu22.04"),
                ("buster", "debian10"),
                ("bullseye", "debian11"),
                ("bookworm", "debian12"),
            ],
        }
    }

    /// Distribution id for a codename of this family
    pub fn distro_id(&self, codename: &str) -> Option<&'static str> {
        self.codenames()
            .iter()
            .find(|(name, _)| *name == codename)
            .map(|(_, id)| *id)
    }
}

impl FromStr for OsFamily {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debian-like" | "debianlike" | "debian" | "ubuntu" => Ok(Self::DebianLike),
            other => Err(ProvisionError::Configuration {
                reason: format!("unsupported OS family '{}'", other),
                help: Some("Supported OS families: debian-like".into()),
            }),
        }
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DebianLike => write!(f, "debian-like"),
        }
    }
}

/// How a stage obtains its software
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Download a vendor artifact and run its installer
    Prebuilt,
    /// Clone, build and install from pinned sources
    #[serde(rename = "source")]
    SourceBuild,
}

impl FromStr for AcquisitionMode {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prebuilt" | "intel_built" => Ok(Self::Prebuilt),
            "source" | "self_built" => Ok(Self::SourceBuild),
            other => Err(ProvisionError::Configuration {
                reason: format!("unknown acquisition mode '{}'", other),
                help: Some("Use 'prebuilt' (INTEL_BUILT) or 'source' (SELF_BUILT)".into()),
            }),
        }
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prebuilt => write!(f, "prebuilt"),
            Self::SourceBuild => write!(f, "source"),
        }
    }
}

/// Environment variable that selects the mode of `stage`
pub fn mode_key(stage: &str) -> String {
    format!(
        "{}{}",
        stage.to_uppercase().replace('-', "_"),
        keys::MODE_SUFFIX
    )
}

/// Unvalidated configuration, as read from the environment or CLI flags
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    pub os_family: Option<String>,
    pub codename: Option<String>,
    pub arch: Option<String>,
    pub component_version: Option<String>,
    pub attestation_version: Option<String>,
    pub sdk_url: Option<String>,
    pub toolchain_channel: Option<String>,
    /// `<STAGE>_DIST` key → raw mode value
    pub modes: BTreeMap<String, String>,
}

impl RawConfig {
    /// Collect recognised keys from an environment-style iterator
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut raw = Self::default();

        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.into();
            match key {
                keys::OS_FAMILY => raw.os_family = Some(value),
                keys::CODENAME => raw.codename = Some(value),
                keys::ARCH => raw.arch = Some(value),
                keys::COMPONENT_VERSION => raw.component_version = Some(value),
                keys::ATTESTATION_VERSION => raw.attestation_version = Some(value),
                keys::SDK_URL => raw.sdk_url = Some(value),
                keys::TOOLCHAIN_CHANNEL => raw.toolchain_channel = Some(value),
                k if k.ends_with(keys::MODE_SUFFIX) && k.len() > keys::MODE_SUFFIX.len() => {
                    raw.modes.insert(k.to_string(), value);
                }
                _ => {}
            }
        }

        raw
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }
}

/// A validated, immutable set of parameters for one provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionProfile {
    os_family: OsFamily,
    codename: String,
    distro_id: String,
    arch: String,
    component_version: String,
    attestation_version: String,
    sdk_url: Option<String>,
    toolchain_channel: String,
    modes: BTreeMap<String, AcquisitionMode>,
}

impl DistributionProfile {
    pub fn os_family(&self) -> OsFamily {
        self.os_family
    }

    pub fn codename(&self) -> &str {
        &self.codename
    }

    /// Distribution id used in vendor URLs (e.g. `ubuntu20.04`)
    pub fn distro_id(&self) -> &str {
        &self.distro_id
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn component_version(&self) -> &str {
        &self.component_version
    }

    pub fn attestation_version(&self) -> &str {
        &self.attestation_version
    }

    pub fn sdk_url(&self) -> Option<&str> {
        self.sdk_url.as_deref()
    }

    pub fn toolchain_channel(&self) -> &str {
        &self.toolchain_channel
    }

    /// Acquisition mode selected for a stage
    pub fn mode(&self, stage: &str) -> Option<AcquisitionMode> {
        self.modes.get(stage).copied()
    }

    pub fn modes(&self) -> &BTreeMap<String, AcquisitionMode> {
        &self.modes
    }

    /// Template variables derived from this profile
    pub fn template_vars(&self) -> BTreeMap<&'static str, String> {
        let mut vars = base_vars(
            self.os_family,
            &self.codename,
            &self.distro_id,
            &self.arch,
            &self.component_version,
            &self.attestation_version,
            &self.toolchain_channel,
        );
        if let Some(url) = &self.sdk_url {
            vars.insert("sdk_url", url.clone());
        }
        vars
    }

    /// Expand a manifest template, keeping runtime placeholders for later
    pub fn expand(&self, template: &str) -> Result<String, ProvisionError> {
        expand(template, &self.template_vars(), RUNTIME_PLACEHOLDERS)
    }
}

fn base_vars(
    os_family: OsFamily,
    codename: &str,
    distro_id: &str,
    arch: &str,
    version: &str,
    attestation_version: &str,
    channel: &str,
) -> BTreeMap<&'static str, String> {
    let mut vars = BTreeMap::new();
    vars.insert("os_family", os_family.to_string());
    vars.insert("codename", codename.to_string());
    vars.insert("distro_id", distro_id.to_string());
    vars.insert("arch", arch.to_string());
    vars.insert("version", version.to_string());
    vars.insert("attestation_version", attestation_version.to_string());
    vars.insert("channel", channel.to_string());
    vars
}

/// Resolves raw configuration into a [`DistributionProfile`]
pub struct ProfileResolver;

impl ProfileResolver {
    /// Validate `raw` against the stages declared in `manifest`
    pub fn resolve(raw: &RawConfig, manifest: &Manifest) -> Result<DistributionProfile, ProvisionError> {
        let os_family = match raw.os_family.as_deref() {
            Some(family) => family.parse::<OsFamily>()?,
            None => OsFamily::DebianLike,
        };

        let codename = required(&raw.codename, keys::CODENAME)?.to_lowercase();
        let distro_id = os_family.distro_id(&codename).ok_or_else(|| {
            ProvisionError::Configuration {
                reason: format!(
                    "codename '{}' does not belong to OS family '{}'",
                    codename, os_family
                ),
                help: Some(format!(
                    "Supported codenames: {}",
                    os_family
                        .codenames()
                        .iter()
                        .map(|(name, _)| *name)
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            }
        })?;

        let arch = match raw.arch.as_deref().map(str::trim) {
            None | Some("x86_64") | Some("amd64") => "x86_64".to_string(),
            Some(other) => {
                return Err(ProvisionError::Configuration {
                    reason: format!("unsupported architecture '{}'", other),
                    help: Some("SGX toolchains are only published for x86_64".into()),
                })
            }
        };

        let component_version = required(&raw.component_version, keys::COMPONENT_VERSION)?;
        check_version(keys::COMPONENT_VERSION, &component_version)?;

        let attestation_version = required(&raw.attestation_version, keys::ATTESTATION_VERSION)?;
        check_version(keys::ATTESTATION_VERSION, &attestation_version)?;

        let toolchain_channel = raw
            .toolchain_channel
            .as_deref()
            .map(str::trim)
            .unwrap_or("nightly")
            .to_string();
        check_channel(&toolchain_channel)?;

        let modes = Self::resolve_modes(raw, manifest)?;

        let vars = base_vars(
            os_family,
            &codename,
            distro_id,
            &arch,
            &component_version,
            &attestation_version,
            &toolchain_channel,
        );

        let sdk_url = match raw.sdk_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Some(check_sdk_url(url, distro_id, &vars)?),
            _ => None,
        };

        if sdk_url.is_none() {
            if let Some(stage) = manifest.stages.iter().find(|stage| {
                modes.get(&stage.name) == Some(&AcquisitionMode::Prebuilt)
                    && stage
                        .prebuilt
                        .as_ref()
                        .is_some_and(|p| p.artifact_url.contains("{sdk_url}"))
            }) {
                return Err(ProvisionError::Configuration {
                    reason: format!(
                        "{} is required when stage '{}' is prebuilt",
                        keys::SDK_URL,
                        stage.name
                    ),
                    help: Some(format!(
                        "Set {} or select {}=source",
                        keys::SDK_URL,
                        mode_key(&stage.name)
                    )),
                });
            }
        }

        Ok(DistributionProfile {
            os_family,
            codename,
            distro_id: distro_id.to_string(),
            arch,
            component_version,
            attestation_version,
            sdk_url,
            toolchain_channel,
            modes,
        })
    }

    fn resolve_modes(
        raw: &RawConfig,
        manifest: &Manifest,
    ) -> Result<BTreeMap<String, AcquisitionMode>, ProvisionError> {
        for key in raw.modes.keys() {
            if !manifest.stages.iter().any(|stage| mode_key(&stage.name) == *key) {
                return Err(ProvisionError::Configuration {
                    reason: format!("'{}' does not select the mode of any stage", key),
                    help: Some(format!(
                        "Known selectors: {}",
                        manifest
                            .stages
                            .iter()
                            .map(|s| mode_key(&s.name))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                });
            }
        }

        let mut modes = BTreeMap::new();
        for stage in &manifest.stages {
            let key = mode_key(&stage.name);
            let mode = match raw.modes.get(&key) {
                Some(value) => value.parse::<AcquisitionMode>().map_err(|_| {
                    ProvisionError::Configuration {
                        reason: format!("{}='{}' is not an acquisition mode", key, value),
                        help: Some("Use 'prebuilt' (INTEL_BUILT) or 'source' (SELF_BUILT)".into()),
                    }
                })?,
                None => stage.default_mode,
            };

            let available = match mode {
                AcquisitionMode::Prebuilt => stage.prebuilt.is_some(),
                AcquisitionMode::SourceBuild => stage.source.is_some(),
            };
            if !available {
                return Err(ProvisionError::Configuration {
                    reason: format!(
                        "stage '{}' has no '{}' strategy but {} selects it",
                        stage.name, mode, key
                    ),
                    help: None,
                });
            }

            modes.insert(stage.name.clone(), mode);
        }

        Ok(modes)
    }
}

fn required(value: &Option<String>, key: &str) -> Result<String, ProvisionError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ProvisionError::Configuration {
            reason: format!("{} is not set", key),
            help: Some(format!("Export {} or pass the matching flag", key)),
        }),
    }
}

fn check_version(key: &str, version: &str) -> Result<(), ProvisionError> {
    let re = regex::Regex::new(r"^\d+(\.\d+)+$").map_err(|e| ProvisionError::config(e.to_string()))?;
    if re.is_match(version) {
        Ok(())
    } else {
        Err(ProvisionError::config(format!(
            "{}='{}' is not a dotted version number",
            key, version
        )))
    }
}

fn check_channel(channel: &str) -> Result<(), ProvisionError> {
    let re = regex::Regex::new(r"^((stable|beta|nightly)(-\d{4}-\d{2}-\d{2})?|\d+\.\d+(\.\d+)?)$")
        .map_err(|e| ProvisionError::config(e.to_string()))?;
    if re.is_match(channel) {
        Ok(())
    } else {
        Err(ProvisionError::config(format!(
            "{}='{}' is not a toolchain channel",
            keys::TOOLCHAIN_CHANNEL,
            channel
        )))
    }
}

fn check_sdk_url(
    url: &str,
    distro_id: &str,
    vars: &BTreeMap<&'static str, String>,
) -> Result<String, ProvisionError> {
    let url = expand(url, vars, &[])?;

    if !url.starts_with("https://") {
        return Err(ProvisionError::Configuration {
            reason: format!("{}='{}' must be an https:// URL", keys::SDK_URL, url),
            help: None,
        });
    }

    let re = regex::Regex::new(r"(ubuntu\d{2}\.\d{2}|debian\d{1,2})")
        .map_err(|e| ProvisionError::config(e.to_string()))?;
    if let Some(found) = re.find_iter(&url).map(|m| m.as_str()).find(|id| *id != distro_id) {
        return Err(ProvisionError::Configuration {
            reason: format!(
                "{} targets '{}' but the codename resolves to '{}'",
                keys::SDK_URL,
                found,
                distro_id
            ),
            help: Some("Pick the installer built for the target distribution".into()),
        });
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Manifest;

    fn raw(pairs: &[(&str, &str)]) -> RawConfig {
        RawConfig::from_vars(pairs.iter().map(|(k, v)| (*k, v.to_string())))
    }

    fn focal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TEE_CODENAME", "focal"),
            ("SGX_VERSION", "2.15"),
            ("DCAP_VERSION", "1.12.1"),
            ("SGX_SDK_URL", "https://example/sdk-2.15.bin"),
        ]
    }

    #[test]
    fn test_resolves_defaults() {
        let profile = ProfileResolver::resolve(&raw(&focal()), &Manifest::builtin()).unwrap();

        assert_eq!(profile.os_family(), OsFamily::DebianLike);
        assert_eq!(profile.distro_id(), "ubuntu20.04");
        assert_eq!(profile.arch(), "x86_64");
        assert_eq!(profile.toolchain_channel(), "nightly");
        assert_eq!(profile.mode("sdk"), Some(AcquisitionMode::Prebuilt));
        assert_eq!(profile.sdk_url(), Some("https://example/sdk-2.15.bin"));
    }

    #[test]
    fn test_mode_aliases() {
        let mut pairs = focal();
        pairs.push(("SDK_DIST", "SELF_BUILT"));
        pairs.push(("BINUTILS_DIST", "INTEL_BUILT"));

        let profile = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap();
        assert_eq!(profile.mode("sdk"), Some(AcquisitionMode::SourceBuild));
        assert_eq!(profile.mode("binutils"), Some(AcquisitionMode::Prebuilt));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let mut pairs = focal();
        pairs.push(("SDK_DIST", "vendor"));

        let err = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap_err();
        assert!(err.to_string().contains("SDK_DIST='vendor'"));
    }

    #[test]
    fn test_selector_for_unknown_stage_is_rejected() {
        let mut pairs = focal();
        pairs.push(("KERNEL_DIST", "prebuilt"));

        let err = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap_err();
        assert!(err.to_string().contains("KERNEL_DIST"));
    }

    #[test]
    fn test_unknown_codename_is_rejected() {
        let mut pairs = focal();
        pairs[0] = ("TEE_CODENAME", "trusty");

        let err = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration { .. }));
        assert!(err.to_string().contains("trusty"));
    }

    #[test]
    fn test_unknown_os_family_is_rejected() {
        let mut pairs = focal();
        pairs.push(("TEE_OS_FAMILY", "redhat"));

        let err = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap_err();
        assert!(err.to_string().contains("redhat"));
    }

    #[test]
    fn test_url_for_other_distribution_is_rejected() {
        let mut pairs = focal();
        pairs[3] = (
            "SGX_SDK_URL",
            "https://download.01.org/intel-sgx/sgx-linux/2.15/distro/ubuntu18.04-server/sdk.bin",
        );

        let err = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap_err();
        assert!(err.to_string().contains("ubuntu18.04"));
    }

    #[test]
    fn test_url_template_is_expanded() {
        let mut pairs = focal();
        pairs[3] = (
            "SGX_SDK_URL",
            "https://download.01.org/intel-sgx/sgx-linux/{version}/distro/{distro_id}-server/sdk.bin",
        );

        let profile = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap();
        assert_eq!(
            profile.sdk_url(),
            Some("https://download.01.org/intel-sgx/sgx-linux/2.15/distro/ubuntu20.04-server/sdk.bin")
        );
    }

    #[test]
    fn test_plain_http_url_is_rejected() {
        let mut pairs = focal();
        pairs[3] = ("SGX_SDK_URL", "http://example/sdk.bin");

        assert!(ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).is_err());
    }

    #[test]
    fn test_prebuilt_sdk_requires_url() {
        let pairs: Vec<_> = focal().into_iter().filter(|(k, _)| *k != "SGX_SDK_URL").collect();

        let err = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap_err();
        assert!(err.to_string().contains("SGX_SDK_URL"));
    }

    #[test]
    fn test_source_sdk_does_not_require_url() {
        let pairs = vec![
            ("TEE_CODENAME", "bionic"),
            ("SGX_VERSION", "2.15"),
            ("DCAP_VERSION", "1.12.1"),
            ("SDK_DIST", "source"),
        ];

        let profile = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap();
        assert_eq!(profile.sdk_url(), None);
        assert_eq!(profile.distro_id(), "ubuntu18.04");
    }

    #[test]
    fn test_bad_versions_are_rejected() {
        let mut pairs = focal();
        pairs[1] = ("SGX_VERSION", "latest");
        assert!(ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).is_err());

        let mut pairs = focal();
        pairs.push(("RUST_TOOLCHAIN", "nightly-2022"));
        assert!(ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).is_err());
    }

    #[test]
    fn test_dated_channel_is_accepted() {
        let mut pairs = focal();
        pairs.push(("RUST_TOOLCHAIN", "nightly-2022-02-23"));

        let profile = ProfileResolver::resolve(&raw(&pairs), &Manifest::builtin()).unwrap();
        assert_eq!(profile.template_vars()["channel"], "nightly-2022-02-23");
    }

    #[test]
    fn test_mode_key_from_stage_name() {
        assert_eq!(mode_key("sdk"), "SDK_DIST");
        assert_eq!(mode_key("rust-toolchain"), "RUST_TOOLCHAIN_DIST");
    }
}
