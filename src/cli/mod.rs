// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for teeprov.

pub mod graph;
pub mod init;
pub mod profile;
pub mod provision;
pub mod validate;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::errors::ProvisionError;
use crate::profile::{keys, mode_key, RawConfig};

/// SGX build-environment provisioner
///
/// Installs binutils, the SGX SDK, PSW, DCAP and a Rust toolchain, each from
/// a prebuilt vendor artifact or from pinned sources.
#[derive(Parser, Debug)]
#[clap(
    name = "teeprov",
    version,
    about = "Provision a reproducible SGX enclave build environment",
    long_about = None,
    after_help = "Examples:\n\
        teeprov profile --codename focal        Show the resolved profile\n\
        teeprov provision --dry-run             Show the execution plan\n\
        teeprov provision --mode sdk=source     Build the SDK from source\n\
        teeprov provision --only psw            Re-run a single stage\n\n\
        See 'teeprov <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the provisioning pipeline
    Provision {
        /// Stage manifest (defaults to .teeprov.yaml, then the built-in manifest)
        #[clap(short, long)]
        manifest: Option<PathBuf>,

        /// Re-run only this stage; its dependencies must already be installed
        #[clap(long, value_name = "STAGE")]
        only: Option<String>,

        /// Dry run (show what would be done)
        #[clap(long)]
        dry_run: bool,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        #[clap(flatten)]
        profile: ProfileArgs,
    },

    /// Validate the stage manifest and, when configured, the profile
    Validate {
        /// Stage manifest
        #[clap(short, long)]
        manifest: Option<PathBuf>,

        #[clap(flatten)]
        profile: ProfileArgs,
    },

    /// Show stage dependencies as a graph
    Graph {
        /// Stage manifest
        #[clap(short, long)]
        manifest: Option<PathBuf>,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Show the resolved distribution profile
    Profile {
        /// Stage manifest
        #[clap(short, long)]
        manifest: Option<PathBuf>,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        #[clap(flatten)]
        profile: ProfileArgs,
    },

    /// Write the built-in manifest to .teeprov.yaml
    Init {
        /// Overwrite an existing manifest
        #[clap(long)]
        force: bool,
    },
}

/// Distribution profile settings; each falls back to its environment variable
#[derive(Args, Debug, Clone, Default)]
pub struct ProfileArgs {
    /// OS family
    #[clap(long, env = "TEE_OS_FAMILY")]
    pub os_family: Option<String>,

    /// Distribution codename (bionic, focal, jammy, buster, bullseye, bookworm)
    #[clap(long, env = "TEE_CODENAME")]
    pub codename: Option<String>,

    /// Target architecture
    #[clap(long, env = "TEE_ARCH")]
    pub arch: Option<String>,

    /// SGX SDK/PSW version
    #[clap(long, env = "SGX_VERSION")]
    pub sgx_version: Option<String>,

    /// DCAP version
    #[clap(long, env = "DCAP_VERSION")]
    pub dcap_version: Option<String>,

    /// URL of the prebuilt SDK installer
    #[clap(long, env = "SGX_SDK_URL")]
    pub sdk_url: Option<String>,

    /// Rust toolchain channel
    #[clap(long, env = "RUST_TOOLCHAIN")]
    pub rust_toolchain: Option<String>,

    /// Acquisition mode for a stage, e.g. sdk=source (overrides <STAGE>_DIST)
    #[clap(long = "mode", value_name = "STAGE=MODE")]
    pub modes: Vec<String>,
}

impl ProfileArgs {
    /// Raw configuration from the environment, overridden by these flags
    pub fn to_raw(&self) -> Result<RawConfig, ProvisionError> {
        let mut raw = RawConfig::from_env();

        let overrides = [
            (&mut raw.os_family, &self.os_family),
            (&mut raw.codename, &self.codename),
            (&mut raw.arch, &self.arch),
            (&mut raw.component_version, &self.sgx_version),
            (&mut raw.attestation_version, &self.dcap_version),
            (&mut raw.sdk_url, &self.sdk_url),
            (&mut raw.toolchain_channel, &self.rust_toolchain),
        ];
        for (field, value) in overrides {
            if value.is_some() {
                field.clone_from(value);
            }
        }

        for selector in &self.modes {
            let (stage, mode) = selector.split_once('=').ok_or_else(|| ProvisionError::Configuration {
                reason: format!("invalid --mode '{}'", selector),
                help: Some(format!(
                    "Use STAGE=MODE, e.g. --mode sdk=source (same as {}=source)",
                    mode_key("sdk")
                )),
            })?;
            raw.modes.insert(mode_key(stage.trim()), mode.trim().to_string());
        }

        Ok(raw)
    }

    /// Whether enough is configured to attempt profile resolution
    pub fn is_configured(&self) -> bool {
        self.codename.is_some() || std::env::var(keys::CODENAME).is_ok()
    }
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}
