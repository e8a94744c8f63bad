// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! # teeprov - SGX build-environment provisioner
//!
//! `teeprov` installs the toolchain needed to build SGX enclaves: binutils,
//! the SGX SDK, the platform software (PSW), the DCAP attestation libraries
//! and a Rust toolchain.
//!
//! Every stage can be acquired two ways:
//!
//! - **Prebuilt** - download a vendor installer and drive its prompts
//! - **Source** - check out a pinned ref, build it with make, install
//!
//! Stages run in dependency order. The first failure aborts the pipeline,
//! and its error maps to the process exit status.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show what would run on Ubuntu 20.04
//! teeprov provision --codename focal --dry-run
//!
//! # Provision, building the SDK from source
//! teeprov provision --codename focal --mode sdk=source
//!
//! # Re-run one stage
//! teeprov provision --codename focal --only dcap
//! ```

pub mod cli;
pub mod environment;
pub mod errors;
pub mod pipeline;
pub mod profile;
pub mod strategy;
pub mod utils;

// Re-export commonly used types
pub use errors::{ProvisionError, ProvisionResult};
pub use pipeline::{Pipeline, PipelineExecutor, PipelineReport, Stage};
pub use profile::{AcquisitionMode, DistributionProfile, ProfileResolver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
