// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Profile command - show the resolved distribution profile

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use super::{OutputFormat, ProfileArgs};
use crate::pipeline::Manifest;
use crate::profile::{mode_key, ProfileResolver};
use crate::utils::{print_header, print_section};

/// Run the profile command
pub async fn run(manifest_path: Option<PathBuf>, format: OutputFormat, profile_args: ProfileArgs) -> Result<()> {
    let manifest = Manifest::load(manifest_path.as_deref())?;
    let profile = ProfileResolver::resolve(&profile_args.to_raw()?, &manifest)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&profile).into_diagnostic()?);
        return Ok(());
    }

    print_header("Distribution profile");
    println!("  OS family:           {}", profile.os_family());
    println!("  Codename:            {} ({})", profile.codename(), profile.distro_id());
    println!("  Architecture:        {}", profile.arch());
    println!("  SGX version:         {}", profile.component_version());
    println!("  DCAP version:        {}", profile.attestation_version());
    println!("  Rust toolchain:      {}", profile.toolchain_channel());
    println!(
        "  SDK URL:             {}",
        profile.sdk_url().unwrap_or("(not set)")
    );

    print_section("Acquisition modes");
    for stage in &manifest.stages {
        if let Some(mode) = profile.mode(&stage.name) {
            println!(
                "  {:<10} {:<9} {}",
                stage.name,
                mode.to_string().cyan(),
                mode_key(&stage.name).dimmed()
            );
        }
    }

    Ok(())
}
