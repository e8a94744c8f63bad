// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Validate command - check the manifest and profile

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::ProfileArgs;
use crate::pipeline::{Manifest, ManifestValidator, Pipeline};
use crate::profile::{keys, ProfileResolver};
use crate::utils::{print_error, print_section, print_success, print_warning};

/// Run the validate command
pub async fn run(manifest_path: Option<PathBuf>, profile_args: ProfileArgs, verbose: bool) -> Result<()> {
    println!("{}", "Validating manifest...".bold());
    println!();

    let manifest = match Manifest::load(manifest_path.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            print_error("Failed to load manifest");
            println!();
            return Err(e.into());
        }
    };

    print_success(&format!("Manifest parsed ({} stages)", manifest.stages.len()));

    let mut validation = ManifestValidator::validate(&manifest);

    // The profile can only be checked once a target is configured
    if validation.is_valid() {
        if profile_args.is_configured() {
            match profile_args
                .to_raw()
                .and_then(|raw| ProfileResolver::resolve(&raw, &manifest))
                .and_then(|profile| Pipeline::new(&manifest, profile))
            {
                Ok(pipeline) => {
                    print_success(&format!(
                        "Profile resolved for {} ({})",
                        pipeline.profile().codename(),
                        pipeline.profile().distro_id()
                    ));
                }
                Err(e) => validation.add_error(&e.to_string()),
            }
        } else {
            validation.add_warning(&format!(
                "Profile not checked: {} is not set",
                keys::CODENAME
            ));
        }
    }

    if !validation.errors.is_empty() {
        print_section("Errors");
        for error in &validation.errors {
            print_error(error);
        }
    }

    if !validation.warnings.is_empty() {
        print_section("Warnings");
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose {
        print_section("Manifest summary");
        println!("  Name: {}", manifest.name);
        println!("  Stages: {}", manifest.stages.len());
        for stage in &manifest.stages {
            let deps = if stage.depends_on.is_empty() {
                String::new()
            } else {
                format!(" [depends: {}]", stage.depends_on.join(", "))
            };
            println!("    - {} ({}){}", stage.name, stage.default_mode, deps.dimmed());
        }
    }

    println!();

    if !validation.is_valid() {
        Err(miette::miette!("Manifest validation failed"))
    } else if validation.has_warnings() {
        println!("{}", "Manifest is valid but has warnings.".yellow().bold());
        Ok(())
    } else {
        println!("{}", "Manifest is valid!".green().bold());
        Ok(())
    }
}
