// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Init command - write an editable copy of the built-in manifest

use colored::Colorize;
use miette::Result;
use std::path::Path;

use crate::pipeline::{Manifest, BUILTIN_MANIFEST, DEFAULT_MANIFEST_FILE};
use crate::utils::{print_info, print_success};

/// Run the init command
pub async fn run(force: bool, verbose: bool) -> Result<()> {
    let path = Path::new(DEFAULT_MANIFEST_FILE);

    println!("{}", "Initializing teeprov manifest...".bold());
    println!();

    if path.exists() && !force {
        return Err(miette::miette!(
            help = "Use --force to overwrite it",
            "{} already exists",
            DEFAULT_MANIFEST_FILE
        ));
    }

    std::fs::write(path, BUILTIN_MANIFEST)
        .map_err(|e| miette::miette!("Failed to write {}: {}", DEFAULT_MANIFEST_FILE, e))?;

    print_success(&format!("Created {}", DEFAULT_MANIFEST_FILE));

    if verbose {
        let manifest = Manifest::builtin();
        for stage in &manifest.stages {
            print_info(&format!("{} ({})", stage.name, stage.default_mode));
        }
    }

    println!();
    println!("Next steps:");
    println!("  1. Edit {} to pin versions and sources", DEFAULT_MANIFEST_FILE.cyan());
    println!("  2. Run {} to check the profile", "teeprov validate --codename focal".cyan());
    println!("  3. Run {} to provision", "teeprov provision".cyan());
    println!();

    Ok(())
}
