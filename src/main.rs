// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! teeprov - SGX build-environment provisioner

use clap::Parser;
use miette::Result;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teeprov::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "teeprov=debug" } else { "teeprov=info" };

    // Logs go to stderr so JSON reports on stdout stay parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    match cli.command {
        Commands::Provision {
            manifest,
            only,
            dry_run,
            format,
            profile,
        } => teeprov::cli::provision::run(manifest, only, dry_run, format, profile, cli.verbose).await,
        Commands::Validate { manifest, profile } => {
            teeprov::cli::validate::run(manifest, profile, cli.verbose).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Graph { manifest, format } => {
            teeprov::cli::graph::run(manifest, format).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Profile {
            manifest,
            format,
            profile,
        } => {
            teeprov::cli::profile::run(manifest, format, profile).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { force } => {
            teeprov::cli::init::run(force, cli.verbose).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
