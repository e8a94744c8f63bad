// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Provision command - run the pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::process::ExitCode;

use super::{OutputFormat, ProfileArgs};
use crate::errors::RecoverySuggestion;
use crate::pipeline::{ExecutionOptions, Manifest, Pipeline, PipelineExecutor};
use crate::profile::ProfileResolver;

/// Run the provisioning pipeline
pub async fn run(
    manifest_path: Option<PathBuf>,
    only: Option<String>,
    dry_run: bool,
    format: OutputFormat,
    profile_args: ProfileArgs,
    verbose: bool,
) -> Result<ExitCode> {
    let manifest = Manifest::load(manifest_path.as_deref())?;

    // Configuration errors are fatal before any stage runs
    let raw = profile_args.to_raw()?;
    let profile = ProfileResolver::resolve(&raw, &manifest)?;
    let pipeline = Pipeline::new(&manifest, profile)?;

    let text = format == OutputFormat::Text;
    let ctx = pipeline.context()?.with_progress(text && !dry_run);
    let options = ExecutionOptions {
        dry_run,
        only,
        quiet: !text,
    };

    let executor = PipelineExecutor::with_default_provisioners();
    let mut report = executor.execute(&pipeline, &ctx, &options).await?;

    if !text {
        println!("{}", report.to_json()?);
    } else if let Some(error) = report.error.take() {
        let stage = report
            .failure
            .as_ref()
            .map(|f| f.stage.clone())
            .unwrap_or_default();

        let suggestion = RecoverySuggestion::for_error(&error, &stage);

        if let Some(output) = error.tool_output() {
            eprintln!();
            eprintln!("{}", "Tool output (last lines):".dimmed());
            for line in output.lines() {
                eprintln!("  {}", line);
            }
        }

        eprintln!();
        eprintln!("{:?}", miette::Report::new(error));
        if let Some(suggestion) = suggestion {
            eprintln!("{}", suggestion);
        }
    } else if report.is_success() && !dry_run && verbose {
        println!();
        println!("{}:", "Persisted environment".bold());
        for (key, value) in &report.environment {
            println!("  {}={}", key.cyan(), value);
        }
    }

    let code = u8::try_from(report.exit_code).unwrap_or(1);
    Ok(ExitCode::from(code))
}
