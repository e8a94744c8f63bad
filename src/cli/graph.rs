// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Graph command - visualize stage dependencies

use miette::Result;
use std::path::PathBuf;

use super::GraphFormat;
use crate::pipeline::{DagBuilder, Manifest};

/// Run the graph command
pub async fn run(manifest_path: Option<PathBuf>, format: GraphFormat) -> Result<()> {
    let manifest = Manifest::load(manifest_path.as_deref())?;
    let dag = DagBuilder::build(&manifest)?;

    let output = match format {
        GraphFormat::Text => dag.to_text(&manifest)?,
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    print!("{}", output);

    Ok(())
}
