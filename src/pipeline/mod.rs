// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Pipeline definitions and types
//!
//! This module defines the stage manifest, the resolved stages built from
//! it, and the executor that runs them in dependency order.

mod dag;
mod definition;
mod executor;
mod stage;
mod validation;

pub use dag::DagBuilder;
pub use definition::*;
pub use executor::{
    exit_code_for, ExecutionOptions, Pipeline, PipelineExecutor, PipelineReport, PipelineState,
    StageFailure, StageRecord, StageState, GENERIC_FAILURE,
};
pub use stage::{AcquisitionStrategy, PrebuiltStrategy, SourceBuildStrategy, Stage};
pub use validation::{ManifestValidator, ValidationResult};
