// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Installed-file contract
//!
//! Every successful stage leaves an environment script under its install
//! root and appends one `source` line for it to the shared shell profile.
//! Once all stages succeed, the variables those scripts export are
//! persisted for later shell sessions.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::errors::ProvisionError;
use crate::pipeline::Stage;

/// Variables a shell sets on its own; never persisted
const SHELL_VARIABLES: &[&str] = &["_", "SHLVL", "PWD", "OLDPWD", "BASH_EXECUTION_STRING"];

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    let home = || directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());

    if path == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home() {
            return home.join(rest);
        }
    }

    PathBuf::from(path)
}

/// The shared shell profile stages register themselves in
#[derive(Debug, Clone)]
pub struct ShellProfile {
    path: PathBuf,
}

impl ShellProfile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The line registering `script`
    pub fn source_line(script: &Path) -> String {
        format!("source \"{}\"", shell_escape(&script.to_string_lossy()))
    }

    /// Append a `source` line for `script`. Duplicates are tolerated.
    pub fn append_source(&self, script: &Path) -> Result<(), ProvisionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ProvisionError::FileWriteError {
                path: self.path.clone(),
                error: e.to_string(),
            })?;

        writeln!(file, "{}", Self::source_line(script)).map_err(|e| {
            ProvisionError::FileWriteError {
                path: self.path.clone(),
                error: e.to_string(),
            }
        })?;

        tracing::debug!(profile = %self.path.display(), script = %script.display(), "registered environment script");
        Ok(())
    }

    /// All `source` lines currently in the profile, in file order
    pub fn sourced_scripts(&self) -> Result<Vec<PathBuf>, ProvisionError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| ProvisionError::FileReadError {
            path: self.path.clone(),
            error: e.to_string(),
        })?;

        Ok(content
            .lines()
            .filter_map(|line| line.trim().strip_prefix("source "))
            .map(|script| PathBuf::from(unquote(script.trim())))
            .collect())
    }
}

/// Whether `stage` left its environment script on disk
pub fn contract_holds(stage: &Stage) -> bool {
    stage.environment.is_file()
}

/// Make sure the stage's environment script exists.
///
/// Installers that ship their own script (the SGX SDK does) are left alone;
/// otherwise the script is written from the stage's `exports`.
pub fn ensure_environment_script(stage: &Stage) -> Result<PathBuf, ProvisionError> {
    if contract_holds(stage) {
        return Ok(stage.environment.clone());
    }

    if stage.exports.is_empty() {
        return Err(ProvisionError::ContractViolation {
            stage: stage.name.clone(),
            path: stage.environment.clone(),
        });
    }

    if let Some(parent) = stage.environment.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut script = String::new();
    for (key, value) in &stage.exports {
        script.push_str(&format!("export {}=\"{}\"\n", key, value));
    }

    std::fs::write(&stage.environment, script).map_err(|e| ProvisionError::FileWriteError {
        path: stage.environment.clone(),
        error: e.to_string(),
    })?;

    tracing::debug!(stage = %stage.name, script = %stage.environment.display(), "wrote environment script");
    Ok(stage.environment.clone())
}

/// Fulfil the installed-file contract for a freshly installed stage
pub fn commit(stage: &Stage, profile: &ShellProfile) -> Result<PathBuf, ProvisionError> {
    let script = ensure_environment_script(stage)?;
    profile.append_source(&script)?;
    Ok(script)
}

/// Persist the variables exported by `scripts` to `target`.
///
/// The scripts are sourced in order in a bash subshell; variables whose
/// value differs from a bare subshell are written as `export` lines. The
/// target is rewritten on every call.
pub async fn finalize(
    scripts: &[PathBuf],
    target: &Path,
) -> Result<BTreeMap<String, String>, ProvisionError> {
    which::which("bash").map_err(|_| ProvisionError::tool_not_found("bash"))?;

    let baseline = capture_environment(&[]).await?;
    let sourced = capture_environment(scripts).await?;

    let changed: BTreeMap<String, String> = sourced
        .into_iter()
        .filter(|(key, _)| !SHELL_VARIABLES.contains(&key.as_str()))
        .filter(|(key, value)| baseline.get(key) != Some(value))
        .collect();

    let mut content = String::from("# Generated by teeprov; rewritten on every successful run\n");
    for (key, value) in &changed {
        content.push_str(&format!("export {}=\"{}\"\n", key, shell_escape(value)));
    }

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = target.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(|e| ProvisionError::FileWriteError {
        path: tmp.clone(),
        error: e.to_string(),
    })?;
    std::fs::rename(&tmp, target).map_err(|e| ProvisionError::FileWriteError {
        path: target.to_path_buf(),
        error: e.to_string(),
    })?;

    tracing::info!(file = %target.display(), variables = changed.len(), "persisted environment");
    Ok(changed)
}

/// Run `env -0` after sourcing `scripts` and parse the result
async fn capture_environment(scripts: &[PathBuf]) -> Result<BTreeMap<String, String>, ProvisionError> {
    let mut command = String::from("set -a; ");
    for (i, script) in scripts.iter().enumerate() {
        command.push_str(&format!(
            "source \"{}\" || exit {}; ",
            shell_escape(&script.to_string_lossy()),
            100 + i
        ));
    }
    command.push_str("env -0");

    let output = Command::new("bash")
        .arg("--noprofile")
        .arg("--norc")
        .arg("-c")
        .arg(&command)
        .output()
        .await
        .map_err(|e| ProvisionError::Finalization {
            reason: format!("could not start bash: {}", e),
            status: None,
        })?;

    if !output.status.success() {
        let status = output.status.code();
        let failed = status
            .and_then(|code| usize::try_from(code - 100).ok())
            .and_then(|i| scripts.get(i))
            .map(|script| format!("sourcing {} failed", script.display()))
            .unwrap_or_else(|| "environment capture failed".to_string());

        return Err(ProvisionError::Finalization {
            reason: format!("{}: {}", failed, String::from_utf8_lossy(&output.stderr).trim()),
            status,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .split('\0')
        .filter_map(|entry| entry.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect())
}

/// Escape a value for use inside double quotes
fn shell_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Undo [`shell_escape`] on a double-quoted word; bare words pass through
fn unquote(word: &str) -> String {
    let Some(inner) = word.strip_prefix('"').and_then(|w| w.strip_suffix('"')) else {
        return word.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}
