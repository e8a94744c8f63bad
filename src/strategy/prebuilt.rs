// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Prebuilt acquisition
//!
//! Downloads a versioned vendor artifact and runs its installer with the
//! pinned answers.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::io::AsyncWriteExt;

use super::{fill_answers, fill_command, InstallSnapshot, run_installer, Provisioner, ProvisioningResult, StageContext};
use crate::errors::ProvisionError;
use crate::pipeline::{AcquisitionStrategy, PrebuiltStrategy, Stage};
use crate::profile::AcquisitionMode;
use crate::utils::create_download_bar;

/// Download-and-install provisioner
pub struct PrebuiltProvisioner {
    client: reqwest::Client,
}

impl PrebuiltProvisioner {
    /// Create a new prebuilt provisioner
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Download `url` into `dest_dir` and return the local artifact path.
    ///
    /// Not retried. The file only appears under its final name once the
    /// whole body arrived and, when `expected_blake3` is given, matched it.
    pub async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        expected_blake3: Option<&str>,
        show_progress: bool,
    ) -> Result<PathBuf, ProvisionError> {
        let download_error = |reason: String, http_status: Option<u16>| ProvisionError::Download {
            url: url.to_string(),
            reason,
            http_status,
        };

        tokio::fs::create_dir_all(dest_dir).await?;
        let name = artifact_name(url);
        let dest = dest_dir.join(&name);
        let part = dest_dir.join(format!("{}.part", name));

        tracing::info!(url = %url, "fetching artifact");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string(), e.status().map(|s| s.as_u16())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("HTTP {}", status), Some(status.as_u16())));
        }

        let bar = show_progress.then(|| create_download_bar(response.content_length(), &name));
        let mut file = tokio::fs::File::create(&part).await?;
        let mut hasher = blake3::Hasher::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_error(e.to_string(), None))?
        {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            if let Some(ref bar) = bar {
                bar.inc(chunk.len() as u64);
            }
        }
        file.flush().await?;
        drop(file);

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        if let Some(expected) = expected_blake3 {
            let actual = hasher.finalize().to_hex();
            if !actual.as_str().eq_ignore_ascii_case(expected) {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(download_error(
                    format!("BLAKE3 mismatch: expected {}, got {}", expected, actual),
                    None,
                ));
            }
        }

        tokio::fs::rename(&part, &dest).await?;
        tracing::debug!(url = %url, artifact = %dest.display(), "artifact downloaded");
        Ok(dest)
    }

    /// Run the downloaded artifact's installer into the stage's install root
    pub async fn install(
        &self,
        stage: &Stage,
        strategy: &PrebuiltStrategy,
        artifact: &Path,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let start = Instant::now();

        tokio::fs::create_dir_all(&stage.install_root).await?;
        let snapshot = InstallSnapshot::take(&stage.install_root);
        make_executable(artifact)?;

        let runtime = [("artifact", artifact.to_string_lossy().to_string())];
        let command = fill_command(&strategy.command, &runtime)?;
        let answers = fill_answers(&strategy.answers, &runtime)?;

        tracing::info!(stage = %stage.name, artifact = %artifact.display(), "running installer");
        run_installer(&command, &answers, strategy.prompt_timeout, artifact.parent()).await?;

        Ok(ProvisioningResult::success(
            stage,
            snapshot.installed(),
            start.elapsed(),
        ))
    }
}

impl Default for PrebuiltProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provisioner for PrebuiltProvisioner {
    fn mode(&self) -> AcquisitionMode {
        AcquisitionMode::Prebuilt
    }

    async fn provision(&self, stage: &Stage, ctx: &StageContext) -> Result<ProvisioningResult, ProvisionError> {
        let AcquisitionStrategy::Prebuilt(strategy) = &stage.strategy else {
            return Err(ProvisionError::config(format!(
                "stage '{}' is not a prebuilt stage",
                stage.name
            )));
        };

        let start = Instant::now();
        let artifact = self
            .fetch(
                &strategy.artifact_url,
                &ctx.download_dir.join(&stage.name),
                strategy.blake3.as_deref(),
                ctx.show_progress,
            )
            .await?;

        let mut result = self.install(stage, strategy, &artifact).await?;
        result.duration = start.elapsed();
        Ok(result)
    }

    async fn check_available(&self) -> Result<bool, ProvisionError> {
        // Only needs the network and the artifact itself
        Ok(true)
    }

    fn validate_stage(&self, stage: &Stage) -> Result<(), ProvisionError> {
        let AcquisitionStrategy::Prebuilt(strategy) = &stage.strategy else {
            return Err(ProvisionError::config(format!(
                "stage '{}' is not a prebuilt stage",
                stage.name
            )));
        };

        if strategy.command.is_empty() {
            return Err(ProvisionError::config(format!(
                "stage '{}' has an empty installer command",
                stage.name
            )));
        }

        if !strategy.artifact_url.starts_with("https://") && !strategy.artifact_url.starts_with("http://") {
            return Err(ProvisionError::config(format!(
                "stage '{}' has an invalid artifact URL '{}'",
                stage.name, strategy.artifact_url
            )));
        }

        Ok(())
    }
}

/// File name for a downloaded URL
fn artifact_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .unwrap_or("artifact")
        .to_string()
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), ProvisionError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::InstallAnswer;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    const INSTALLER: &str = "#!/bin/bash\nprintf 'Install directory: '\nread dir || exit 1\nmkdir -p \"$dir/bin\"\necho 'export TOOL_HOME=1' > \"$dir/environment\"\n";

    fn stage(root: &Path, url: String) -> Stage {
        Stage {
            name: "tool".into(),
            description: None,
            depends_on: vec![],
            install_root: root.to_path_buf(),
            environment: root.join("environment"),
            exports: BTreeMap::new(),
            strategy: AcquisitionStrategy::Prebuilt(PrebuiltStrategy {
                artifact_url: url,
                blake3: None,
                command: vec!["bash".into(), "{artifact}".into()],
                answers: vec![InstallAnswer {
                    expect: Some("Install directory:".into()),
                    reply: root.to_string_lossy().to_string(),
                }],
                prompt_timeout: Duration::from_secs(10),
            }),
        }
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(
            artifact_name("https://download.01.org/intel-sgx/sgx-linux/2.15/as.ld.objdump.r4.tar.gz"),
            "as.ld.objdump.r4.tar.gz"
        );
        assert_eq!(artifact_name("https://sh.rustup.rs"), "sh.rustup.rs");
        assert_eq!(artifact_name("https://example/sdk.bin?token=1"), "sdk.bin");
    }

    #[tokio::test]
    async fn test_fetch_writes_artifact() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sdk-2.15.bin")
            .with_status(200)
            .with_body(INSTALLER)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let url = format!("{}/sdk-2.15.bin", server.url());
        let digest = blake3::hash(INSTALLER.as_bytes()).to_hex().to_string();

        let path = PrebuiltProvisioner::new()
            .fetch(&url, dir.path(), Some(&digest), false)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(path, dir.path().join("sdk-2.15.bin"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), INSTALLER);
    }

    #[tokio::test]
    async fn test_fetch_non_2xx_is_download_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.bin")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let url = format!("{}/missing.bin", server.url());
        let err = PrebuiltProvisioner::new()
            .fetch(&url, dir.path(), None, false)
            .await
            .unwrap_err();

        // Exactly one request: downloads are not retried
        mock.assert_async().await;
        assert!(matches!(err, ProvisionError::Download { http_status: Some(404), .. }));
        assert!(!dir.path().join("missing.bin").exists());
    }

    #[tokio::test]
    async fn test_fetch_digest_mismatch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sdk.bin")
            .with_body("tampered")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let url = format!("{}/sdk.bin", server.url());
        let err = PrebuiltProvisioner::new()
            .fetch(&url, dir.path(), Some("00"), false)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("BLAKE3 mismatch"));
        assert!(!dir.path().join("sdk.bin").exists());
    }

    #[tokio::test]
    async fn test_fetch_transport_failure() {
        let dir = TempDir::new().unwrap();
        let err = PrebuiltProvisioner::new()
            .fetch("http://127.0.0.1:1/sdk.bin", dir.path(), None, false)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Download { http_status: None, .. }));
    }

    #[tokio::test]
    async fn test_provision_downloads_and_installs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tool.bin")
            .with_body(INSTALLER)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let root = dir.path().join("opt/tool");
        let stage = stage(&root, format!("{}/tool.bin", server.url()));
        let ctx = StageContext::new(&dir.path().join("work"));

        let provisioner = PrebuiltProvisioner::new();
        provisioner.validate_stage(&stage).unwrap();
        let result = provisioner.provision(&stage, &ctx).await.unwrap();

        assert!(result.is_success());
        assert!(result.artifacts_installed.contains(&root.join("bin")));
        assert!(root.join("environment").is_file());
        assert!(ctx.download_dir.join("tool/tool.bin").is_file());
    }
}
