// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Canned-answer installer driver
//!
//! Vendor installers ask a fixed sequence of questions on stdout and read
//! the replies from stdin. The driver waits for each expected prompt, sends
//! the pinned reply, and treats any drift between the installer's prompts
//! and the pinned answers as an [`ProvisionError::InstallerProtocol`].

use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::errors::ProvisionError;
use crate::pipeline::InstallAnswer;
use crate::strategy::tail;

/// What an installer printed while being driven
#[derive(Debug, Clone, Default)]
pub struct InstallerOutput {
    pub stdout: String,
    pub stderr: String,
    /// Number of replies written to the installer
    pub answered: usize,
}

/// Run `command`, answering its prompts in order.
///
/// An answer without `expect` is written immediately; otherwise the driver
/// waits up to `prompt_timeout` for output matching the pattern. After the
/// last answer stdin is closed and the installer must finish on its own.
pub async fn run_installer(
    command: &[String],
    answers: &[InstallAnswer],
    prompt_timeout: Duration,
    cwd: Option<&Path>,
) -> Result<InstallerOutput, ProvisionError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| ProvisionError::config("installer command is empty"))?;

    let patterns = answers
        .iter()
        .map(|answer| {
            answer
                .expect
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| ProvisionError::config(format!("invalid prompt pattern: {}", e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| ProvisionError::InstallFailed {
        installer: program.clone(),
        status: None,
        stderr: e.to_string(),
    })?;

    let (Some(mut stdin), Some(mut stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(ProvisionError::InstallFailed {
            installer: program.clone(),
            status: None,
            stderr: "installer stdio was not captured".into(),
        });
    };
    let stderr_task = tokio::spawn(read_all(stderr));

    let protocol = |reason: String, answered: usize| ProvisionError::InstallerProtocol {
        installer: program.clone(),
        reason,
        answered,
        expected: answers.len(),
    };

    let mut transcript = String::new();
    // Output since the last reply that no prompt has consumed yet
    let mut pending = String::new();
    let mut chunk = vec![0u8; 4096];

    for (i, (answer, pattern)) in answers.iter().zip(&patterns).enumerate() {
        if let Some(pattern) = pattern {
            loop {
                if let Some(m) = pattern.find(&pending) {
                    pending = pending[m.end()..].to_string();
                    break;
                }

                match tokio::time::timeout(prompt_timeout, stdout.read(&mut chunk)).await {
                    Err(_) => {
                        kill(&mut child).await;
                        return Err(protocol(
                            format!(
                                "timed out after {}s waiting for prompt '{}'",
                                prompt_timeout.as_secs(),
                                pattern.as_str()
                            ),
                            i,
                        ));
                    }
                    Ok(Ok(0)) => {
                        let status = child.wait().await.ok().and_then(|s| s.code());
                        return Err(protocol(
                            format!(
                                "installer exited{} before prompt '{}'",
                                status.map(|c| format!(" with status {}", c)).unwrap_or_default(),
                                pattern.as_str()
                            ),
                            i,
                        ));
                    }
                    Ok(Ok(n)) => {
                        let text = String::from_utf8_lossy(&chunk[..n]);
                        transcript.push_str(&text);
                        pending.push_str(&text);
                    }
                    Ok(Err(e)) => return Err(e.into()),
                }
            }
        }

        tracing::debug!(installer = %program, answer = i + 1, "sending pinned reply");
        let line = format!("{}\n", answer.reply);
        if let Err(e) = write_reply(&mut stdin, &line).await {
            kill(&mut child).await;
            return Err(protocol(format!("installer stopped reading input: {}", e), i));
        }
        // The rest of the answered prompt line is not a new question
        pending.clear();
    }

    // No more answers; the installer sees EOF on its next read
    drop(stdin);

    loop {
        match tokio::time::timeout(prompt_timeout, stdout.read(&mut chunk)).await {
            // Silence is only a problem while an unanswered question is showing
            Err(_) if looks_like_prompt(&last_line(&pending)) => {
                kill(&mut child).await;
                return Err(protocol(
                    format!(
                        "installer still waiting after all {} pinned answers: '{}'",
                        answers.len(),
                        last_line(&pending)
                    ),
                    answers.len(),
                ));
            }
            Err(_) => {
                tracing::debug!(installer = %program, "installer quiet, still running");
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let text = String::from_utf8_lossy(&chunk[..n]);
                transcript.push_str(&text);
                pending.push_str(&text);
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    let status = child.wait().await?;
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        let prompt = last_line(&pending);
        if looks_like_prompt(&prompt) {
            return Err(protocol(
                format!("installer asked for more input than pinned: '{}'", prompt),
                answers.len(),
            ));
        }

        return Err(ProvisionError::InstallFailed {
            installer: program.clone(),
            status: status.code(),
            stderr: tail(&stderr, 20),
        });
    }

    Ok(InstallerOutput {
        stdout: transcript,
        stderr,
        answered: answers.len(),
    })
}

async fn write_reply(stdin: &mut tokio::process::ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn read_all(mut stream: impl AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).to_string()
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill installer");
    }
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Installers end their questions with `?`, `:` or a `[choices]` bracket.
/// A bare `:` is the tail of an already answered prompt, not a question.
fn looks_like_prompt(line: &str) -> bool {
    (line.ends_with('?') || line.ends_with(':') || line.ends_with(']'))
        && line.chars().any(char::is_alphabetic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SDK_LIKE_INSTALLER: &str = r#"#!/bin/bash
printf 'Do you want to install in current directory? [yes/no] : '
read answer || exit 1
[ "$answer" = "no" ] || exit 3
printf '\nPlease input the directory which you want to install in : '
read dir || exit 1
mkdir -p "$dir/sgxsdk"
echo "export SGX_SDK=$dir/sgxsdk" > "$dir/sgxsdk/environment"
echo "Installation is successful!"
"#;

    fn script(dir: &TempDir, name: &str, body: &str) -> Vec<String> {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        vec!["bash".into(), path.to_string_lossy().to_string()]
    }

    fn sdk_answers(install_root: &Path) -> Vec<InstallAnswer> {
        vec![
            InstallAnswer {
                expect: Some(r"\[yes/no\]".into()),
                reply: "no".into(),
            },
            InstallAnswer {
                expect: Some("directory which you want to install in".into()),
                reply: install_root.to_string_lossy().to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_pinned_answers_drive_installer() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("opt");
        let command = script(&dir, "installer.bin", SDK_LIKE_INSTALLER);

        let output = run_installer(&command, &sdk_answers(&root), Duration::from_secs(10), None)
            .await
            .unwrap();

        assert_eq!(output.answered, 2);
        assert!(output.stdout.contains("Installation is successful!"));
        assert!(root.join("sgxsdk/environment").is_file());
    }

    #[tokio::test]
    async fn test_too_few_answers_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let command = script(&dir, "installer.bin", SDK_LIKE_INSTALLER);
        let answers = sdk_answers(dir.path())[..1].to_vec();

        let err = run_installer(&command, &answers, Duration::from_secs(10), None)
            .await
            .unwrap_err();

        match err {
            ProvisionError::InstallerProtocol { answered, expected, reason, .. } => {
                assert_eq!((answered, expected), (1, 1));
                assert!(reason.contains("directory which you want to install in"));
            }
            other => panic!("Expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unexpected_prompt_times_out() {
        let dir = TempDir::new().unwrap();
        let command = script(
            &dir,
            "installer.bin",
            "#!/bin/bash\nprintf 'Accept the license? [y/N] '\nread answer\n",
        );

        let err = run_installer(&command, &sdk_answers(dir.path()), Duration::from_secs(1), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::InstallerProtocol { answered: 0, expected: 2, .. }));
    }

    #[tokio::test]
    async fn test_installer_exiting_early_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let command = script(&dir, "installer.bin", "#!/bin/bash\necho 'nothing to ask'\n");

        let err = run_installer(&command, &sdk_answers(dir.path()), Duration::from_secs(5), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::InstallerProtocol { answered: 0, .. }));
        assert!(err.to_string().contains("before prompt"));
    }

    #[tokio::test]
    async fn test_failing_installer_keeps_exit_status() {
        let dir = TempDir::new().unwrap();
        let command = script(
            &dir,
            "installer.bin",
            "#!/bin/bash\necho 'disk full' >&2\nexit 7\n",
        );

        let err = run_installer(&command, &[], Duration::from_secs(5), None)
            .await
            .unwrap_err();

        match err {
            ProvisionError::InstallFailed { status, stderr, .. } => {
                assert_eq!(status, Some(7));
                assert_eq!(stderr, "disk full");
            }
            other => panic!("Expected install failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_after_last_answer_keeps_exit_status() {
        let dir = TempDir::new().unwrap();
        let command = script(
            &dir,
            "installer.bin",
            "#!/bin/bash\n\
             printf 'Please input the directory which you want to install in : '\n\
             read dir || exit 1\n\
             echo 'No space left on device' >&2\n\
             exit 7\n",
        );
        let answers = sdk_answers(dir.path())[1..].to_vec();

        let err = run_installer(&command, &answers, Duration::from_secs(5), None)
            .await
            .unwrap_err();

        assert_eq!(err.exit_status(), Some(7));
        match err {
            ProvisionError::InstallFailed { status, stderr, .. } => {
                assert_eq!(status, Some(7));
                assert_eq!(stderr, "No space left on device");
            }
            other => panic!("Expected install failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quiet_phase_after_last_answer_is_waited_out() {
        let dir = TempDir::new().unwrap();
        let command = script(
            &dir,
            "installer.bin",
            "#!/bin/bash\n\
             printf 'Please input the directory which you want to install in : '\n\
             read dir || exit 1\n\
             sleep 3\n\
             echo 'Unpacking done'\n",
        );
        let answers = sdk_answers(dir.path())[1..].to_vec();

        let output = run_installer(&command, &answers, Duration::from_secs(1), None)
            .await
            .unwrap();

        assert_eq!(output.answered, 1);
        assert!(output.stdout.contains("Unpacking done"));
    }

    #[tokio::test]
    async fn test_question_after_last_answer_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let command = script(
            &dir,
            "installer.bin",
            "#!/bin/bash\n\
             printf 'Please input the directory which you want to install in : '\n\
             read dir || exit 1\n\
             printf 'Install the optional samples? [yes/no] '\n\
             read samples || exit 4\n",
        );
        let answers = sdk_answers(dir.path())[1..].to_vec();

        let err = run_installer(&command, &answers, Duration::from_secs(5), None)
            .await
            .unwrap_err();

        match err {
            ProvisionError::InstallerProtocol { answered, reason, .. } => {
                assert_eq!(answered, 1);
                assert!(reason.contains("optional samples"));
            }
            other => panic!("Expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unconditional_reply_and_cwd() {
        let dir = TempDir::new().unwrap();
        let command = script(
            &dir,
            "installer.bin",
            "#!/bin/bash\nread name\necho \"$name\" > reply.txt\n",
        );
        let answers = vec![InstallAnswer {
            expect: None,
            reply: "sgx".into(),
        }];

        run_installer(&command, &answers, Duration::from_secs(5), Some(dir.path()))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("reply.txt")).unwrap(), "sgx\n");
    }

    #[test]
    fn test_prompt_detection() {
        assert!(looks_like_prompt("Do you accept? [yes/no]"));
        assert!(looks_like_prompt("Please input the directory :"));
        assert!(!looks_like_prompt("Installation failed"));
        assert!(!looks_like_prompt(":"));
        assert_eq!(last_line("first\nsecond ? \n\n"), "second ?");
    }
}
