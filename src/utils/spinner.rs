// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! Progress indicators for long-running operations
//!
//! Builds run behind a spinner; downloads get a byte bar when the server
//! reports a length and fall back to a byte-counting spinner otherwise.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for indeterminate progress
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Create a progress bar for a download of `total` bytes, if known
pub fn create_download_bar(total: Option<u64>, name: &str) -> ProgressBar {
    let pb = match total {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .expect("Invalid download bar template")
                    .progress_chars("█▓░"),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                    .template("{spinner:.blue} {msg} {bytes} ({bytes_per_sec})")
                    .expect("Invalid download spinner template"),
            );
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        }
    };
    pb.set_message(name.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_bar_length() {
        let bar = create_download_bar(Some(1024), "sdk.bin");
        assert_eq!(bar.length(), Some(1024));
        assert_eq!(bar.message(), "sdk.bin");

        bar.inc(512);
        assert_eq!(bar.position(), 512);
    }

    #[test]
    fn test_download_bar_unknown_length() {
        let bar = create_download_bar(None, "psw.tar.gz");
        assert_eq!(bar.length(), None);
        bar.finish_and_clear();
    }
}
