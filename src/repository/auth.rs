// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Credential prompting for snapshot repository transfers.

use auth_git2::Prompter;
use indicatif::ProgressBar;
use inquire::{Password, Text};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Git2 authentication prompter for progress bar.
///
/// Suspends the transfer progress bar while asking for credentials. A failed
/// or cancelled prompt is reported to libgit2 as "no credentials", which makes
/// the transfer fail with an authentication error.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().map_err(log_prompt).ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .map_err(log_prompt)
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .map_err(log_prompt)
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .map_err(log_prompt)
                .ok()
        })
    }
}

fn log_prompt(error: inquire::InquireError) -> inquire::InquireError {
    warn!("credential prompt failed: {error}");
    error
}
