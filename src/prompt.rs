// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Human interaction.
//!
//! Everything that needs an answer from the operator goes through the
//! [`Prompter`] trait. The terminal implementation is backed by `inquire`,
//! while [`ScriptedPrompter`] replays canned answers so that whole workflows
//! can be driven without a terminal.

use inquire::{Confirm, Text};
use std::collections::VecDeque;

/// Layer of indirection for operator prompts.
pub trait Prompter {
    /// Show informational text to operator.
    fn say(&mut self, message: &str);

    /// Ask for a line of free-form input.
    fn ask(&mut self, message: &str) -> Result<String>;

    /// Ask a yes or no question.
    fn confirm(&mut self, message: &str, default: bool) -> Result<bool>;
}

/// Prompt operator through the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn say(&mut self, message: &str) {
        println!("{message}");
    }

    fn ask(&mut self, message: &str) -> Result<String> {
        Ok(Text::new(message).prompt()?)
    }

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new(message).with_default(default).prompt()?)
    }
}

/// Answer every confirmation with "yes".
///
/// Used when the operator already agreed up front, e.g., `--yes`. Free-form
/// questions are still forwarded to the wrapped prompter.
#[derive(Debug, Default, Clone)]
pub struct AssumeYes<P: Prompter>(pub P);

impl<P: Prompter> Prompter for AssumeYes<P> {
    fn say(&mut self, message: &str) {
        self.0.say(message);
    }

    fn ask(&mut self, message: &str) -> Result<String> {
        self.0.ask(message)
    }

    fn confirm(&mut self, message: &str, _default: bool) -> Result<bool> {
        self.0.say(&format!("{message} yes"));
        Ok(true)
    }
}

/// Replay canned answers in order.
///
/// Answers to confirmations are affirmative only for "y" or "yes". Running
/// out of answers is treated as the operator cancelling.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    transcript: Vec<String>,
}

impl ScriptedPrompter {
    /// Construct new scripted prompter.
    pub fn new(answers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }

    /// Everything shown or asked so far.
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    fn next_answer(&mut self) -> Result<String> {
        self.answers.pop_front().ok_or(PromptError::Cancelled)
    }
}

impl Prompter for ScriptedPrompter {
    fn say(&mut self, message: &str) {
        self.transcript.push(message.to_string());
    }

    fn ask(&mut self, message: &str) -> Result<String> {
        self.transcript.push(message.to_string());
        self.next_answer()
    }

    fn confirm(&mut self, message: &str, _default: bool) -> Result<bool> {
        self.transcript.push(message.to_string());
        Ok(is_affirmative(&self.next_answer()?))
    }
}

/// Check if answer is an affirmative token.
///
/// Anything that is not plainly "y" or "yes" counts as "no".
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Prompt error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Operator cancelled or input ran dry.
    #[error("operation cancelled by operator")]
    Cancelled,

    /// Terminal prompt failed.
    #[error(transparent)]
    Inquire(#[from] inquire::InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;
