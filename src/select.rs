// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot selection for pulls.
//!
//! Turn the newest-first tag listing of the snapshot repository into one
//! chosen reference. Tags are presented in pages. Answering `0` or `latest`
//! picks the branch head, an empty answer flips to the next page (wrapping
//! around after the last one), and a number in `1..=N` picks the Nth tag of
//! the whole listing.
//!
//! Deciding what an answer means ([`TagSelector::step`]) is kept apart from
//! asking for it ([`TagSelector::choose`]), so the same answers always lead to
//! the same selection.

use crate::prompt::{PromptError, Prompter};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Sentinel that selects the head of the tracked branch.
pub const LATEST: &str = "latest";

/// Reference to check out when pulling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRef {
    /// Head of tracked branch.
    Latest,

    /// Explicit snapshot tag.
    Tag(String),
}

impl FromStr for SnapshotRef {
    type Err = std::convert::Infallible;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = data.trim();
        if data.eq_ignore_ascii_case(LATEST) {
            Ok(Self::Latest)
        } else {
            Ok(Self::Tag(data.to_string()))
        }
    }
}

impl Display for SnapshotRef {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Latest => fmt.write_str(LATEST),
            Self::Tag(name) => fmt.write_str(name),
        }
    }
}

/// Outcome of feeding one answer to the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Answer picked a reference.
    Chosen(SnapshotRef),

    /// Answer flipped to another page, numbered from zero.
    Page(usize),

    /// Answer was not understood.
    Invalid(String),
}

/// One page of the tag listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<'a> {
    /// Page number, counting from zero.
    pub index: usize,

    /// Total number of pages.
    pub count: usize,

    /// Tags on this page along with their selection number.
    pub entries: Vec<(usize, &'a str)>,
}

impl Display for Page<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "  0) {LATEST} (branch head)")?;
        for (number, tag) in &self.entries {
            writeln!(fmt, "{number:>3}) {tag}")?;
        }
        write!(fmt, "page {}/{}", self.index + 1, self.count)
    }
}

/// Pick a snapshot reference out of a newest-first tag listing.
#[derive(Debug, Clone)]
pub struct TagSelector {
    tags: Vec<String>,
    page_size: usize,
    page: usize,
}

impl TagSelector {
    /// Construct new selector over newest-first tags.
    ///
    /// A page size of zero is treated as one.
    pub fn new(tags: impl IntoIterator<Item = impl Into<String>>, page_size: usize) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            page_size: page_size.max(1),
            page: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.tags.len().div_ceil(self.page_size).max(1)
    }

    /// Page currently shown to operator.
    pub fn current_page(&self) -> Page<'_> {
        let start = self.page * self.page_size;
        let entries = self
            .tags
            .iter()
            .enumerate()
            .skip(start)
            .take(self.page_size)
            .map(|(index, tag)| (index + 1, tag.as_str()))
            .collect();

        Page {
            index: self.page,
            count: self.page_count(),
            entries,
        }
    }

    /// Interpret one answer from operator.
    pub fn step(&mut self, input: &str) -> Step {
        let input = input.trim();
        if input.is_empty() {
            self.page = (self.page + 1) % self.page_count();
            return Step::Page(self.page);
        }

        if input.eq_ignore_ascii_case(LATEST) {
            return Step::Chosen(SnapshotRef::Latest);
        }

        match input.parse::<usize>() {
            Ok(0) => Step::Chosen(SnapshotRef::Latest),
            Ok(number) if number <= self.tags.len() => {
                Step::Chosen(SnapshotRef::Tag(self.tags[number - 1].clone()))
            }
            _ => Step::Invalid(format!(
                "invalid selection {input:?}: enter 0-{}, \"{LATEST}\", or nothing for the next page",
                self.tags.len()
            )),
        }
    }

    /// Ask operator until a reference is chosen.
    ///
    /// If there are no tags at all, the operator is told so and asked whether
    /// to continue with the branch head instead.
    ///
    /// # Errors
    ///
    /// - Return [`SelectError::Cancelled`] if operator declines to continue
    ///   without tags.
    /// - Return [`SelectError::Prompt`] if prompting fails.
    pub fn choose(mut self, prompter: &mut impl Prompter) -> Result<SnapshotRef> {
        if self.is_empty() {
            prompter.say("no snapshot tags found in repository");
            if prompter.confirm("continue with the latest snapshot on the branch?", false)? {
                return Ok(SnapshotRef::Latest);
            }

            return Err(SelectError::Cancelled);
        }

        let mut show_page = true;
        loop {
            if show_page {
                prompter.say(&self.current_page().to_string());
            }

            let answer = prompter.ask("select snapshot:")?;
            match self.step(&answer) {
                Step::Chosen(choice) => return Ok(choice),
                Step::Page(_) => show_page = true,
                Step::Invalid(message) => {
                    prompter.say(&message);
                    show_page = false;
                }
            }
        }
    }
}

/// Snapshot selection error types.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// Operator declined to continue.
    #[error("snapshot selection cancelled")]
    Cancelled,

    /// Prompting operator failed.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Friendly result alias :3
pub type Result<T, E = SelectError> = std::result::Result<T, E>;
