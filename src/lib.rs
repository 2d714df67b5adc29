// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Move site state between environments through a Git repository.
//!
//! A __snapshot__ is one commit of a plain Git repository that bundles the
//! configuration trees, the uploaded-files tree, and a compressed database
//! dump of a site. Snapshots are pushed from one environment, marked with a
//! timestamped tag, and pulled into another one, either from the branch head
//! or from any earlier tag.
//!
//! # Snapshot Tags
//!
//! Tags look like `snapshot-2024-01-05_10-00-00`. The timestamp suffix is
//! fixed-width, so sorting it as text sorts it chronologically. Tags are
//! force-overwritable, but every push creates a fresh one, and none are ever
//! deleted automatically.
//!
//! # See Also
//!
//! 1. [`workflow::Workflow`] for the push, pull, and fix workflows.
//! 2. [`config::SyncConfig`] for configuration.

pub mod config;
pub mod database;
pub mod path;
pub mod prompt;
pub mod repository;
pub mod select;
pub mod snapshot;
pub mod syscall;
pub mod tag;
pub mod workflow;
