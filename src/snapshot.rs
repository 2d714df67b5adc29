// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot payload assembly.
//!
//! A snapshot bundles three payload categories inside the working clone:
//!
//! ```text
//! <clone>/
//!   application/          # one directory per configuration tree
//!   packages/
//!   files/                # uploaded-files tree
//!   database/
//!     latest.sql.gz       # alias of newest dump
//!     acme_2024-01-05_10-00-00.sql.gz
//! ```
//!
//! Pushing __stages__ payloads from the local site into the clone. Pulling
//! __applies__ them back onto the local site. Both directions mirror
//! additively, so files only present at the destination always survive.

pub mod mirror;

use crate::{
    config::SyncConfig,
    database::{DatabaseError, DatabaseExporter},
    syscall::Syscall,
    tag::TIMESTAMP_FORMAT,
};
use mirror::{mirror, normalize_permissions, Exclusions, MirrorError, MirrorReport};

use chrono::NaiveDateTime;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Directory holding database dumps inside a snapshot.
pub const DATABASE_DIR: &str = "database";

/// Directory holding uploaded-files tree inside a snapshot.
pub const FILES_DIR: &str = "files";

/// Extension of compressed database dumps.
pub const DUMP_EXTENSION: &str = "sql.gz";

/// Name of alias to newest database dump.
pub const LATEST_DUMP: &str = "latest.sql.gz";

// INVARIANT: Configuration trees never shadow other payload directories.
const RESERVED_NAMES: [&str; 3] = [DATABASE_DIR, FILES_DIR, ".git"];

/// Payload category of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Configuration,
    UploadedFiles,
    Database,
}

impl Display for Payload {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Configuration => fmt.write_str("configuration"),
            Self::UploadedFiles => fmt.write_str("uploaded files"),
            Self::Database => fmt.write_str("database"),
        }
    }
}

/// Outcome of staging or applying payload trees.
///
/// Per-path mirror failures end up in `failures` instead of aborting the run.
#[derive(Debug, Default)]
pub struct StagingReport {
    /// Destination trees that were mirrored.
    pub mirrored: Vec<PathBuf>,

    /// Source trees that did not exist.
    pub skipped: Vec<PathBuf>,

    /// Non-fatal failures.
    pub failures: Vec<SnapshotError>,
}

impl StagingReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: StagingReport) {
        self.mirrored.extend(other.mirrored);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }

    fn partial_failure(&mut self, category: Payload, source: MirrorError) {
        let failure = SnapshotError::StagingPartialFailure { category, source };
        warn!("{failure}");
        self.failures.push(failure);
    }

    fn absorb(&mut self, category: Payload, dest: PathBuf, report: MirrorReport) {
        for failure in report.failures {
            self.partial_failure(category, failure);
        }
        self.mirrored.push(dest);
    }
}

/// Assemble and disperse snapshot payloads in a working clone.
#[derive(Debug)]
pub struct SnapshotBuilder<'a> {
    work_tree: PathBuf,
    config: &'a SyncConfig,
}

impl<'a> SnapshotBuilder<'a> {
    /// Construct new builder over working clone work tree.
    pub fn new(work_tree: impl Into<PathBuf>, config: &'a SyncConfig) -> Self {
        Self {
            work_tree: work_tree.into(),
            config,
        }
    }

    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    /// Mirror every configuration tree of the site into the clone.
    ///
    /// # Errors
    ///
    /// - Return [`SnapshotError::Mirror`] if exclusion rules are invalid.
    #[instrument(skip(self), level = "debug")]
    pub fn stage_configuration(&self) -> Result<StagingReport> {
        let mut report = StagingReport::default();
        for (dir, staged) in self.configuration_trees() {
            let source = self.config.site.root.join(dir);
            let exclusions = Exclusions::new(&source, &self.config.snapshot.config_excludes)?;
            self.mirror_into(
                Payload::Configuration,
                &source,
                &self.work_tree.join(staged),
                &exclusions,
                &mut report,
            );
        }

        Ok(report)
    }

    /// Mirror uploaded-files tree of the site into the clone.
    ///
    /// # Errors
    ///
    /// - Return [`SnapshotError::Mirror`] if exclusion rules are invalid.
    #[instrument(skip(self), level = "debug")]
    pub fn stage_uploaded_files(&self) -> Result<StagingReport> {
        let mut report = StagingReport::default();
        let source = self.config.site.root.join(&self.config.site.files_dir);
        let exclusions = Exclusions::new(&source, &self.config.snapshot.files_excludes)?;
        self.mirror_into(
            Payload::UploadedFiles,
            &source,
            &self.work_tree.join(FILES_DIR),
            &exclusions,
            &mut report,
        );

        Ok(report)
    }

    /// Export database into clone.
    ///
    /// Writes the dump under a timestamped name, refreshes the `latest` alias,
    /// and prunes every older dump. The timestamped dump itself is dropped
    /// again when configured to only keep the alias. Returns path to the
    /// `latest` alias.
    ///
    /// # Errors
    ///
    /// - Return [`SnapshotError::Database`] if export fails.
    /// - Return [`SnapshotError::Io`] if dump directory cannot be maintained.
    #[instrument(skip(self, exporter, scratch), level = "debug")]
    pub fn stage_database_dump<S: Syscall>(
        &self,
        exporter: &DatabaseExporter<'_, S>,
        scratch: impl AsRef<Path>,
        timestamp: NaiveDateTime,
    ) -> Result<PathBuf> {
        let dir = self.work_tree.join(DATABASE_DIR);
        mkdirp::mkdirp(&dir).map_err(|err| SnapshotError::Io {
            source: err,
            path: dir.clone(),
        })?;

        let name = format!(
            "{}_{}.{DUMP_EXTENSION}",
            self.config.database.name,
            timestamp.format(TIMESTAMP_FORMAT)
        );
        let dump = dir.join(&name);
        let latest = dir.join(LATEST_DUMP);
        exporter.export(&dump, scratch)?;

        for old in list_dumps(&dir)? {
            if old != dump {
                debug!("prune {:?}", old.display());
                remove(&old)?;
            }
        }

        fs::copy(&dump, &latest).map_err(|err| SnapshotError::Io {
            source: err,
            path: latest.clone(),
        })?;
        if !self.config.snapshot.keep_timestamped_dump {
            remove(&dump)?;
        }
        info!("staged database dump {name:?}");

        Ok(latest)
    }

    /// Mirror configuration trees of the clone onto the site.
    #[instrument(skip(self), level = "debug")]
    pub fn apply_configuration(&self) -> StagingReport {
        let mut report = StagingReport::default();
        for (dir, staged) in self.configuration_trees() {
            let dest = self.config.site.root.join(dir);
            self.mirror_into(
                Payload::Configuration,
                &self.work_tree.join(staged),
                &dest,
                &Exclusions::none(),
                &mut report,
            );
            self.normalize(Payload::Configuration, &dest, &mut report);
        }

        report
    }

    /// Mirror uploaded-files tree of the clone onto the site.
    #[instrument(skip(self), level = "debug")]
    pub fn apply_uploaded_files(&self) -> StagingReport {
        let mut report = StagingReport::default();
        let dest = self.config.site.root.join(&self.config.site.files_dir);
        self.mirror_into(
            Payload::UploadedFiles,
            &self.work_tree.join(FILES_DIR),
            &dest,
            &Exclusions::none(),
            &mut report,
        );
        self.normalize(Payload::UploadedFiles, &dest, &mut report);

        report
    }

    /// Locate database dump to import from the checked out snapshot.
    ///
    /// Prefers the `latest` alias, and falls back to the newest dump by name.
    ///
    /// # Errors
    ///
    /// - Return [`SnapshotError::Io`] if dump directory cannot be listed.
    pub fn database_dump(&self) -> Result<Option<PathBuf>> {
        let dir = self.work_tree.join(DATABASE_DIR);
        let latest = dir.join(LATEST_DUMP);
        if latest.is_file() {
            return Ok(Some(latest));
        }
        if !dir.is_dir() {
            return Ok(None);
        }

        Ok(list_dumps(&dir)?.into_iter().max())
    }

    /// Pairs of site-relative configuration tree and its staged name.
    fn configuration_trees(&self) -> Vec<(&'a str, &'a str)> {
        let config = self.config;
        let mut trees = Vec::new();
        for dir in &config.site.config_dirs {
            match Path::new(dir).file_name().and_then(|name| name.to_str()) {
                Some(name) if !RESERVED_NAMES.contains(&name) => trees.push((dir.as_str(), name)),
                _ => warn!("cannot stage configuration tree {dir:?} under a reserved name"),
            }
        }

        trees
    }

    fn mirror_into(
        &self,
        category: Payload,
        source: &Path,
        dest: &Path,
        exclusions: &Exclusions,
        report: &mut StagingReport,
    ) {
        if !source.is_dir() {
            warn!("skip {category}: {:?} does not exist", source.display());
            report.skipped.push(source.to_path_buf());
            return;
        }

        match mirror(source, dest, exclusions) {
            Ok(mirrored) => {
                info!(
                    "mirrored {category} {:?}: {} copied, {} unchanged",
                    source.display(),
                    mirrored.copied,
                    mirrored.unchanged
                );
                report.absorb(category, dest.to_path_buf(), mirrored);
            }
            Err(err) => report.partial_failure(category, err),
        }
    }

    fn normalize(&self, category: Payload, dest: &Path, report: &mut StagingReport) {
        if !dest.is_dir() {
            return;
        }

        for failure in normalize_permissions(dest) {
            report.partial_failure(category, failure);
        }
    }
}

// Every dump in directory, sorted by name.
fn list_dumps(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*.{DUMP_EXTENSION}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );

    let mut dumps = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        if path.file_name().is_some_and(|name| name != LATEST_DUMP) {
            dumps.push(path);
        }
    }
    dumps.sort();

    Ok(dumps)
}

fn remove(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|err| SnapshotError::Io {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Snapshot assembly error types.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// One payload category could not be mirrored completely.
    #[error("failed to mirror {category}")]
    StagingPartialFailure {
        category: Payload,
        #[source]
        source: MirrorError,
    },

    /// Mirroring cannot be set up at all.
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    /// Database dump cannot be produced.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Dump directory cannot be maintained.
    #[error("failed to maintain dump {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Dump listing pattern is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Dump listing cannot read an entry.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
}

/// Friendly result alias :3
pub type Result<T, E = SnapshotError> = std::result::Result<T, E>;
