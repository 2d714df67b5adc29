// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Additive directory mirroring.
//!
//! Payload trees are moved in and out of the working clone by __mirroring__:
//! new and changed files are copied over, while files that only exist at the
//! destination are left alone. Nothing is ever deleted, so an incomplete
//! exclusion list can at worst copy too much, never wipe something out.
//!
//! # Exclusion Rules
//!
//! Exclusion rules use gitignore syntax, and are matched relative to the root
//! of the tree being mirrored. Excluded directories are pruned entirely, so
//! their contents are never even visited. Unlike gitignore files, the rules
//! are handed over directly, and hidden files are _not_ skipped by default.

use ignore::{
    gitignore::{Gitignore, GitignoreBuilder},
    WalkBuilder,
};
use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Compiled exclusion rules for one tree.
#[derive(Clone, Debug)]
pub struct Exclusions {
    matcher: Gitignore,
}

impl Exclusions {
    /// Compile exclusion rules relative to target root.
    ///
    /// # Errors
    ///
    /// - Return [`MirrorError::InvalidRule`] if a rule cannot be parsed.
    pub fn new(
        root: impl AsRef<Path>,
        rules: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root.as_ref());
        for rule in rules {
            builder
                .add_line(None, rule.as_ref())
                .map_err(|err| MirrorError::InvalidRule {
                    source: err,
                    rule: rule.as_ref().to_string(),
                })?;
        }
        let matcher = builder.build().map_err(|err| MirrorError::InvalidRule {
            source: err,
            rule: String::new(),
        })?;

        Ok(Self { matcher })
    }

    /// Exclude nothing.
    pub fn none() -> Self {
        Self {
            matcher: Gitignore::empty(),
        }
    }

    /// Check if path inside tree root is excluded.
    pub fn is_excluded(&self, path: impl AsRef<Path>, is_dir: bool) -> bool {
        self.matcher.matched(path.as_ref(), is_dir).is_ignore()
    }
}

/// Tally of a single mirror run.
#[derive(Debug, Default)]
pub struct MirrorReport {
    /// Files copied because they were new or changed.
    pub copied: usize,

    /// Files skipped because destination already matched.
    pub unchanged: usize,

    /// Entries that could not be mirrored.
    pub failures: Vec<MirrorError>,
}

impl MirrorReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Mirror source tree onto destination additively.
///
/// Failing to mirror a single entry does not stop the run. Those failures
/// are collected into the returned report instead.
///
/// # Errors
///
/// - Return [`MirrorError::MissingSource`] if source is not a directory.
/// - Return [`MirrorError::Io`] if destination root cannot be created.
pub fn mirror(
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    exclusions: &Exclusions,
) -> Result<MirrorReport> {
    let source = source.as_ref();
    let dest = dest.as_ref();
    if !source.is_dir() {
        return Err(MirrorError::MissingSource(source.to_path_buf()));
    }
    make_dir(dest)?;

    let mut report = MirrorReport::default();
    let filter = exclusions.clone();
    let walker = WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
            entry.depth() == 0 || !filter.is_excluded(entry.path(), is_dir)
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                report.failures.push(MirrorError::Walk(err));
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        // INVARIANT: Walker only yields paths beneath its root.
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        let Some(kind) = entry.file_type() else {
            continue;
        };

        let result = if kind.is_dir() {
            make_dir(&target)
        } else if kind.is_symlink() {
            mirror_symlink(entry.path(), &target)
        } else {
            match mirror_file(entry.path(), &target) {
                Ok(true) => {
                    report.copied += 1;
                    Ok(())
                }
                Ok(false) => {
                    report.unchanged += 1;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };

        if let Err(err) = result {
            warn!("{err}");
            report.failures.push(err);
        }
    }

    debug!(
        "mirrored {:?} to {:?}: {} copied, {} unchanged, {} failed",
        source.display(),
        dest.display(),
        report.copied,
        report.unchanged,
        report.failures.len()
    );

    Ok(report)
}

/// Reset permissions of every entry in tree to a fixed safe default.
///
/// Directories become `0755`, regular files `0644`, so nothing uploaded ever
/// ends up executable. Symbolic links are left alone. Returns the entries that
/// could not be changed.
#[cfg(unix)]
pub fn normalize_permissions(root: impl AsRef<Path>) -> Vec<MirrorError> {
    use std::os::unix::fs::PermissionsExt;

    let mut failures = Vec::new();
    let walker = WalkBuilder::new(root.as_ref())
        .standard_filters(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                failures.push(MirrorError::Walk(err));
                continue;
            }
        };

        let mode = match entry.file_type() {
            Some(kind) if kind.is_dir() => 0o755,
            Some(kind) if kind.is_file() => 0o644,
            _ => continue,
        };

        if let Err(err) = fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode)) {
            failures.push(MirrorError::Io {
                source: err,
                path: entry.path().to_path_buf(),
            });
        }
    }

    failures
}

#[cfg(not(unix))]
pub fn normalize_permissions(_root: impl AsRef<Path>) -> Vec<MirrorError> {
    Vec::new()
}

fn make_dir(path: &Path) -> Result<()> {
    mkdirp::mkdirp(path).map_err(|err| MirrorError::Io {
        source: err,
        path: path.to_path_buf(),
    })?;

    Ok(())
}

// Copy file if destination is missing or differs. Return whether it copied.
fn mirror_file(source: &Path, target: &Path) -> Result<bool> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |err| MirrorError::Io { source: err, path }
    };

    if target.is_file() && same_contents(source, target).map_err(io_error(target))? {
        return Ok(false);
    }

    if let Some(parent) = target.parent() {
        make_dir(parent)?;
    }

    // INVARIANT: Replace whatever non-file entry sits in the way, e.g., a
    // dangling symlink, because fs::copy would follow it.
    if target.symlink_metadata().is_ok() && !target.is_file() {
        remove_entry(target).map_err(io_error(target))?;
    }

    fs::copy(source, target).map_err(io_error(source))?;

    Ok(true)
}

#[cfg(unix)]
fn mirror_symlink(source: &Path, target: &Path) -> Result<()> {
    let io_error = |err| MirrorError::Io {
        source: err,
        path: source.to_path_buf(),
    };

    let link = fs::read_link(source).map_err(io_error)?;
    if fs::read_link(target).is_ok_and(|existing| existing == link) {
        return Ok(());
    }

    if target.symlink_metadata().is_ok() {
        remove_entry(target).map_err(io_error)?;
    }
    std::os::unix::fs::symlink(&link, target).map_err(io_error)
}

#[cfg(not(unix))]
fn mirror_symlink(source: &Path, _target: &Path) -> Result<()> {
    debug!("skip symbolic link {:?}", source.display());
    Ok(())
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    let metadata = path.symlink_metadata()?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn same_contents(a: &Path, b: &Path) -> std::io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }

    let mut reader_a = BufReader::new(File::open(a)?);
    let mut reader_b = BufReader::new(File::open(b)?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];

    loop {
        let read = reader_a.read(&mut buf_a)?;
        if read == 0 {
            return Ok(true);
        }
        reader_b.read_exact(&mut buf_b[..read])?;
        if buf_a[..read] != buf_b[..read] {
            return Ok(false);
        }
    }
}

/// Mirroring error types.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Exclusion rule cannot be parsed.
    #[error("invalid exclusion rule {rule:?}")]
    InvalidRule {
        #[source]
        source: ignore::Error,
        rule: String,
    },

    /// Source tree does not exist.
    #[error("source directory {:?} does not exist", .0.display())]
    MissingSource(PathBuf),

    /// Directory walk fails on an entry.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// File system operation fails on an entry.
    #[error("failed to mirror {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = MirrorError> = std::result::Result<T, E>;
