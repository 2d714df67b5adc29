// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot repository access.
//!
//! Snapshots travel between environments through a plain Git repository. A
//! push stages every payload into a disposable __working clone__, makes one
//! commit, pushes the tracked branch, and finally marks the commit with a
//! timestamped tag. A pull checks out either the branch head or one of those
//! tags in a fresh working clone, and disperses its payload back into the
//! local site.
//!
//! # Concurrency
//!
//! There is no locking. If two environments push at the same time, the loser
//! gets its push rejected, merges the remote branch once, and retries exactly
//! once. If that fails too, the run stops with
//! [`RepositoryError::PushConflict`] and the working clone stays on disk for
//! manual inspection. Database dumps and media cannot be merged in any
//! meaningful way, so nothing smarter is attempted.
//!
//! # Working Clone Lifetime
//!
//! The working clone is a scoped resource held by [`WorkingClone`]. Leftovers
//! from an interrupted run are wiped when a new one is created, and the
//! directory is removed again on drop unless it was explicitly retained.

pub mod auth;
pub mod backend;

use crate::select::SnapshotRef;

pub use backend::{Git2Backend, SnapshotBackend};

use std::{
    fs::{create_dir_all, remove_dir_all},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Name of the one remote every working clone registers.
pub const REMOTE_NAME: &str = "origin";

/// Outcome of committing the working clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// Whether a new commit was created.
    pub changed: bool,

    /// Commit at HEAD after the operation, if any.
    pub id: Option<String>,
}

/// Outcome of a single push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    /// Remote accepted update.
    Accepted,

    /// Remote refused update, usually because it diverged.
    Rejected(String),
}

/// Disposable directory holding a working clone and scratch space.
///
/// Layout is `<root>/clone` for the repository itself, and `<root>/scratch`
/// for temporary files that must never end up in a snapshot.
#[derive(Debug)]
pub struct WorkingClone {
    root: PathBuf,
    retained: bool,
}

impl WorkingClone {
    /// Create fresh working clone directory.
    ///
    /// Removes anything left behind at `root` by an earlier run first.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::Io`] if directory cannot be reset.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.exists() {
            debug!("discard stale working clone at {:?}", root.display());
            remove_dir_all(&root).map_err(|err| RepositoryError::Io {
                source: err,
                path: root.clone(),
            })?;
        }

        for dir in [root.join("clone"), root.join("scratch")] {
            create_dir_all(&dir).map_err(|err| RepositoryError::Io {
                source: err,
                path: dir.clone(),
            })?;
        }

        Ok(Self {
            root,
            retained: false,
        })
    }

    /// Directory holding the repository work tree.
    pub fn clone_dir(&self) -> PathBuf {
        self.root.join("clone")
    }

    /// Directory for temporary files outside of the work tree.
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    /// Keep working clone on disk after drop.
    pub fn retain(&mut self) {
        self.retained = true;
    }
}

impl Drop for WorkingClone {
    fn drop(&mut self) {
        if self.retained {
            info!("working clone kept at {:?}", self.root.display());
            return;
        }

        if let Err(error) = remove_dir_all(&self.root) {
            warn!(
                "failed to remove working clone at {:?}: {error}",
                self.root.display()
            );
        }
    }
}

/// Snapshot repository with retry and fallback policies.
///
/// Wraps a [`SnapshotBackend`] that performs the raw version control
/// operations inside a working clone.
#[derive(Debug)]
pub struct SnapshotRepository<B = Git2Backend>
where
    B: SnapshotBackend,
{
    backend: B,
    branch: String,
}

impl<B> SnapshotRepository<B>
where
    B: SnapshotBackend,
{
    /// Start tracking branch of the remote inside a fresh working clone.
    ///
    /// If the branch exists remotely it gets fetched and checked out.
    /// Otherwise an orphan branch with that name is started locally, which is
    /// how the very first push into an empty repository works.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::RemoteUnreachable`] if remote cannot be
    ///   contacted at all.
    #[instrument(skip(backend, branch), level = "debug")]
    pub fn open_working_clone(backend: B, branch: impl Into<String>) -> Result<Self> {
        let branch = branch.into();
        if backend.remote_has_branch(&branch)? {
            info!("track remote branch {branch:?}");
            backend.fetch_branch(&branch)?;
            backend.checkout_remote_branch(&branch)?;
        } else {
            info!("remote has no branch {branch:?} yet, start it from scratch");
            backend.start_orphan_branch(&branch)?;
        }

        Ok(Self { backend, branch })
    }

    /// Wrap backend without touching the work tree.
    ///
    /// Suits read-only use, e.g., listing tags or checking out an explicit
    /// reference through [`SnapshotRepository::checkout_ref`].
    pub fn attach(backend: B, branch: impl Into<String>) -> Self {
        Self {
            backend,
            branch: branch.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Path to work tree of working clone.
    pub fn work_tree(&self) -> &Path {
        self.backend.work_tree()
    }

    /// Stage everything under work tree, and commit if anything changed.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::Git2`] if staging or committing fails.
    #[instrument(skip(self), level = "debug")]
    pub fn commit_all(&self, message: &str) -> Result<CommitResult> {
        let result = self.backend.commit_all(message)?;
        if result.changed {
            info!("committed snapshot {}", result.id.as_deref().unwrap_or("?"));
        } else {
            info!("nothing changed since last snapshot, no commit made");
        }

        Ok(result)
    }

    /// Push tracked branch to remote.
    ///
    /// A rejected push triggers one merge of the remote branch followed by
    /// exactly one more push attempt.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::PushConflict`] if the retry is rejected too,
    ///   or if the merge itself conflicts.
    /// - Return [`RepositoryError::RemoteUnreachable`] if remote cannot be
    ///   contacted.
    #[instrument(skip(self), level = "debug")]
    pub fn push_branch(&self) -> Result<()> {
        let reason = match self.backend.push_branch(&self.branch)? {
            PushStatus::Accepted => {
                info!("pushed branch {:?}", self.branch);
                return Ok(());
            }
            PushStatus::Rejected(reason) => reason,
        };

        warn!("push rejected ({reason}), merge remote changes and retry once");
        match self.backend.merge_remote_branch(&self.branch) {
            Ok(()) => {}
            Err(RepositoryError::MergeConflict { .. }) => {
                return Err(self.push_conflict("merge with remote branch conflicts"));
            }
            Err(error) => return Err(error),
        }

        match self.backend.push_branch(&self.branch)? {
            PushStatus::Accepted => {
                info!("pushed branch {:?} after merge", self.branch);
                Ok(())
            }
            PushStatus::Rejected(reason) => Err(self.push_conflict(&reason)),
        }
    }

    /// List snapshot tags of remote, newest first.
    ///
    /// Fetches all remote tags into working clone. If that yields nothing, the
    /// tags are listed straight off the remote instead.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::RemoteUnreachable`] if neither listing works.
    #[instrument(skip(self), level = "debug")]
    pub fn list_tags(&self) -> Result<Vec<String>> {
        let fetched = match self.backend.fetch_tags() {
            Ok(tags) => tags,
            Err(error) => {
                warn!("failed to fetch tags: {error}");
                Vec::new()
            }
        };

        let tags = if fetched.is_empty() {
            debug!("no tags fetched, list remote tags directly");
            self.backend.remote_tags()?
        } else {
            fetched
        };

        Ok(crate::tag::sort_newest_first(tags))
    }

    /// Tag HEAD and push the tag.
    ///
    /// Tagging is a convenience. Failure is logged as a warning, and reported
    /// back as `false`, but never fails the run because the branch holding the
    /// snapshot was already pushed.
    #[instrument(skip(self), level = "debug")]
    pub fn create_and_push_tag(&self, name: &str) -> bool {
        if let Err(error) = self.backend.force_tag(name) {
            warn!("failed to create tag {name:?}: {error}");
            return false;
        }

        match self.backend.push_tag(name) {
            Ok(PushStatus::Accepted) => {
                info!("tagged snapshot as {name:?}");
                true
            }
            Ok(PushStatus::Rejected(reason)) => {
                warn!("remote rejected tag {name:?}: {reason}");
                false
            }
            Err(error) => {
                warn!("failed to push tag {name:?}: {error}");
                false
            }
        }
    }

    /// Check out branch head or an explicit tag.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::RefNotFound`] if tag does not exist, or if
    ///   the remote has no branch to take the latest snapshot from.
    #[instrument(skip(self), level = "debug")]
    pub fn checkout_ref(&self, target: &SnapshotRef) -> Result<()> {
        match target {
            SnapshotRef::Latest => {
                if !self.backend.remote_has_branch(&self.branch)? {
                    return Err(RepositoryError::RefNotFound(format!(
                        "{} (remote has no branch {:?})",
                        crate::select::LATEST,
                        self.branch
                    )));
                }

                self.backend.fetch_branch(&self.branch)?;
                self.backend.checkout_remote_branch(&self.branch)?;
            }
            SnapshotRef::Tag(name) => {
                if let Err(error) = self.backend.fetch_tags() {
                    warn!("failed to fetch tags: {error}");
                }

                if !self.backend.checkout_tag(name)? {
                    return Err(RepositoryError::RefNotFound(name.clone()));
                }
            }
        }
        info!("checked out {target}");

        Ok(())
    }

    /// Commit at HEAD of working clone, if any.
    pub fn head_id(&self) -> Result<Option<String>> {
        self.backend.head_id()
    }

    fn push_conflict(&self, reason: &str) -> RepositoryError {
        RepositoryError::PushConflict {
            branch: self.branch.clone(),
            reason: reason.to_string(),
            work_tree: self.backend.work_tree().to_path_buf(),
        }
    }
}

/// All possible error types for snapshot repository interaction.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Remote cannot be contacted, e.g., network or authentication trouble.
    #[error("snapshot repository {url:?} is unreachable")]
    RemoteUnreachable {
        #[source]
        source: git2::Error,
        url: String,
    },

    /// Optimistic push retry exhausted.
    #[error(
        "push of branch {branch:?} still rejected after merging remote changes ({reason}); \
         inspect working clone at {:?} and resolve manually",
        work_tree.display()
    )]
    PushConflict {
        branch: String,
        reason: String,
        work_tree: PathBuf,
    },

    /// Merging remote branch produced conflicts.
    #[error("merging remote branch {branch:?} produced conflicts")]
    MergeConflict { branch: String },

    /// Requested reference does not exist.
    #[error("snapshot reference {0:?} not found; run `sitesnap tags` to list available snapshots")]
    RefNotFound(String),

    /// Working clone directory manipulation fails.
    #[error("failed to prepare working clone at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        cell::{Cell, RefCell},
        path::PathBuf,
    };

    #[derive(Debug, Default)]
    struct FakeBackend {
        work_tree: PathBuf,
        branch_exists: bool,
        reject_pushes: usize,
        merge_conflicts: bool,
        fetch_tags: Option<Vec<String>>,
        remote_tags: Vec<String>,
        fail_tag: bool,
        known_tags: Vec<String>,
        push_attempts: Cell<usize>,
        merges: Cell<usize>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeBackend {
        fn record(&self, call: impl Into<String>) {
            self.calls.borrow_mut().push(call.into());
        }
    }

    impl SnapshotBackend for FakeBackend {
        fn work_tree(&self) -> &Path {
            &self.work_tree
        }

        fn remote_has_branch(&self, _branch: &str) -> Result<bool> {
            self.record("remote_has_branch");
            Ok(self.branch_exists)
        }

        fn fetch_branch(&self, _branch: &str) -> Result<()> {
            self.record("fetch_branch");
            Ok(())
        }

        fn checkout_remote_branch(&self, _branch: &str) -> Result<()> {
            self.record("checkout_remote_branch");
            Ok(())
        }

        fn start_orphan_branch(&self, _branch: &str) -> Result<()> {
            self.record("start_orphan_branch");
            Ok(())
        }

        fn commit_all(&self, _message: &str) -> Result<CommitResult> {
            Ok(CommitResult {
                changed: true,
                id: Some("abc123".into()),
            })
        }

        fn push_branch(&self, _branch: &str) -> Result<PushStatus> {
            let attempt = self.push_attempts.get() + 1;
            self.push_attempts.set(attempt);
            if attempt <= self.reject_pushes {
                Ok(PushStatus::Rejected("fetch first".into()))
            } else {
                Ok(PushStatus::Accepted)
            }
        }

        fn merge_remote_branch(&self, branch: &str) -> Result<()> {
            self.merges.set(self.merges.get() + 1);
            if self.merge_conflicts {
                return Err(RepositoryError::MergeConflict {
                    branch: branch.into(),
                });
            }
            Ok(())
        }

        fn fetch_tags(&self) -> Result<Vec<String>> {
            self.fetch_tags
                .clone()
                .ok_or_else(|| RepositoryError::Git2(git2::Error::from_str("fetch failed")))
        }

        fn remote_tags(&self) -> Result<Vec<String>> {
            Ok(self.remote_tags.clone())
        }

        fn force_tag(&self, _name: &str) -> Result<()> {
            if self.fail_tag {
                return Err(RepositoryError::Git2(git2::Error::from_str("no HEAD")));
            }
            Ok(())
        }

        fn push_tag(&self, _name: &str) -> Result<PushStatus> {
            Ok(PushStatus::Accepted)
        }

        fn checkout_tag(&self, name: &str) -> Result<bool> {
            Ok(self.known_tags.iter().any(|tag| tag == name))
        }

        fn head_id(&self) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn repository(backend: FakeBackend) -> SnapshotRepository<FakeBackend> {
        SnapshotRepository {
            backend,
            branch: "main".into(),
        }
    }

    #[test]
    fn open_tracks_existing_branch() -> anyhow::Result<()> {
        let backend = FakeBackend {
            branch_exists: true,
            ..Default::default()
        };
        let repo = SnapshotRepository::open_working_clone(backend, "main")?;
        assert_eq!(
            *repo.backend().calls.borrow(),
            vec!["remote_has_branch", "fetch_branch", "checkout_remote_branch"]
        );

        Ok(())
    }

    #[test]
    fn open_starts_orphan_branch_when_missing() -> anyhow::Result<()> {
        let repo = SnapshotRepository::open_working_clone(FakeBackend::default(), "main")?;
        assert_eq!(
            *repo.backend().calls.borrow(),
            vec!["remote_has_branch", "start_orphan_branch"]
        );

        Ok(())
    }

    #[test]
    fn push_accepted_first_time() -> anyhow::Result<()> {
        let repo = repository(FakeBackend::default());
        repo.push_branch()?;
        assert_eq!(repo.backend().push_attempts.get(), 1);
        assert_eq!(repo.backend().merges.get(), 0);

        Ok(())
    }

    #[test]
    fn push_retries_once_after_merge() -> anyhow::Result<()> {
        let repo = repository(FakeBackend {
            reject_pushes: 1,
            ..Default::default()
        });
        repo.push_branch()?;
        assert_eq!(repo.backend().push_attempts.get(), 2);
        assert_eq!(repo.backend().merges.get(), 1);

        Ok(())
    }

    #[test]
    fn push_always_rejected_stops_after_two_attempts() {
        let repo = repository(FakeBackend {
            reject_pushes: usize::MAX,
            ..Default::default()
        });
        let result = repo.push_branch();
        assert!(matches!(result, Err(RepositoryError::PushConflict { .. })));
        assert_eq!(repo.backend().push_attempts.get(), 2);
        assert_eq!(repo.backend().merges.get(), 1);
    }

    #[test]
    fn merge_conflict_is_push_conflict() {
        let repo = repository(FakeBackend {
            reject_pushes: 1,
            merge_conflicts: true,
            ..Default::default()
        });
        let result = repo.push_branch();
        assert!(matches!(result, Err(RepositoryError::PushConflict { .. })));
        assert_eq!(repo.backend().push_attempts.get(), 1);
    }

    #[test]
    fn list_tags_sorted_newest_first() -> anyhow::Result<()> {
        let repo = repository(FakeBackend {
            fetch_tags: Some(vec![
                "snapshot-2024-01-01_00-00-00".into(),
                "snapshot-2024-02-01_00-00-00".into(),
            ]),
            ..Default::default()
        });
        assert_eq!(
            repo.list_tags()?,
            vec!["snapshot-2024-02-01_00-00-00", "snapshot-2024-01-01_00-00-00"]
        );

        Ok(())
    }

    #[test]
    fn list_tags_falls_back_to_remote_listing() -> anyhow::Result<()> {
        let remote_tags = vec!["db-2023-01-01_00-00-00".to_string()];
        for fetched in [None, Some(Vec::new())] {
            let repo = repository(FakeBackend {
                fetch_tags: fetched,
                remote_tags: remote_tags.clone(),
                ..Default::default()
            });
            assert_eq!(repo.list_tags()?, remote_tags);
        }

        Ok(())
    }

    #[test]
    fn tag_failure_is_not_fatal() {
        let repo = repository(FakeBackend {
            fail_tag: true,
            ..Default::default()
        });
        assert!(!repo.create_and_push_tag("snapshot-2024-01-01_00-00-00"));
    }

    #[test]
    fn checkout_unknown_tag() {
        let repo = repository(FakeBackend {
            fetch_tags: Some(Vec::new()),
            known_tags: vec!["snapshot-2024-01-01_00-00-00".into()],
            ..Default::default()
        });
        assert!(repo
            .checkout_ref(&SnapshotRef::Tag("snapshot-2024-01-01_00-00-00".into()))
            .is_ok());
        let result = repo.checkout_ref(&SnapshotRef::Tag("snapshot-1999-01-01_00-00-00".into()));
        assert!(matches!(result, Err(RepositoryError::RefNotFound(_))));
    }

    #[test]
    fn checkout_latest_needs_remote_branch() {
        let repo = repository(FakeBackend::default());
        let result = repo.checkout_ref(&SnapshotRef::Latest);
        assert!(matches!(result, Err(RepositoryError::RefNotFound(_))));
    }

    #[sealed_test]
    fn working_clone_removed_unless_retained() -> anyhow::Result<()> {
        let root = std::env::current_dir()?.join("work");
        std::fs::create_dir_all(root.join("clone/stale"))?;

        let clone = WorkingClone::create(&root)?;
        assert!(!clone.clone_dir().join("stale").exists());
        assert!(clone.scratch_dir().is_dir());
        drop(clone);
        assert!(!root.exists());

        let mut clone = WorkingClone::create(&root)?;
        clone.retain();
        drop(clone);
        assert!(root.join("clone").is_dir());

        Ok(())
    }
}
