// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Raw version control operations on a working clone.
//!
//! [`SnapshotRepository`](crate::repository::SnapshotRepository) decides
//! _when_ to fetch, merge, retry, or fall back. The backend only knows _how_
//! to do each of those things once.

use crate::repository::{
    auth::IndicatifPrompter, CommitResult, PushStatus, RepositoryError, Result, REMOTE_NAME,
};

use auth_git2::GitAuthenticator;
use git2::{
    build::CheckoutBuilder, AutotagOption, BranchType, Config, Direction, ErrorClass, ErrorCode,
    FetchOptions, IndexAddOption, ObjectType, PushOptions, RemoteCallbacks, Repository,
    RepositoryInitOptions, Signature,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Namespace that remote tags are listed into, apart from local tags.
const REMOTE_TAGS: &str = "refs/sitesnap/remote-tags";

/// Layer of indirection for version control operations.
pub trait SnapshotBackend {
    /// Root of working clone's work tree.
    fn work_tree(&self) -> &Path;

    /// Contact remote and check whether branch exists there.
    fn remote_has_branch(&self, branch: &str) -> Result<bool>;

    /// Fetch branch into its remote-tracking reference.
    fn fetch_branch(&self, branch: &str) -> Result<()>;

    /// Point local branch at fetched remote branch, and check it out.
    fn checkout_remote_branch(&self, branch: &str) -> Result<()>;

    /// Point HEAD at a branch that has no commits yet.
    fn start_orphan_branch(&self, branch: &str) -> Result<()>;

    /// Stage whole work tree, and commit only if it differs from HEAD.
    fn commit_all(&self, message: &str) -> Result<CommitResult>;

    /// Push local branch to remote once.
    fn push_branch(&self, branch: &str) -> Result<PushStatus>;

    /// Fetch branch and merge it into HEAD.
    fn merge_remote_branch(&self, branch: &str) -> Result<()>;

    /// Fetch every remote tag, and list local tags afterwards.
    fn fetch_tags(&self) -> Result<Vec<String>>;

    /// List tags the remote advertises, leaving local tags untouched.
    fn remote_tags(&self) -> Result<Vec<String>>;

    /// Create or move lightweight tag to HEAD.
    fn force_tag(&self, name: &str) -> Result<()>;

    /// Force push tag to remote once.
    fn push_tag(&self, name: &str) -> Result<PushStatus>;

    /// Detach HEAD at tag. Return `false` if tag does not exist.
    fn checkout_tag(&self, name: &str) -> Result<bool>;

    /// Commit at HEAD, if any.
    fn head_id(&self) -> Result<Option<String>>;
}

/// Version control through libgit2.
pub struct Git2Backend {
    repository: Repository,
    work_tree: PathBuf,
    url: String,
    git_config: Config,
    authenticator: GitAuthenticator,
    bar: ProgressBar,
}

impl Git2Backend {
    /// Initialize new repository at target path with one remote.
    ///
    /// Network transfers report their progress through the given bar. If
    /// credentials are needed, the operator is prompted, and the bar is
    /// suspended while doing so.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::Git2`] if repository cannot be initialized.
    /// - Return [`RepositoryError::IndicatifStyleTemplate`] if progress bar
    ///   style is invalid.
    #[instrument(skip(path, url, bar), level = "debug")]
    pub fn init(path: impl AsRef<Path>, url: impl Into<String>, bar: ProgressBar) -> Result<Self> {
        let url = url.into();
        debug!("initialize working clone at {:?}", path.as_ref().display());

        let mut opts = RepositoryInitOptions::new();
        opts.no_reinit(true);
        let repository = Repository::init_opts(path.as_ref(), &opts)?;
        repository.remote(REMOTE_NAME, &url)?;

        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(url.clone());

        let prompter = IndicatifPrompter::new(bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let git_config = repository.config()?;

        Ok(Self {
            work_tree: path.as_ref().to_path_buf(),
            repository,
            url,
            git_config,
            authenticator,
            bar,
        })
    }

    fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut throttle = time::Instant::now();
        let bar = self.bar.clone();

        let mut rc = RemoteCallbacks::new();
        rc.credentials(self.authenticator.credentials(&self.git_config));
        rc.transfer_progress(move |progress| {
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                bar.set_length(progress.total_objects() as u64);
                bar.set_position(progress.received_objects() as u64);
            }
            true
        });

        rc
    }

    fn fetch_refspecs(&self, refspecs: &[&str]) -> Result<()> {
        let mut remote = self.repository.find_remote(REMOTE_NAME)?;
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.callbacks());
        fo.download_tags(AutotagOption::None);

        let result = remote.fetch(refspecs, Some(&mut fo), None);
        self.bar.finish_and_clear();
        result.map_err(|err| self.transport_error(err))
    }

    fn push_refspec(&self, refspec: &str) -> Result<PushStatus> {
        let mut remote = self.repository.find_remote(REMOTE_NAME)?;
        let rejection: RefCell<Option<String>> = RefCell::new(None);

        let mut rc = self.callbacks();
        rc.push_update_reference(|refname, status| {
            if let Some(message) = status {
                *rejection.borrow_mut() = Some(format!("{refname}: {message}"));
            }
            Ok(())
        });
        let mut po = PushOptions::new();
        po.remote_callbacks(rc);

        let result = remote.push(&[refspec], Some(&mut po));
        self.bar.finish_and_clear();
        match result {
            Ok(()) => {}
            Err(err) if err.code() == ErrorCode::NotFastForward => {
                return Ok(PushStatus::Rejected(err.message().to_string()));
            }
            Err(err) => return Err(self.transport_error(err)),
        }

        match rejection.take() {
            Some(reason) => Ok(PushStatus::Rejected(reason)),
            None => Ok(PushStatus::Accepted),
        }
    }

    // INVARIANT: Never ask the connection for its ref advertisement.
    //   - libgit2 hands back a null list for remotes without any refs.
    fn ensure_reachable(&self) -> Result<()> {
        let mut remote = self.repository.find_remote(REMOTE_NAME)?;
        remote
            .connect_auth(Direction::Fetch, Some(self.callbacks()), None)
            .map_err(|err| RepositoryError::RemoteUnreachable {
                source: err,
                url: self.url.clone(),
            })?;

        Ok(())
    }

    fn reference_names(&self, glob: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for reference in self.repository.references_glob(glob)? {
            if let Some(name) = reference?.name() {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }

    fn signature(&self) -> Result<Signature<'static>> {
        // INVARIANT: Always have an identity, even if user never configured one.
        Ok(self
            .repository
            .signature()
            .or_else(|_| Signature::now("sitesnap", "sitesnap@localhost"))?)
    }

    fn checkout_head_forced(&self) -> Result<()> {
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repository.checkout_head(Some(&mut checkout))?;
        Ok(())
    }

    fn transport_error(&self, err: git2::Error) -> RepositoryError {
        let is_transport = matches!(
            err.class(),
            ErrorClass::Net | ErrorClass::Ssh | ErrorClass::Http | ErrorClass::Ssl
        ) || err.code() == ErrorCode::Auth;

        if is_transport {
            RepositoryError::RemoteUnreachable {
                source: err,
                url: self.url.clone(),
            }
        } else {
            RepositoryError::Git2(err)
        }
    }
}

impl SnapshotBackend for Git2Backend {
    fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    #[instrument(skip(self), level = "debug")]
    fn remote_has_branch(&self, branch: &str) -> Result<bool> {
        self.ensure_reachable()?;
        self.fetch_refspecs(&[&format!("+refs/heads/*:refs/remotes/{REMOTE_NAME}/*")])?;

        let tracking = format!("refs/remotes/{REMOTE_NAME}/{branch}");
        match self.repository.find_reference(&tracking) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn fetch_branch(&self, branch: &str) -> Result<()> {
        info!("fetch {branch:?} from {}", self.url);
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{REMOTE_NAME}/{branch}");
        self.fetch_refspecs(&[&refspec])
    }

    #[instrument(skip(self), level = "debug")]
    fn checkout_remote_branch(&self, branch: &str) -> Result<()> {
        let commit = self
            .repository
            .find_reference(&format!("refs/remotes/{REMOTE_NAME}/{branch}"))?
            .peel_to_commit()?;

        // INVARIANT: Move branch reference directly, it may already be HEAD.
        let local = format!("refs/heads/{branch}");
        self.repository
            .reference(&local, commit.id(), true, "sitesnap: track remote branch")?;
        self.repository
            .find_branch(branch, BranchType::Local)?
            .set_upstream(Some(&format!("{REMOTE_NAME}/{branch}")))?;
        self.repository.set_head(&local)?;
        self.checkout_head_forced()
    }

    #[instrument(skip(self), level = "debug")]
    fn start_orphan_branch(&self, branch: &str) -> Result<()> {
        self.repository.set_head(&format!("refs/heads/{branch}"))?;
        Ok(())
    }

    #[instrument(skip(self, message), level = "debug")]
    fn commit_all(&self, message: &str) -> Result<CommitResult> {
        let mut index = self.repository.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = self
            .repository
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());

        // INVARIANT: Only commit if stage differs from HEAD.
        let unchanged = match &parent {
            Some(commit) => commit.tree_id() == tree_id,
            None => index.is_empty(),
        };
        if unchanged {
            return Ok(CommitResult {
                changed: false,
                id: parent.map(|commit| commit.id().to_string()),
            });
        }

        let tree = self.repository.find_tree(tree_id)?;
        let signature = self.signature()?;
        let parents = parent.iter().collect::<Vec<_>>();
        let oid = self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;

        Ok(CommitResult {
            changed: true,
            id: Some(oid.to_string()),
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn push_branch(&self, branch: &str) -> Result<PushStatus> {
        info!("push {branch:?} to {}", self.url);
        self.push_refspec(&format!("refs/heads/{branch}:refs/heads/{branch}"))
    }

    #[instrument(skip(self), level = "debug")]
    fn merge_remote_branch(&self, branch: &str) -> Result<()> {
        self.fetch_branch(branch)?;
        let remote_ref = self
            .repository
            .find_reference(&format!("refs/remotes/{REMOTE_NAME}/{branch}"))?;
        let theirs = self.repository.reference_to_annotated_commit(&remote_ref)?;
        let (analysis, _) = self.repository.merge_analysis(&[&theirs])?;

        if analysis.is_up_to_date() {
            debug!("already up to date with remote");
            return Ok(());
        }

        let local = format!("refs/heads/{branch}");
        if analysis.is_fast_forward() || analysis.is_unborn() {
            debug!("fast-forward to remote");
            self.repository
                .reference(&local, theirs.id(), true, "sitesnap: fast-forward")?;
            self.repository.set_head(&local)?;
            return self.checkout_head_forced();
        }

        let ours = self.repository.head()?.peel_to_commit()?;
        let theirs = self.repository.find_commit(theirs.id())?;
        let mut merged = self.repository.merge_commits(&ours, &theirs, None)?;
        if merged.has_conflicts() {
            return Err(RepositoryError::MergeConflict {
                branch: branch.to_string(),
            });
        }

        let tree_id = merged.write_tree_to(&self.repository)?;
        let tree = self.repository.find_tree(tree_id)?;
        let signature = self.signature()?;
        self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &format!("Merge branch '{branch}' of {}", self.url),
            &tree,
            &[&ours, &theirs],
        )?;

        self.checkout_head_forced()
    }

    #[instrument(skip(self), level = "debug")]
    fn fetch_tags(&self) -> Result<Vec<String>> {
        self.fetch_refspecs(&["+refs/tags/*:refs/tags/*"])?;
        Ok(self
            .repository
            .tag_names(None)?
            .iter()
            .flatten()
            .map(ToString::to_string)
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    fn remote_tags(&self) -> Result<Vec<String>> {
        self.ensure_reachable()?;
        self.fetch_refspecs(&[&format!("+refs/tags/*:{REMOTE_TAGS}/*")])?;

        let mut tags = self
            .reference_names(&format!("{REMOTE_TAGS}/*"))?
            .into_iter()
            .filter_map(|name| {
                name.strip_prefix(&format!("{REMOTE_TAGS}/"))
                    .map(ToString::to_string)
            })
            .collect::<Vec<_>>();
        tags.sort();

        Ok(tags)
    }

    #[instrument(skip(self), level = "debug")]
    fn force_tag(&self, name: &str) -> Result<()> {
        let head = self.repository.head()?.peel(ObjectType::Commit)?;
        self.repository.tag_lightweight(name, &head, true)?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn push_tag(&self, name: &str) -> Result<PushStatus> {
        self.push_refspec(&format!("+refs/tags/{name}:refs/tags/{name}"))
    }

    #[instrument(skip(self), level = "debug")]
    fn checkout_tag(&self, name: &str) -> Result<bool> {
        let reference = match self.repository.find_reference(&format!("refs/tags/{name}")) {
            Ok(reference) => reference,
            Err(err) if matches!(err.code(), ErrorCode::NotFound | ErrorCode::InvalidSpec) => {
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        let commit = reference.peel_to_commit()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repository
            .checkout_tree(commit.as_object(), Some(&mut checkout))?;
        self.repository.set_head_detached(commit.id())?;

        Ok(true)
    }

    fn head_id(&self) -> Result<Option<String>> {
        Ok(self
            .repository
            .head()
            .ok()
            .and_then(|head| head.target())
            .map(|oid| oid.to_string()))
    }
}
