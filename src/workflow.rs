// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Push, pull, and fix workflows.
//!
//! A __push__ captures configuration trees, uploaded files, and the database
//! of the local site in one commit on the tracked branch, and marks it with a
//! fresh timestamped tag. A __pull__ checks out the branch head or a chosen
//! tag, and disperses its payloads back onto the local site. A __fix__ only
//! repairs permissions and reruns the site hooks.
//!
//! Every workflow checks its prerequisites before touching anything. Inside a
//! push, payloads are staged in a fixed order (configuration, uploaded files,
//! database) followed by a single commit, a single push, and the tag. A failed
//! database export therefore aborts before anything reaches the remote.

use crate::{
    config::{SyncConfig, SyncMode},
    database::{
        DatabaseError, DatabaseExporter, DatabaseImporter, ImportReport, CLIENT_PROGRAM,
        DUMP_PROGRAM,
    },
    path::{self, NoWayHome},
    prompt::{PromptError, Prompter},
    repository::{CommitResult, Git2Backend, RepositoryError, SnapshotRepository, WorkingClone},
    select::{SelectError, SnapshotRef, TagSelector},
    snapshot::{
        mirror::normalize_permissions, Payload, SnapshotBuilder, SnapshotError, StagingReport,
    },
    syscall::{Call, Syscall},
    tag::TagName,
};

use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Outcome of a push.
#[derive(Debug)]
pub struct PushSummary {
    /// Tag meant to mark the snapshot.
    pub tag: String,

    /// Result of committing the staged payloads.
    pub commit: CommitResult,

    /// Whether the branch reached the remote.
    pub pushed: bool,

    /// Whether the tag reached the remote.
    pub tagged: bool,

    /// Non-fatal staging trouble.
    pub staging: StagingReport,
}

/// Outcome of a pull.
#[derive(Debug)]
pub struct PullSummary {
    /// Reference that was checked out.
    pub target: SnapshotRef,

    /// Non-fatal trouble applying trees.
    pub staging: StagingReport,

    /// Database import outcome, if database was pulled.
    pub import: Option<ImportReport>,

    /// Hooks that failed.
    pub failed_hooks: Vec<String>,
}

/// Outcome of a fix.
#[derive(Debug, Default)]
pub struct FixSummary {
    /// Trees whose permissions were normalized.
    pub normalized: Vec<PathBuf>,

    /// Number of entries whose permissions could not be changed.
    pub permission_failures: usize,

    /// Hooks that failed.
    pub failed_hooks: Vec<String>,
}

/// Orchestrate snapshot workflows for one site.
pub struct Workflow<'a, S, P>
where
    S: Syscall,
    P: Prompter,
{
    config: &'a SyncConfig,
    syscall: &'a S,
    prompter: P,
    bar: ProgressBar,
}

impl<'a, S, P> Workflow<'a, S, P>
where
    S: Syscall,
    P: Prompter,
{
    /// Construct new workflow.
    ///
    /// Network transfers report progress through `bar`.
    pub fn new(config: &'a SyncConfig, syscall: &'a S, prompter: P, bar: ProgressBar) -> Self {
        Self {
            config,
            syscall,
            prompter,
            bar,
        }
    }

    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    /// Push a new snapshot tagged with the current local time.
    ///
    /// # Errors
    ///
    /// - Return [`WorkflowError::PrerequisiteMissing`] before doing anything if
    ///   a required tool or directory is absent.
    /// - Return [`WorkflowError::Aborted`] if operator declines.
    /// - Return [`WorkflowError::Snapshot`] if database export fails.
    /// - Return [`WorkflowError::Repository`] if branch cannot be pushed.
    pub fn push(&mut self) -> Result<PushSummary> {
        self.push_as(TagName::now(&self.config.snapshot.tag_type))
    }

    /// Push a new snapshot marked with given tag.
    ///
    /// The tag timestamp also stamps the database dump.
    ///
    /// # Errors
    ///
    /// - Return [`WorkflowError::PrerequisiteMissing`] before doing anything if
    ///   a required tool or directory is absent.
    /// - Return [`WorkflowError::Aborted`] if operator declines.
    /// - Return [`WorkflowError::Snapshot`] if database export fails.
    /// - Return [`WorkflowError::Repository`] if branch cannot be pushed.
    #[instrument(skip(self, tag), fields(tag = %tag), level = "debug")]
    pub fn push_as(&mut self, tag: TagName) -> Result<PushSummary> {
        self.require_site_root()?;
        self.require_database_client(DUMP_PROGRAM)?;

        let files = self.wants(Payload::UploadedFiles, self.config.sync.files)?;
        let database = self.wants(Payload::Database, self.config.sync.database)?;
        self.confirm(&format!(
            "push snapshot of {:?} to {}?",
            self.config.site.root.display(),
            self.config.remote.url
        ))?;

        let mut clone = self.working_clone()?;
        let backend =
            Git2Backend::init(clone.clone_dir(), &self.config.remote.url, self.bar.clone())?;
        let repository =
            SnapshotRepository::open_working_clone(backend, &self.config.remote.branch)?;

        let builder = SnapshotBuilder::new(repository.work_tree(), self.config);
        let mut staging = builder.stage_configuration()?;
        if files {
            staging.merge(builder.stage_uploaded_files()?);
        }
        if database {
            let exporter = DatabaseExporter::new(self.syscall, &self.config.database);
            builder.stage_database_dump(&exporter, clone.scratch_dir(), tag.timestamp())?;
        }

        let tag = tag.to_string();
        let commit = repository.commit_all(&format!("snapshot {tag}"))?;
        if repository.head_id()?.is_none() {
            warn!("nothing was staged, so there is no snapshot to push");
            return Ok(PushSummary {
                tag,
                commit,
                pushed: false,
                tagged: false,
                staging,
            });
        }

        if let Err(error) = repository.push_branch() {
            if matches!(error, RepositoryError::PushConflict { .. }) {
                clone.retain();
            }
            return Err(error.into());
        }

        let tagged = repository.create_and_push_tag(&tag);
        if self.config.snapshot.retain_working_clone {
            clone.retain();
        }

        Ok(PushSummary {
            tag,
            commit,
            pushed: true,
            tagged,
            staging,
        })
    }

    /// Pull snapshot onto the local site.
    ///
    /// Without a target, the operator picks one from the remote tag listing.
    ///
    /// # Errors
    ///
    /// - Return [`WorkflowError::PrerequisiteMissing`] before doing anything if
    ///   a required tool or directory is absent.
    /// - Return [`WorkflowError::Select`] or [`WorkflowError::Aborted`] if
    ///   operator backs out.
    /// - Return [`WorkflowError::Repository`] if target cannot be checked out.
    /// - Return [`WorkflowError::Database`] if database import fails.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&mut self, target: Option<SnapshotRef>) -> Result<PullSummary> {
        self.require_site_root()?;
        self.require_database_client(CLIENT_PROGRAM)?;
        self.require_hooks()?;

        let mut clone = self.working_clone()?;
        let backend =
            Git2Backend::init(clone.clone_dir(), &self.config.remote.url, self.bar.clone())?;
        let repository = SnapshotRepository::attach(backend, &self.config.remote.branch);

        let target = match target {
            Some(target) => target,
            None => {
                let tags = repository.list_tags()?;
                TagSelector::new(tags, self.config.snapshot.page_size).choose(&mut self.prompter)?
            }
        };

        let files = self.wants(Payload::UploadedFiles, self.config.sync.files)?;
        let database = self.wants(Payload::Database, self.config.sync.database)?;
        self.confirm(&format!(
            "pull snapshot {target} into {:?}? local files will be overwritten",
            self.config.site.root.display()
        ))?;

        repository.checkout_ref(&target)?;
        let builder = SnapshotBuilder::new(repository.work_tree(), self.config);
        let mut staging = builder.apply_configuration();
        if files {
            staging.merge(builder.apply_uploaded_files());
        }

        let import = if database {
            match builder.database_dump()? {
                Some(dump) => {
                    let importer = DatabaseImporter::new(self.syscall, &self.config.database);
                    Some(importer.import(dump, clone.scratch_dir())?)
                }
                None => {
                    warn!("snapshot {target} carries no database dump");
                    None
                }
            }
        } else {
            None
        };

        let failed_hooks = self.run_hooks();
        if self.config.snapshot.retain_working_clone {
            clone.retain();
        }

        Ok(PullSummary {
            target,
            staging,
            import,
            failed_hooks,
        })
    }

    /// Repair permissions of site trees and rerun site hooks.
    ///
    /// # Errors
    ///
    /// - Return [`WorkflowError::PrerequisiteMissing`] if site root or a hook
    ///   program is absent.
    #[instrument(skip(self), level = "debug")]
    pub fn fix(&mut self) -> Result<FixSummary> {
        self.require_site_root()?;
        self.require_hooks()?;

        let mut summary = FixSummary::default();
        let site = &self.config.site;
        let trees = site
            .config_dirs
            .iter()
            .chain(std::iter::once(&site.files_dir))
            .map(|dir| site.root.join(dir));

        for tree in trees {
            if !tree.is_dir() {
                info!("skip {:?}, it does not exist", tree.display());
                continue;
            }

            let failures = normalize_permissions(&tree);
            for failure in &failures {
                warn!("{failure}");
            }
            summary.permission_failures += failures.len();
            summary.normalized.push(tree);
        }

        summary.failed_hooks = self.run_hooks();

        Ok(summary)
    }

    /// List snapshot tags of remote, newest first.
    ///
    /// # Errors
    ///
    /// - Return [`WorkflowError::Repository`] if remote cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn tags(&mut self) -> Result<Vec<String>> {
        let clone = self.working_clone()?;
        let backend =
            Git2Backend::init(clone.clone_dir(), &self.config.remote.url, self.bar.clone())?;
        let repository = SnapshotRepository::attach(backend, &self.config.remote.branch);

        Ok(repository.list_tags()?)
    }

    fn working_clone(&self) -> Result<WorkingClone> {
        let root = match &self.config.snapshot.work_dir {
            Some(dir) => dir.clone(),
            None => path::default_work_dir()?,
        };

        Ok(WorkingClone::create(root)?)
    }

    fn wants(&mut self, category: Payload, mode: SyncMode) -> Result<bool> {
        let wanted = match mode {
            SyncMode::Auto => true,
            SyncMode::Skip => false,
            SyncMode::Ask => self.prompter.confirm(&format!("sync {category}?"), false)?,
        };

        if !wanted {
            info!("skip {category}");
        }

        Ok(wanted)
    }

    fn confirm(&mut self, message: &str) -> Result<()> {
        if self.prompter.confirm(message, false)? {
            Ok(())
        } else {
            Err(WorkflowError::Aborted)
        }
    }

    fn require_site_root(&self) -> Result<()> {
        if self.config.site.root.is_dir() {
            return Ok(());
        }

        Err(WorkflowError::PrerequisiteMissing {
            what: format!("site root {:?}", self.config.site.root.display()),
            remedy: "point site.root or SITESNAP_SITE_ROOT at an existing site".into(),
        })
    }

    fn require_database_client(&self, program: &str) -> Result<()> {
        if self.config.sync.database == SyncMode::Skip {
            return Ok(());
        }

        self.syscall
            .require(program)
            .map_err(|_| WorkflowError::PrerequisiteMissing {
                what: format!("database client {program:?}"),
                remedy: "install the MySQL client tools, or set sync.database to \"skip\"".into(),
            })?;

        Ok(())
    }

    // INVARIANT: Programs given by path may only appear after an earlier hook
    // ran, e.g., vendored binaries, so only bare names are looked up.
    fn require_hooks(&self) -> Result<()> {
        for (name, hook) in self.hooks() {
            let Some(program) = hook.first() else {
                return Err(WorkflowError::PrerequisiteMissing {
                    what: format!("program of {name} hook"),
                    remedy: format!("give hooks.{name} a program to run, or remove it"),
                });
            };

            if Path::new(program).components().count() > 1 {
                continue;
            }

            self.syscall
                .require(program)
                .map_err(|_| WorkflowError::PrerequisiteMissing {
                    what: format!("{name} hook program {program:?}"),
                    remedy: format!("install {program:?}, or change hooks.{name}"),
                })?;
        }

        Ok(())
    }

    fn hooks(&self) -> Vec<(&'static str, &'a [String])> {
        let config: &'a SyncConfig = self.config;
        let hooks = &config.hooks;
        [("install", &hooks.install), ("clear_cache", &hooks.clear_cache)]
            .into_iter()
            .filter_map(|(name, hook)| hook.as_deref().map(|hook| (name, hook)))
            .collect()
    }

    // Hook failures never fail the run. Return names of failed hooks.
    fn run_hooks(&self) -> Vec<String> {
        let mut failed = Vec::new();
        for (name, hook) in self.hooks() {
            let Some((program, args)) = hook.split_first() else {
                continue;
            };

            let call = Call::new(program)
                .args(args)
                .current_dir(&self.config.site.root);
            info!("run {name} hook: {call}");

            let result = self.syscall.call(&call).and_then(|output| output.checked(&call));
            if let Err(error) = result {
                warn!("{name} hook failed: {error}");
                failed.push(name.to_string());
            }
        }

        failed
    }
}

/// Workflow error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Required tool, directory, or setting is absent.
    #[error("{what} is missing: {remedy}")]
    PrerequisiteMissing { what: String, remedy: String },

    /// Operator declined to continue.
    #[error("aborted by operator, nothing was changed")]
    Aborted,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

/// Friendly result alias :3
pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;
