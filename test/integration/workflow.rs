// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{touch, FakeDatabase, RepoFixture};

use anyhow::Result;
use chrono::NaiveDateTime;
use indicatif::ProgressBar;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use sitesnap::{
    config::{SyncConfig, SyncMode},
    prompt::ScriptedPrompter,
    repository::RepositoryError,
    select::SnapshotRef,
    syscall::{Call, CallOutput, Syscall},
    tag::{TagName, TIMESTAMP_FORMAT},
    workflow::{Workflow, WorkflowError},
};
use std::{
    env::current_dir,
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};

fn site_config(remote: &RepoFixture, site: &str) -> Result<SyncConfig> {
    let cwd = current_dir()?;
    let mut config = SyncConfig::default();
    config.remote.url = remote.url();
    config.site.root = cwd.join(site);
    config.database.name = "acme".into();
    config.database.user = "acme".into();
    config.sync.files = SyncMode::Auto;
    config.snapshot.work_dir = Some(cwd.join(format!("{site}-work")));
    create_dir_all(&config.site.root)?;

    Ok(config)
}

fn tag(timestamp: &str) -> Result<TagName> {
    Ok(TagName::new(
        "snapshot",
        NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)?,
    ))
}

#[sealed_test]
fn push_then_pull_between_sites() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;

    let config = site_config(&remote, "staging")?;
    touch("staging/application/config/app.php", "<?php return ['env' => 'staging'];");
    touch("staging/application/node_modules/left-pad/index.js", "pad");
    touch("staging/application/files/1/logo.png", "png");
    touch("staging/packages/blog/controller.php", "<?php");
    let dumper = FakeDatabase::new("CREATE TABLE Pages (id int);");

    let mut workflow = Workflow::new(
        &config,
        &dumper,
        ScriptedPrompter::new(["y"]),
        ProgressBar::hidden(),
    );
    let summary = workflow.push_as(tag("2024-01-05_10-00-00")?)?;
    assert!(summary.pushed);
    assert!(summary.tagged);
    assert!(summary.commit.changed);
    assert!(summary.staging.is_complete());
    assert_eq!(summary.tag, "snapshot-2024-01-05_10-00-00");
    assert!(!Path::new("staging-work").exists());

    assert_eq!(remote.tag_names()?, vec!["snapshot-2024-01-05_10-00-00"]);
    assert!(remote.read_file("main", "files/1/logo.png")?.is_some());
    assert!(remote.read_file("main", "packages/blog/controller.php")?.is_some());
    assert!(remote.read_file("main", "database/latest.sql.gz")?.is_some());
    assert!(remote
        .read_file("main", "database/acme_2024-01-05_10-00-00.sql.gz")?
        .is_some());
    assert_eq!(
        remote.read_file("main", "application/node_modules/left-pad/index.js")?,
        None
    );

    let config = site_config(&remote, "production")?;
    touch("production/application/config/local.php", "<?php // keep me");
    let restorer = FakeDatabase::default();

    let mut workflow = Workflow::new(
        &config,
        &restorer,
        ScriptedPrompter::new(["y"]),
        ProgressBar::hidden(),
    );
    let summary = workflow.pull(Some(SnapshotRef::Tag("snapshot-2024-01-05_10-00-00".into())))?;
    assert!(summary.staging.is_complete());
    assert_eq!(summary.import.map(|import| import.tables), Some(3));
    assert!(summary.failed_hooks.is_empty());

    assert_eq!(
        read_to_string("production/application/config/app.php")?,
        "<?php return ['env' => 'staging'];"
    );
    assert_eq!(read_to_string("production/application/files/1/logo.png")?, "png");
    assert_eq!(
        read_to_string("production/application/config/local.php")?,
        "<?php // keep me"
    );
    assert_eq!(
        *restorer.restored.borrow(),
        vec!["CREATE TABLE Pages (id int);".to_string()]
    );

    Ok(())
}

#[sealed_test]
fn every_push_adds_a_tag() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let mut config = site_config(&remote, "site")?;
    config.sync.database = SyncMode::Skip;
    touch("site/application/config/app.php", "<?php");
    let tools = FakeDatabase::default();

    let stamps = ["2024-01-01_00-00-00", "2024-01-02_00-00-00", "2024-01-03_00-00-00"];
    let mut changed = Vec::new();
    for stamp in stamps {
        let mut workflow = Workflow::new(
            &config,
            &tools,
            ScriptedPrompter::new(["y"]),
            ProgressBar::hidden(),
        );
        changed.push(workflow.push_as(tag(stamp)?)?.commit.changed);
    }

    // Nothing changed after the first push, but every push is still tagged.
    assert_eq!(changed, vec![true, false, false]);
    assert!(tools.calls.borrow().is_empty());

    let first = remote.commit_of("snapshot-2024-01-01_00-00-00")?;
    assert_eq!(remote.commit_of("snapshot-2024-01-02_00-00-00")?, first);
    assert_eq!(remote.commit_of("snapshot-2024-01-03_00-00-00")?, first);

    let mut workflow = Workflow::new(
        &config,
        &tools,
        ScriptedPrompter::default(),
        ProgressBar::hidden(),
    );
    assert_eq!(
        workflow.tags()?,
        vec![
            "snapshot-2024-01-03_00-00-00",
            "snapshot-2024-01-02_00-00-00",
            "snapshot-2024-01-01_00-00-00"
        ]
    );

    Ok(())
}

#[sealed_test]
fn pull_older_snapshot_through_selector() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let mut config = site_config(&remote, "site")?;
    config.sync.database = SyncMode::Skip;
    let tools = FakeDatabase::default();

    for (stamp, version) in [("2024-01-01_00-00-00", "v1"), ("2024-02-01_00-00-00", "v2")] {
        touch("site/application/config/version.txt", version);
        let mut workflow = Workflow::new(
            &config,
            &tools,
            ScriptedPrompter::new(["y"]),
            ProgressBar::hidden(),
        );
        workflow.push_as(tag(stamp)?)?;
    }

    // Pick second newest tag, then confirm.
    let mut workflow = Workflow::new(
        &config,
        &tools,
        ScriptedPrompter::new(["2", "y"]),
        ProgressBar::hidden(),
    );
    let summary = workflow.pull(None)?;
    assert_eq!(
        summary.target,
        SnapshotRef::Tag("snapshot-2024-01-01_00-00-00".into())
    );
    assert_eq!(summary.import.map(|import| import.tables), None);

    // Older snapshot wins over newer local file.
    assert_eq!(read_to_string("site/application/config/version.txt")?, "v1");

    Ok(())
}

#[sealed_test]
fn failed_export_publishes_nothing() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let config = site_config(&remote, "site")?;
    touch("site/application/config/app.php", "<?php");

    struct BrokenDump;

    impl sitesnap::syscall::Syscall for BrokenDump {
        fn call(
            &self,
            _: &sitesnap::syscall::Call,
        ) -> sitesnap::syscall::Result<sitesnap::syscall::CallOutput> {
            Ok(sitesnap::syscall::CallOutput {
                code: Some(2),
                stdout: String::new(),
                stderr: "mysqldump: Got error: 1045: Access denied".into(),
            })
        }

        fn require(&self, program: &str) -> sitesnap::syscall::Result<std::path::PathBuf> {
            Ok(std::path::PathBuf::from(program))
        }
    }

    let mut workflow = Workflow::new(
        &config,
        &BrokenDump,
        ScriptedPrompter::new(["y"]),
        ProgressBar::hidden(),
    );
    assert!(workflow.push_as(tag("2024-01-05_10-00-00")?).is_err());
    assert!(remote.tag_names()?.is_empty());
    assert!(remote.read_file("main", "application/config/app.php").is_err());

    Ok(())
}

#[sealed_test]
fn push_conflict_keeps_working_clone() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    remote.stage_and_commit("application/config/app.php", "base")?;
    let config = site_config(&remote, "site")?;
    touch("site/application/config/app.php", "ours");

    // Another environment pushes while the database is being dumped.
    struct RacingDump<'a> {
        remote: &'a RepoFixture,
    }

    impl Syscall for RacingDump<'_> {
        fn call(&self, call: &Call) -> sitesnap::syscall::Result<CallOutput> {
            if let Some(stdout) = call.stdout_path() {
                write(stdout, "-- dump").unwrap();
                self.remote
                    .stage_and_commit("application/config/app.php", "theirs")
                    .unwrap();
            }

            Ok(CallOutput::success_with(""))
        }

        fn require(&self, program: &str) -> sitesnap::syscall::Result<PathBuf> {
            Ok(PathBuf::from(program))
        }
    }

    let tools = RacingDump { remote: &remote };
    let mut workflow = Workflow::new(
        &config,
        &tools,
        ScriptedPrompter::new(["y"]),
        ProgressBar::hidden(),
    );
    let result = workflow.push_as(tag("2024-01-05_10-00-00")?);
    assert!(matches!(
        result,
        Err(WorkflowError::Repository(RepositoryError::PushConflict { .. }))
    ));

    assert_eq!(
        read_to_string("site-work/clone/application/config/app.php")?,
        "ours"
    );
    assert!(remote.tag_names()?.is_empty());
    assert_eq!(
        remote.read_file("main", "application/config/app.php")?,
        Some("theirs".into())
    );

    Ok(())
}
