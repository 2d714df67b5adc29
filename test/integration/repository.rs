// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{touch, RepoFixture};

use anyhow::Result;
use indicatif::ProgressBar;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use sitesnap::{
    repository::{Git2Backend, RepositoryError, SnapshotRepository},
    select::SnapshotRef,
};
use std::{env::current_dir, fs::read_to_string, path::Path};

fn open(remote: &RepoFixture, path: impl AsRef<Path>) -> Result<SnapshotRepository> {
    let backend = Git2Backend::init(path, remote.url(), ProgressBar::hidden())?;
    Ok(SnapshotRepository::open_working_clone(backend, "main")?)
}

#[sealed_test]
fn first_push_starts_branch() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let repo = open(&remote, current_dir()?.join("clone"))?;

    touch("clone/application/config/app.php", "<?php");
    let commit = repo.commit_all("snapshot one")?;
    assert!(commit.changed);
    repo.push_branch()?;

    assert_eq!(
        remote.read_file("main", "application/config/app.php")?,
        Some("<?php".into())
    );

    Ok(())
}

#[sealed_test]
fn empty_remote_starts_orphan_branch() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let repo = open(&remote, current_dir()?.join("clone"))?;

    assert_eq!(repo.head_id()?, None);
    assert!(repo.list_tags()?.is_empty());
    assert!(remote.tag_names()?.is_empty());

    Ok(())
}

#[sealed_test]
fn commit_without_changes_is_noop() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let repo = open(&remote, current_dir()?.join("clone"))?;

    touch("clone/files/logo.png", "png");
    let first = repo.commit_all("snapshot one")?;
    let second = repo.commit_all("snapshot two")?;
    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(first.id, second.id);

    Ok(())
}

#[sealed_test]
fn nothing_staged_makes_no_commit() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let repo = open(&remote, current_dir()?.join("clone"))?;

    let commit = repo.commit_all("snapshot")?;
    assert!(!commit.changed);
    assert_eq!(commit.id, None);
    assert_eq!(repo.head_id()?, None);

    Ok(())
}

#[sealed_test]
fn rejected_push_merges_and_retries() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    remote.stage_and_commit("README", "snapshots")?;
    let repo = open(&remote, current_dir()?.join("clone"))?;
    assert_eq!(read_to_string("clone/README")?, "snapshots");

    touch("clone/application/config/app.php", "<?php");
    repo.commit_all("snapshot")?;

    // Another environment pushes in between.
    remote.stage_and_commit("other.txt", "from elsewhere")?;
    repo.push_branch()?;

    assert_eq!(
        remote.read_file("main", "application/config/app.php")?,
        Some("<?php".into())
    );
    assert_eq!(
        remote.read_file("main", "other.txt")?,
        Some("from elsewhere".into())
    );
    assert_eq!(remote.read_file("main", "README")?, Some("snapshots".into()));

    Ok(())
}

#[sealed_test]
fn conflicting_push_is_reported() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    remote.stage_and_commit("config.php", "base")?;
    let repo = open(&remote, current_dir()?.join("clone"))?;

    touch("clone/config.php", "ours");
    repo.commit_all("snapshot")?;
    remote.stage_and_commit("config.php", "theirs")?;

    let result = repo.push_branch();
    assert!(matches!(result, Err(RepositoryError::PushConflict { .. })));
    assert_eq!(remote.read_file("main", "config.php")?, Some("theirs".into()));

    Ok(())
}

#[sealed_test]
fn tags_listed_newest_first_and_checked_out() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let repo = open(&remote, current_dir()?.join("clone"))?;

    let tags = [
        "snapshot-2024-01-01_00-00-00",
        "snapshot-2024-03-01_00-00-00",
        "snapshot-2024-02-01_00-00-00",
    ];
    for (number, tag) in tags.iter().enumerate() {
        touch("clone/application/version.txt", &number.to_string());
        repo.commit_all(&format!("snapshot {tag}"))?;
        repo.push_branch()?;
        assert!(repo.create_and_push_tag(tag));
    }

    let mut expect = tags.to_vec();
    expect.sort();
    assert_eq!(remote.tag_names()?, expect);

    let backend = Git2Backend::init(
        current_dir()?.join("reader"),
        remote.url(),
        ProgressBar::hidden(),
    )?;
    let reader = SnapshotRepository::attach(backend, "main");
    assert_eq!(
        reader.list_tags()?,
        vec![
            "snapshot-2024-03-01_00-00-00",
            "snapshot-2024-02-01_00-00-00",
            "snapshot-2024-01-01_00-00-00"
        ]
    );

    reader.checkout_ref(&SnapshotRef::Tag("snapshot-2024-01-01_00-00-00".into()))?;
    assert_eq!(read_to_string("reader/application/version.txt")?, "0");

    reader.checkout_ref(&SnapshotRef::Latest)?;
    assert_eq!(read_to_string("reader/application/version.txt")?, "2");

    let result = reader.checkout_ref(&SnapshotRef::Tag("snapshot-1999-01-01_00-00-00".into()));
    assert!(matches!(result, Err(RepositoryError::RefNotFound(_))));

    Ok(())
}

#[sealed_test]
fn latest_of_empty_remote_is_missing() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"))?;
    let backend = Git2Backend::init(
        current_dir()?.join("reader"),
        remote.url(),
        ProgressBar::hidden(),
    )?;
    let reader = SnapshotRepository::attach(backend, "main");

    assert!(reader.list_tags()?.is_empty());
    let result = reader.checkout_ref(&SnapshotRef::Latest);
    assert!(matches!(result, Err(RepositoryError::RefNotFound(_))));

    Ok(())
}

#[sealed_test]
fn unreachable_remote_is_reported() -> Result<()> {
    let missing = current_dir()?.join("missing.git");
    let backend = Git2Backend::init(
        current_dir()?.join("clone"),
        missing.to_string_lossy(),
        ProgressBar::hidden(),
    )?;
    let result = SnapshotRepository::open_working_clone(backend, "main");

    assert!(matches!(result, Err(RepositoryError::RemoteUnreachable { .. })));

    Ok(())
}
