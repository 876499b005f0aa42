//! Manifest generation and checking against real git repositories

mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;
use treeseal_core::manifest::hasher::hash_bytes;
use treeseal_core::tree::{GitLister, ScmKind, TreeLister};
use treeseal_core::{IntegrityConfig, IntegrityError, ManifestEngine, MANIFEST_FILENAME};

fn engine() -> ManifestEngine {
    ManifestEngine::from_config(ScmKind::Git, &IntegrityConfig::default())
}

#[tokio::test]
async fn test_two_file_scenario() -> Result<()> {
    if !common::tool_available("git") {
        eprintln!("git not installed, skipping");
        return Ok(());
    }
    common::init_test_logging();

    let dir = TempDir::new()?;
    common::init_repo(dir.path(), &[("a.txt", "hello"), ("b.txt", "world")])?;

    engine().generate(dir.path()).await?;
    let text = fs::read_to_string(dir.path().join(MANIFEST_FILENAME))?;
    assert_eq!(
        text,
        format!(
            "{} a.txt\n{} b.txt",
            hash_bytes(b"hello"),
            hash_bytes(b"world")
        )
    );

    engine().check(dir.path()).await?;

    fs::remove_file(dir.path().join("b.txt"))?;

    match engine().check(dir.path()).await {
        Err(IntegrityError::FilenameMismatch { added, removed }) => {
            assert!(added.is_empty());
            assert_eq!(removed, vec!["b.txt"]);
        }
        other => panic!("expected FilenameMismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_committed_removal_is_reported_as_removed() -> Result<()> {
    if !common::tool_available("git") {
        eprintln!("git not installed, skipping");
        return Ok(());
    }

    let dir = TempDir::new()?;
    common::init_repo(dir.path(), &[("a.txt", "hello"), ("b.txt", "world")])?;
    engine().generate(dir.path()).await?;

    common::git(dir.path(), &["rm", "-q", "b.txt"])?;
    common::commit_all(dir.path(), "remove b")?;

    match engine().check(dir.path()).await {
        Err(IntegrityError::FilenameMismatch { added, removed }) => {
            assert!(added.is_empty());
            assert_eq!(removed, vec!["b.txt"]);
        }
        other => panic!("expected FilenameMismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_committed_addition_is_reported_as_added() -> Result<()> {
    if !common::tool_available("git") {
        eprintln!("git not installed, skipping");
        return Ok(());
    }

    let dir = TempDir::new()?;
    common::init_repo(dir.path(), &[("a.txt", "hello")])?;
    engine().generate(dir.path()).await?;

    common::write_files(dir.path(), &[("docs/new.md", "# new")])?;
    common::commit_all(dir.path(), "add docs")?;

    match engine().check(dir.path()).await {
        Err(IntegrityError::FilenameMismatch { added, removed }) => {
            assert_eq!(added, vec!["docs/new.md"]);
            assert!(removed.is_empty());
        }
        other => panic!("expected FilenameMismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_uncommitted_edit_is_content_drift() -> Result<()> {
    if !common::tool_available("git") {
        eprintln!("git not installed, skipping");
        return Ok(());
    }

    let dir = TempDir::new()?;
    common::init_repo(
        dir.path(),
        &[("a.txt", "hello"), ("b.txt", "world"), ("src/lib.rs", "fn x() {}")],
    )?;
    engine().generate(dir.path()).await?;

    fs::write(dir.path().join("src/lib.rs"), "fn y() {}")?;
    // Untracked files never count
    fs::write(dir.path().join("scratch.txt"), "ignored")?;

    match engine().check(dir.path()).await {
        Err(IntegrityError::DigestMismatch { changed }) => {
            assert_eq!(changed, vec!["src/lib.rs"]);
        }
        other => panic!("expected DigestMismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_manifest_artifacts_never_listed() -> Result<()> {
    if !common::tool_available("git") {
        eprintln!("git not installed, skipping");
        return Ok(());
    }

    let dir = TempDir::new()?;
    common::init_repo(dir.path(), &[("a.txt", "hello")])?;
    engine().generate(dir.path()).await?;
    fs::write(dir.path().join("sha256sum.txt.sig"), "sig")?;
    // Committing the artifacts must not make them part of the tree
    common::commit_all(dir.path(), "seal")?;

    let files = GitLister::default().list(dir.path(), MANIFEST_FILENAME).await?;
    assert_eq!(files, vec!["a.txt"]);

    engine().check(dir.path()).await?;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinks_are_skipped() -> Result<()> {
    if !common::tool_available("git") {
        eprintln!("git not installed, skipping");
        return Ok(());
    }

    let dir = TempDir::new()?;
    common::git(dir.path(), &["init", "-q"])?;
    common::write_files(dir.path(), &[("real.txt", "content")])?;
    std::os::unix::fs::symlink("real.txt", dir.path().join("link.txt"))?;
    common::commit_all(dir.path(), "with link")?;

    let files = GitLister::default().list(dir.path(), MANIFEST_FILENAME).await?;
    assert_eq!(files, vec!["real.txt"]);
    Ok(())
}

#[tokio::test]
async fn test_subdirectory_root_lists_relative_paths() -> Result<()> {
    if !common::tool_available("git") {
        eprintln!("git not installed, skipping");
        return Ok(());
    }

    let dir = TempDir::new()?;
    common::init_repo(
        dir.path(),
        &[("top.txt", "top"), ("sub/inner.txt", "inner"), ("sub/deep/x.txt", "x")],
    )?;

    let sub = dir.path().join("sub");
    let files = GitLister::default().list(&sub, MANIFEST_FILENAME).await?;
    assert_eq!(files, vec!["deep/x.txt", "inner.txt"]);

    engine().generate(&sub).await?;
    engine().check(&sub).await?;
    Ok(())
}

#[tokio::test]
async fn test_listing_outside_a_repository_fails() -> Result<()> {
    if !common::tool_available("git") {
        eprintln!("git not installed, skipping");
        return Ok(());
    }

    let dir = TempDir::new()?;
    let err = engine().generate(dir.path()).await.unwrap_err();
    assert_eq!(err.kind(), treeseal_core::ErrorKind::ToolFailed);
    assert!(!dir.path().join(MANIFEST_FILENAME).exists());
    Ok(())
}
