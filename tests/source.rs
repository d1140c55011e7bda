mod common;

use common::Upstream;
use distrobuild::{
    error::ErrorKind,
    source::{self, CommitFetch, GitRef, SourceError, SourceRef},
};
use std::{fs, path::Path};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn source_ref(upstream: &Upstream, git_ref: GitRef, path: &Path) -> SourceRef {
    SourceRef {
        repository_url: upstream.url(),
        git_ref,
        local_path: path.to_path_buf(),
    }
}

fn contents(path: &Path) -> String {
    fs::read_to_string(path.join("README")).unwrap()
}

#[tokio::test]
async fn head_resolves_to_the_latest_commit() {
    let upstream = Upstream::new();
    upstream.commit("README", "first", "first");
    let latest = upstream.commit("README", "second", "second");

    let checkout = TempDir::new().unwrap();
    let path = checkout.path().join("pkg");

    let resolved = source::resolve(
        &source_ref(&upstream, GitRef::Head, &path),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(resolved.commit, latest);
    assert_eq!(resolved.path, path);
    assert_eq!(contents(&path), "second");
}

#[tokio::test]
async fn branch_resolves_to_its_tip() {
    let upstream = Upstream::new();
    let first = upstream.commit("README", "first", "first");
    upstream
        .repo
        .branch("release", &upstream.repo.find_commit(first).unwrap(), false)
        .unwrap();
    upstream.commit("README", "second", "second");

    let checkout = TempDir::new().unwrap();
    let git_ref = GitRef::Branch("release".to_string());

    let resolved = source::resolve(
        &source_ref(&upstream, git_ref, checkout.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(resolved.commit, first);
    assert_eq!(contents(checkout.path()), "first");

    let local = git2::Repository::open(checkout.path()).unwrap();
    assert_eq!(local.head().unwrap().shorthand(), Some("release"));
}

#[tokio::test]
async fn lightweight_and_annotated_tags_resolve_to_commits() {
    let upstream = Upstream::new();
    let light = upstream.commit("README", "first", "first");
    upstream
        .repo
        .tag_lightweight("v1", &upstream.repo.find_object(light, None).unwrap(), false)
        .unwrap();

    let annotated = upstream.commit("README", "second", "second");
    upstream
        .repo
        .tag(
            "v2",
            &upstream.repo.find_object(annotated, None).unwrap(),
            &Upstream::signature(),
            "release v2",
            false,
        )
        .unwrap();
    upstream.commit("README", "third", "third");

    for (name, expected, text) in [("v1", light, "first"), ("v2", annotated, "second")] {
        let checkout = TempDir::new().unwrap();
        let resolved = source::resolve(
            &source_ref(&upstream, GitRef::Tag(name.to_string()), checkout.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(resolved.commit, expected, "{}", name);
        assert_eq!(contents(checkout.path()), text);
    }
}

#[tokio::test]
async fn tag_chains_resolve_to_the_terminal_commit() {
    let upstream = Upstream::new();
    let commit = upstream.commit("README", "tagged", "tagged");
    let signature = Upstream::signature();

    let inner = upstream
        .repo
        .tag(
            "inner",
            &upstream.repo.find_object(commit, None).unwrap(),
            &signature,
            "inner",
            false,
        )
        .unwrap();
    let middle = upstream
        .repo
        .tag(
            "middle",
            &upstream.repo.find_object(inner, None).unwrap(),
            &signature,
            "middle",
            false,
        )
        .unwrap();
    upstream
        .repo
        .tag(
            "outer",
            &upstream.repo.find_object(middle, None).unwrap(),
            &signature,
            "outer",
            false,
        )
        .unwrap();

    let checkout = TempDir::new().unwrap();
    let resolved = source::resolve(
        &source_ref(&upstream, GitRef::Tag("outer".to_string()), checkout.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(resolved.commit, commit);
}

#[tokio::test]
async fn raw_commit_checks_out_that_commit() {
    let upstream = Upstream::new();
    let first = upstream.commit("README", "first", "first");
    upstream.commit("README", "second", "second");

    let checkout = TempDir::new().unwrap();
    let resolved = source::resolve(
        &source_ref(&upstream, GitRef::Commit(first), checkout.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(resolved.commit, first);
    assert_eq!(contents(checkout.path()), "first");
}

#[tokio::test]
async fn existing_checkout_is_reused() {
    let upstream = Upstream::new();
    let first = upstream.commit("README", "first", "first");
    upstream
        .repo
        .tag_lightweight("v1", &upstream.repo.find_object(first, None).unwrap(), false)
        .unwrap();
    let second = upstream.commit("README", "second", "second");

    let checkout = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let head = source::resolve(&source_ref(&upstream, GitRef::Head, checkout.path()), &cancel)
        .await
        .unwrap();
    assert_eq!(head.commit, second);

    let tag = source::resolve(
        &source_ref(&upstream, GitRef::Tag("v1".to_string()), checkout.path()),
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(tag.commit, first);
    assert_eq!(contents(checkout.path()), "first");
}

#[tokio::test]
async fn checkout_of_another_repository_is_refused() {
    let upstream = Upstream::new();
    upstream.commit("README", "first", "first");
    let other = Upstream::new();
    other.commit("README", "other", "other");

    let checkout = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    source::resolve(&source_ref(&upstream, GitRef::Head, checkout.path()), &cancel)
        .await
        .unwrap();

    let err = source::resolve(&source_ref(&other, GitRef::Head, checkout.path()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::RepositoryMismatch { .. }));
}

#[tokio::test]
async fn missing_tag_is_reported() {
    let upstream = Upstream::new();
    upstream.commit("README", "first", "first");

    let checkout = TempDir::new().unwrap();
    let err = source::resolve(
        &source_ref(&upstream, GitRef::Tag("missing".to_string()), checkout.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SourceError::RefNotFound { .. }), "{:?}", err);
    assert_eq!(
        ErrorKind::of(&anyhow::Error::from(err)),
        ErrorKind::SourceAcquisitionFailure
    );
}

#[tokio::test]
async fn cancelled_resolution_stops() {
    let upstream = Upstream::new();
    upstream.commit("README", "first", "first");

    let checkout = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = source::resolve(&source_ref(&upstream, GitRef::Head, checkout.path()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Cancelled));
    assert_eq!(
        ErrorKind::of(&anyhow::Error::from(err)),
        ErrorKind::Cancelled
    );
}

#[tokio::test]
async fn commit_only_on_a_side_branch_resolves_through_all_branches() {
    let upstream = Upstream::new();
    upstream.commit("README", "first", "first");
    let side = upstream.commit_on("topic", "README", "topic", "topic work");
    upstream.commit("README", "second", "second");

    let checkout = TempDir::new().unwrap();
    let resolved = source::resolve_with(
        &source_ref(&upstream, GitRef::Commit(side), checkout.path()),
        CommitFetch::AllBranches,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(resolved.commit, side);
    assert_eq!(contents(checkout.path()), "topic");

    let local = git2::Repository::open(checkout.path()).unwrap();
    let fetched = local
        .find_reference("refs/remotes/origin/topic")
        .unwrap()
        .target()
        .unwrap();
    assert_eq!(fetched, side);
}

#[tokio::test]
async fn nested_submodules_are_checked_out() {
    let inner = Upstream::new();
    inner.commit("INNER", "inner", "inner");

    let middle = Upstream::new();
    middle.commit("SUB", "middle", "middle");
    middle.add_submodule(&inner, "deps/inner");

    let superproject = Upstream::new();
    superproject.commit("README", "super", "super");
    superproject.add_submodule(&middle, "vendor/sub");

    let checkout = TempDir::new().unwrap();
    source::resolve(
        &source_ref(&superproject, GitRef::Head, checkout.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let sub = checkout.path().join("vendor/sub");
    assert_eq!(fs::read_to_string(sub.join("SUB")).unwrap(), "middle");
    assert_eq!(
        fs::read_to_string(sub.join("deps/inner/INNER")).unwrap(),
        "inner"
    );
}

#[tokio::test]
async fn directory_that_is_not_a_repository_is_refused() {
    let upstream = Upstream::new();
    upstream.commit("README", "first", "first");

    let checkout = TempDir::new().unwrap();
    fs::write(checkout.path().join("notes.txt"), "not a checkout").unwrap();

    let err = source::resolve(
        &source_ref(&upstream, GitRef::Head, checkout.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SourceError::RepositoryMismatch { .. }), "{:?}", err);
    assert_eq!(
        fs::read_to_string(checkout.path().join("notes.txt")).unwrap(),
        "not a checkout"
    );
}
