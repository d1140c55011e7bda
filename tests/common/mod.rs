#![allow(dead_code)]

use git2::{Oid, Repository, Signature};
use std::{fs, os::unix::fs::PermissionsExt, path::Path};
use tempfile::TempDir;

/// A local repository standing in for a remote.
pub struct Upstream {
    pub dir: TempDir,
    pub repo: Repository,
}

impl Upstream {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Self { dir, repo }
    }

    pub fn url(&self) -> String {
        self.dir.path().display().to_string()
    }

    pub fn signature() -> Signature<'static> {
        Signature::now("distrobuild", "builds@example.com").unwrap()
    }

    pub fn write(&self, file: &str, contents: &str, executable: bool) {
        let path = self.dir.path().join(file);
        fs::write(&path, contents).unwrap();
        if executable {
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    /// Commits `file` with `contents` on top of HEAD.
    pub fn commit(&self, file: &str, contents: &str, message: &str) -> Oid {
        self.write(file, contents, false);
        self.commit_paths(&[file], message)
    }

    pub fn commit_paths(&self, files: &[&str], message: &str) -> Oid {
        let mut index = self.repo.index().unwrap();
        for file in files {
            index.add_path(Path::new(file)).unwrap();
        }
        index.write().unwrap();

        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = Self::signature();

        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents = parent.iter().collect::<Vec<_>>();

        self.repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .unwrap()
    }
}

impl Upstream {
    /// Commits on `branch`, created from HEAD, leaving HEAD where it was.
    pub fn commit_on(&self, branch: &str, file: &str, contents: &str, message: &str) -> Oid {
        let original = self.repo.head().unwrap().name().unwrap().to_string();
        let tip = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo.branch(branch, &tip, false).unwrap();

        self.repo.set_head(&format!("refs/heads/{}", branch)).unwrap();
        let oid = self.commit(file, contents, message);
        self.repo.set_head(&original).unwrap();

        oid
    }

    /// Records `other` as a submodule at `path` and commits it.
    pub fn add_submodule(&self, other: &Upstream, path: &str) -> Oid {
        let mut submodule = self
            .repo
            .submodule(&other.url(), Path::new(path), true)
            .unwrap();
        submodule.clone(None).unwrap();
        submodule.add_finalize().unwrap();

        self.commit_paths(&[], &format!("add {}", path))
    }
}

pub fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}
