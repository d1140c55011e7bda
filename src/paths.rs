use anyhow::{anyhow, Result};
use std::{
    env,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn get_temp() -> PathBuf {
    env::temp_dir().join(Uuid::now_v7().to_string())
}

pub async fn create_temp_dir() -> Result<PathBuf> {
    let temp_dir = get_temp();
    fs::create_dir_all(&temp_dir)
        .await
        .map_err(|err| anyhow!("failed to create temp dir {}: {:?}", temp_dir.display(), err))?;
    Ok(temp_dir)
}

/// A temporary directory that lives for the duration of one build step.
///
/// Call [`ScopedDirectory::close`] to remove it and hand back the step's
/// result; if the value is dropped instead, removal happens synchronously.
#[derive(Debug)]
pub struct ScopedDirectory {
    path: PathBuf,
    removed: bool,
}

impl ScopedDirectory {
    pub async fn create() -> Result<Self> {
        Ok(Self {
            path: create_temp_dir().await?,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory. A removal failure is logged and never replaces
    /// `result`.
    pub async fn close<T>(mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = fs::remove_dir_all(&self.path).await {
            warn!(path = %self.path.display(), "failed to remove directory: {:?}", err);
        }
        self.removed = true;
        result
    }
}

impl Drop for ScopedDirectory {
    fn drop(&mut self) {
        if !self.removed && self.path.exists() {
            if let Err(err) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), "failed to remove directory: {:?}", err);
            }
        }
    }
}

/// Creates `path` if needed and removes everything already inside it.
pub async fn prepare_output_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|err| anyhow!("failed to create output directory {}: {:?}", path.display(), err))?;

    let mut entries = fs::read_dir(path).await?;

    while let Some(entry) = entries.next_entry().await? {
        let entry_path = entry.path();
        let file_type = entry.file_type().await?;

        debug!(path = %entry_path.display(), "removing stale output");

        if file_type.is_dir() {
            fs::remove_dir_all(&entry_path).await?;
        } else {
            fs::remove_file(&entry_path).await?;
        }
    }

    Ok(())
}

/// Copies a source tree into `destination`, skipping top level `.git*`
/// entries. Symlinks are recreated rather than followed.
pub async fn copy_source_tree(source: &Path, destination: &Path) -> Result<()> {
    let entries = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() != 1 || !entry.file_name().to_string_lossy().starts_with(".git")
        })
        .collect::<Result<Vec<_>, _>>()?;

    fs::create_dir_all(destination).await?;

    for entry in entries {
        let relative = entry.path().strip_prefix(source)?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).await?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).await?;
            fs::symlink(&link, &target).await?;
        } else {
            fs::copy(entry.path(), &target).await.map_err(|err| {
                anyhow!("failed to copy {}: {:?}", entry.path().display(), err)
            })?;
        }
    }

    Ok(())
}

/// All regular files under `root` whose extension matches, sorted.
pub fn get_files_with_extension(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| {
            let entry = entry.ok()?;
            if !entry.file_type().is_file() {
                return None;
            }
            let matches = entry
                .path()
                .extension()
                .map(|ext| ext == extension)
                .unwrap_or(false);
            matches.then(|| entry.into_path())
        })
        .collect::<Vec<_>>();

    files.sort();

    Ok(files)
}
