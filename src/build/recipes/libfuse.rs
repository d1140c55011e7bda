use crate::{
    build::{Repository, StandardRecipe, StepContext},
    options::{MesonOptions, OptionMap},
    runner::Backend,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const REPOSITORY: Repository = Repository::new(
    "libfuse",
    "https://github.com/libfuse/libfuse.git",
    "refs/tags/fuse-3.16.2",
);

pub struct LibFuse;

async fn link(directory: &Path, name: &str, target: &str) -> Result<()> {
    let path = directory.join(name);
    if fs::symlink_metadata(&path).await.is_ok() {
        fs::remove_file(&path)
            .await
            .map_err(|err| anyhow!("failed to replace {}: {:?}", path.display(), err))?;
    }
    fs::symlink(target, &path)
        .await
        .map_err(|err| anyhow!("failed to link {}: {:?}", path.display(), err))
}

#[async_trait]
impl StandardRecipe for LibFuse {
    fn name(&self) -> &'static str {
        "libfuse"
    }

    fn source(&self) -> Repository {
        REPOSITORY
    }

    fn configure_backend(&self) -> Backend {
        Backend::Meson
    }

    fn build_backend(&self) -> Backend {
        Backend::Ninja
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![
            PathBuf::from("usr/bin/fusermount3"),
            PathBuf::from("usr/sbin/mount.fuse3"),
            PathBuf::from("usr/lib/libfuse3.so"),
        ]
    }

    async fn configure(&self, step: &mut StepContext<'_>) -> Result<()> {
        let options = OptionMap::new()
            .with("examples", "false")
            .with("tests", "false");

        step.meson(
            step.source_directory()?,
            step.build_directory,
            vec![MesonOptions::with_options(options)],
        )
        .await
    }

    async fn build(&self, step: &mut StepContext<'_>) -> Result<()> {
        step.meson_install(step.build_directory).await?;

        let usr = step.output_directory.join("usr");
        link(&usr.join("bin"), "fusermount", "fusermount3").await?;
        link(&usr.join("sbin"), "mount.fuse", "mount.fuse3").await
    }
}
