use crate::{
    build::{Repository, StandardRecipe, StepContext},
    options::{CMakeOptions, OptionMap, Switch},
    runner::Backend,
};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub const REPOSITORY: Repository = Repository::new(
    "zlib-ng",
    "https://github.com/zlib-ng/zlib-ng.git",
    "refs/tags/2.1.3",
);

pub struct ZlibNg;

#[async_trait]
impl StandardRecipe for ZlibNg {
    fn name(&self) -> &'static str {
        "zlib-ng"
    }

    fn source(&self) -> Repository {
        REPOSITORY
    }

    fn configure_backend(&self) -> Backend {
        Backend::CMake
    }

    fn build_backend(&self) -> Backend {
        Backend::Ninja
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![
            PathBuf::from("usr/lib/libz.so"),
            PathBuf::from("usr/bin/minigzip"),
            PathBuf::from("usr/bin/minideflate"),
        ]
    }

    async fn configure(&self, step: &mut StepContext<'_>) -> Result<()> {
        let defines = OptionMap::new()
            .with("ZLIB_COMPAT", Switch::On)
            .with("INSTALL_UTILS", Switch::On);

        step.cmake(
            step.source_directory()?,
            step.build_directory,
            vec![CMakeOptions::with_defines(defines)],
        )
        .await
    }

    async fn build(&self, step: &mut StepContext<'_>) -> Result<()> {
        step.ninja_install(step.build_directory).await
    }
}
