use crate::{
    build::{Repository, StandardRecipe, StepContext},
    options::{CMakeOptions, OptionMap, Switch},
    runner::Backend,
};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub const REPOSITORY: Repository = Repository::new(
    "zstd",
    "https://github.com/facebook/zstd.git",
    "refs/tags/v1.5.5",
);

pub struct Zstd;

#[async_trait]
impl StandardRecipe for Zstd {
    fn name(&self) -> &'static str {
        "zstd"
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
            PathBuf::from("usr/bin/zstd"),
            PathBuf::from("usr/bin/unzstd"),
            PathBuf::from("usr/lib/libzstd.so"),
        ]
    }

    async fn configure(&self, step: &mut StepContext<'_>) -> Result<()> {
        let defines = [
            "ZSTD_MULTITHREAD_SUPPORT",
            "ZSTD_BUILD_SHARED",
            "ZSTD_PROGRAMS_LINK_SHARED",
            "ZSTD_BUILD_STATIC",
            "ZSTD_ZLIB_SUPPORT",
            "ZSTD_LZMA_SUPPORT",
            "ZSTD_LZ4_SUPPORT",
        ]
        .into_iter()
        .fold(OptionMap::new(), |map, name| map.with(name, Switch::On))
        .with("ZSTD_BUILD_TESTS", Switch::Off);

        // the CMake project lives below build/cmake
        let cmake_path = step.source_directory()?.join("build").join("cmake");

        step.cmake(
            &cmake_path,
            step.build_directory,
            vec![CMakeOptions::with_defines(defines)],
        )
        .await
    }

    async fn build(&self, step: &mut StepContext<'_>) -> Result<()> {
        step.ninja_install(step.build_directory).await
    }
}
