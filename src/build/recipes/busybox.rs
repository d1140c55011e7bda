use crate::{
    build::{
        kconfig, Capabilities, Capability, HasKconfig, HasRootFs, Repository, StandardRecipe,
        StepContext,
    },
    options::{merge_all, ConfigureOptions, MakeOptions, OptionMap},
    runner::{host::find_executable, Backend},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::{collections::BTreeMap, path::PathBuf};

pub const REPOSITORY: Repository = Repository::new(
    "busybox",
    "git://git.busybox.net/busybox",
    "refs/tags/1_36_1",
);

pub const CAPABILITIES: Capabilities = Capabilities::new(&[
    Capability::Source,
    Capability::FilesystemOutput,
    Capability::Toolchain,
    Capability::RootFs,
    Capability::GitRef,
    Capability::Kconfig,
]);

/// Built in tree from a copy of the source, configured by a Kconfig file
/// or by `make defconfig` when none is given.
pub struct BusyBox;

impl BusyBox {
    fn replacements(&self, step: &StepContext<'_>) -> Result<BTreeMap<String, String>> {
        let toolchain = step.require_toolchain()?;
        let configure: ConfigureOptions = merge_all(step.layers()?.configure())?;
        let variable = |name: &str| {
            configure
                .variables
                .get(name)
                .map(|value| value.render())
                .unwrap_or_default()
        };

        let mut replacements = BTreeMap::from([
            (
                "CONFIG_CROSS_COMPILER_PREFIX".to_string(),
                format!("{}-", toolchain.triplet),
            ),
            (
                "CONFIG_PREFIX".to_string(),
                step.output_directory.display().to_string(),
            ),
            ("CONFIG_EXTRA_CFLAGS".to_string(), variable("CFLAGS")),
            ("CONFIG_EXTRA_LDFLAGS".to_string(), variable("LIBCC")),
        ]);

        if let Some(root) = step.context.root_fs_directory() {
            replacements.insert("CONFIG_SYSROOT".to_string(), root.display().to_string());
        }

        Ok(replacements)
    }

    fn make_options(&self, step: &StepContext<'_>) -> Result<MakeOptions> {
        let toolchain = step.require_toolchain()?;
        let host = |name: &str| -> Result<String> {
            Ok(find_executable(name, None)?.display().to_string())
        };

        Ok(MakeOptions::with_variables(
            OptionMap::new()
                .with("CC", toolchain.c_compiler().display().to_string())
                .with("CXX", toolchain.cxx_compiler().display().to_string())
                .with("HOSTCC", host("clang")?)
                .with("HOSTCXX", host("clang++")?)
                .with("PKG_CONFIG", host("pkg-config")?),
        ))
    }
}

#[async_trait]
impl StandardRecipe for BusyBox {
    fn name(&self) -> &'static str {
        "busybox"
    }

    fn source(&self) -> Repository {
        REPOSITORY
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn host_tools(&self) -> &'static [&'static str] {
        &["make", "clang", "clang++", "pkg-config"]
    }

    fn configure_backend(&self) -> Backend {
        Backend::Make
    }

    fn build_backend(&self) -> Backend {
        Backend::Make
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("bin/busybox")]
    }

    async fn configure(&self, step: &mut StepContext<'_>) -> Result<()> {
        let build = step.build_directory;
        let config = build.join(".config");

        step.copy_source(step.source_directory()?, build).await?;

        let base = match step.context.kconfig_path() {
            Some(path) => path.to_path_buf(),
            None => {
                step.make(build, &["defconfig"], vec![self.make_options(step)?])
                    .await?;
                config.clone()
            }
        };

        kconfig::copy_with_replacements(&base, &config, &self.replacements(step)?)
            .await
            .map_err(|err| anyhow!("failed to prepare busybox configuration: {:?}", err))
    }

    async fn build(&self, step: &mut StepContext<'_>) -> Result<()> {
        step.make(
            step.build_directory,
            &["all", "install"],
            vec![self.make_options(step)?],
        )
        .await
    }
}
