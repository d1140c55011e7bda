use super::{
    context::{BuildContext, HasFilesystemOutput, HasRootFs, HasToolchain, Toolchain},
    layers::Layers,
    pkgconfig,
};
use crate::{
    options::{CMakeOptions, ConfigureOptions, MakeOptions, MesonOptions},
    paths,
    runner::{
        self, CMake, CommandOutput, CommandRunner, Configure, GenericRunner, Make, Meson, Ninja,
        Runner,
    },
};
use anyhow::{anyhow, Result};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::info;

/// A resolved source tree, by the name its recipe gave it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedSource {
    pub name: String,
    pub path: PathBuf,
}

/// Values a build records for its verification to compare against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildRecord {
    pub version: Option<String>,
    pub values: BTreeMap<String, String>,
}

/// What a phase works with: resolved sources, the prepared output
/// directory and a build directory shared by every phase of the build.
pub struct StepContext<'a> {
    pub context: &'a BuildContext,
    pub package: &'a str,
    pub sources: &'a [NamedSource],
    pub output_directory: &'a Path,
    pub build_directory: &'a Path,
    pub record: &'a mut BuildRecord,
}

impl HasToolchain for StepContext<'_> {
    fn toolchain(&self) -> Option<&Toolchain> {
        self.context.toolchain()
    }
}

impl HasRootFs for StepContext<'_> {
    fn root_fs_directory(&self) -> Option<&Path> {
        self.context.root_fs_directory()
    }
}

impl HasFilesystemOutput for StepContext<'_> {
    fn output_directory(&self) -> Option<&Path> {
        Some(self.output_directory)
    }
}

impl StepContext<'_> {
    pub fn layers(&self) -> Result<Layers> {
        Layers::new(self)
    }

    pub fn require_toolchain(&self) -> Result<&Toolchain> {
        self.context
            .toolchain()
            .ok_or_else(|| anyhow!("{} needs a toolchain", self.package))
    }

    /// The recipe's first source.
    pub fn source_directory(&self) -> Result<&Path> {
        self.sources
            .first()
            .map(|source| source.path.as_path())
            .ok_or_else(|| anyhow!("{} has no sources", self.package))
    }

    pub fn source(&self, name: &str) -> Result<&Path> {
        self.sources
            .iter()
            .find(|source| source.name == name)
            .map(|source| source.path.as_path())
            .ok_or_else(|| anyhow!("{} has no source named {}", self.package, name))
    }

    /// A fresh directory inside the build directory.
    pub async fn work_directory(&self, name: &str) -> Result<PathBuf> {
        let path = self.build_directory.join(name);
        fs::create_dir_all(&path)
            .await
            .map_err(|err| anyhow!("failed to create {}: {:?}", path.display(), err))?;
        Ok(path)
    }

    /// Runner carrying the toolchain and sysroot environment.
    pub fn runner(&self, working_directory: &Path) -> Result<GenericRunner> {
        let mut runner = GenericRunner::new(working_directory);
        runner.options = self.layers()?.runner();
        Ok(runner)
    }

    pub async fn run(&self, runner: &dyn Runner) -> Result<CommandOutput> {
        runner::run(runner, self.context.cancel_token()).await
    }

    pub async fn command<I, S>(
        &self,
        working_directory: &Path,
        program: impl Into<PathBuf>,
        args: I,
    ) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = CommandRunner::new(self.runner(working_directory)?, program, args);
        self.run(&command).await
    }

    /// Copies a source tree into `destination` for packages that cannot
    /// build out of tree.
    pub async fn copy_source(&self, source: &Path, destination: &Path) -> Result<()> {
        info!(source = %source.display(), destination = %destination.display(), "copying source tree");
        paths::copy_source_tree(source, destination).await
    }

    /// Runs `./autogen.sh` inside `directory`.
    pub async fn autogen(&self, directory: &Path) -> Result<()> {
        self.command(directory, directory.join("autogen.sh"), Vec::<String>::new())
            .await?;
        Ok(())
    }

    /// Runs `<source>/configure` from `build_directory` for the toolchain's
    /// target.
    pub async fn configure(
        &self,
        source: &Path,
        build_directory: &Path,
        options: Vec<ConfigureOptions>,
    ) -> Result<()> {
        let layers = self.layers()?;

        let mut configure = Configure::new(self.runner(build_directory)?, source.join("configure"));
        configure.host = self.context.toolchain().map(|t| t.triplet.clone());
        configure.target = configure.host.clone();
        configure.options = layers.configure();
        configure.options.extend(options);

        self.run(&configure).await?;
        Ok(())
    }

    pub async fn cmake(
        &self,
        source: &Path,
        build_directory: &Path,
        options: Vec<CMakeOptions>,
    ) -> Result<()> {
        let layers = self.layers()?;

        let mut cmake = CMake::new(self.runner(build_directory)?, source);
        cmake.options = layers.cmake();
        cmake.options.extend(options);

        self.run(&cmake).await?;
        Ok(())
    }

    pub async fn meson(
        &self,
        source: &Path,
        build_directory: &Path,
        options: Vec<MesonOptions>,
    ) -> Result<()> {
        let layers = self.layers()?;

        let mut meson = Meson::new(self.runner(build_directory)?, source, build_directory);
        meson.options = layers.meson();
        meson.options.extend(options);

        self.run(&meson).await?;
        Ok(())
    }

    /// Runs make once per target, in order.
    pub async fn make(
        &self,
        directory: &Path,
        targets: &[&str],
        options: Vec<MakeOptions>,
    ) -> Result<()> {
        for target in targets {
            self.make_target(directory, target, options.clone()).await?;
        }
        Ok(())
    }

    pub async fn make_target(
        &self,
        directory: &Path,
        target: &str,
        options: Vec<MakeOptions>,
    ) -> Result<CommandOutput> {
        let mut make = Make::new(self.runner(directory)?);
        make.targets = vec![target.to_string()];
        make.options = options;

        self.run(&make).await
    }

    /// `make install` into `<output>/usr` plus any extra variables.
    pub async fn make_install(&self, directory: &Path, options: Vec<MakeOptions>) -> Result<()> {
        let mut layered = vec![self.layers()?.install_make()];
        layered.extend(options);
        self.make(directory, &["install"], layered).await
    }

    /// `ninja install` for projects configured with an absolute prefix.
    pub async fn ninja_install(&self, build_directory: &Path) -> Result<()> {
        let ninja = Ninja::new(self.runner(build_directory)?);
        self.run(&ninja).await?;
        self.relocate_pkgconfig().await
    }

    /// `ninja install` for meson projects, which install through `DESTDIR`.
    pub async fn meson_install(&self, build_directory: &Path) -> Result<()> {
        let runner = self
            .runner(build_directory)?
            .with_options(self.layers()?.install_runner());
        self.run(&Ninja::new(runner)).await?;
        self.relocate_pkgconfig().await
    }

    pub async fn relocate_pkgconfig(&self) -> Result<()> {
        let count = pkgconfig::relocate_all(self.output_directory).await?;
        if count > 0 {
            info!("relocated {} pkg-config files", count);
        }
        Ok(())
    }
}
