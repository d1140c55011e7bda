use crate::{
    paths::{self, ScopedDirectory},
    runner::{Backend, Invocation},
    source::{self, GitRef, SourceRef},
    verify,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{info, warn};

pub mod context;
pub mod kconfig;
pub mod layers;
pub mod pkgconfig;
pub mod recipes;
pub mod registry;
pub mod standard;
pub mod step;

pub use context::{
    BuildContext, Capabilities, Capability, HasFilesystemOutput, HasGitRef, HasKconfig, HasRootFs,
    HasSource, HasTargetTriplet, HasToolchain, Toolchain,
};
pub use standard::{Standard, StandardRecipe};
pub use step::{BuildRecord, NamedSource, StepContext};

/// Where a recipe's source lives and which ref it builds by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repository {
    pub name: &'static str,
    pub url: &'static str,
    pub default_ref: &'static str,
}

impl Repository {
    pub const fn new(name: &'static str, url: &'static str, default_ref: &'static str) -> Self {
        Self {
            name,
            url,
            default_ref,
        }
    }

    pub fn default_git_ref(&self) -> Result<GitRef> {
        Ok(self.default_ref.parse()?)
    }
}

/// One named step of a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Phase {
    pub name: &'static str,
    pub backend: Backend,
}

impl Phase {
    pub const fn new(name: &'static str, backend: Backend) -> Self {
        Self { name, backend }
    }
}

/// Identifies the phase a build failed in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseFailure {
    pub package: String,
    pub index: usize,
    pub phase: &'static str,
    pub backend: Backend,
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "phase {} ({}, {}) of {} failed",
            self.index, self.phase, self.backend, self.package
        )
    }
}

/// What verification of a finished build can look at.
pub struct Verification<'a> {
    pub context: &'a BuildContext,
    pub package: &'a str,
    pub output_directory: &'a Path,
    pub record: &'a BuildRecord,
}

impl Verification<'_> {
    /// ELF checks of `outputs`, relative to the output directory, against
    /// the toolchain's target.
    pub async fn verify_outputs(&self, outputs: &[PathBuf]) -> Result<()> {
        let toolchain = self
            .context
            .toolchain()
            .ok_or_else(|| anyhow!("{} needs a toolchain to verify outputs", self.package))?;

        for output in outputs {
            verify::verify_triplet(&self.output_directory.join(output), &toolchain.triplet).await?;
        }

        Ok(())
    }

    /// An invocation run from the output directory with no extra
    /// environment.
    pub fn invocation<I, S>(&self, program: impl Into<PathBuf>, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            environment: BTreeMap::new(),
            working_directory: self.output_directory.to_path_buf(),
            stdin: None,
        }
    }

    /// The version recorded during the build.
    pub fn recorded_version(&self) -> Result<semver::Version> {
        let version = self
            .record
            .version
            .as_deref()
            .ok_or_else(|| anyhow!("{} did not record a version", self.package))?;

        semver::Version::parse(version)
            .map_err(|err| anyhow!("recorded version '{}' is invalid: {}", version, err))
    }
}

/// A package the orchestrator can build.
#[async_trait]
pub trait PhasedRecipe: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Sources to resolve before the first phase; the first one is the
    /// package's own and honours a caller supplied git ref.
    fn sources(&self) -> Vec<Repository>;

    async fn check_host_requirements(&self, context: &BuildContext) -> Result<()> {
        if let Some(toolchain) = context.toolchain() {
            toolchain.check(context.cancel_token()).await?;
        }
        Ok(())
    }

    fn phases(&self) -> Vec<Phase>;

    async fn run_phase(&self, phase: &Phase, step: &mut StepContext<'_>) -> Result<()>;

    async fn verify(&self, verification: &Verification<'_>) -> Result<()>;
}

#[async_trait]
pub trait Builder: Send {
    async fn check_host_requirements(&mut self) -> Result<()>;

    async fn build(&mut self) -> Result<()>;

    async fn verify_build(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Created,
    HostChecked,
    SourceResolved,
    PhaseStarted(usize),
    PhaseDone(usize),
    Built,
    Verified,
    Failed,
}

/// Drives one recipe through requirement checks, source resolution, its
/// phases and verification. Single use.
pub struct PackageBuilder {
    recipe: Box<dyn PhasedRecipe>,
    context: BuildContext,
    state: BuildState,
    record: BuildRecord,
    output_directory: Option<PathBuf>,
}

impl PackageBuilder {
    pub fn new(recipe: Box<dyn PhasedRecipe>, context: BuildContext) -> Result<Self> {
        context.validate(recipe.name(), recipe.capabilities())?;

        Ok(Self {
            recipe,
            context,
            state: BuildState::Created,
            record: BuildRecord::default(),
            output_directory: None,
        })
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn record(&self) -> &BuildRecord {
        &self.record
    }

    pub fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }

    fn source_refs(&self, root: &Path) -> Result<Vec<SourceRef>> {
        self.recipe
            .sources()
            .iter()
            .enumerate()
            .map(|(index, repository)| {
                let git_ref = match (index, self.context.git_ref()) {
                    (0, Some(git_ref)) => git_ref.clone(),
                    _ => repository.default_git_ref()?,
                };

                Ok(SourceRef {
                    repository_url: repository.url.to_string(),
                    git_ref,
                    local_path: root.join(repository.name),
                })
            })
            .collect()
    }

    async fn resolve_sources(&mut self, root: &Path) -> Result<Vec<NamedSource>> {
        let cancel = self.context.cancel_token().clone();
        let mut resolved = vec![];

        for (repository, source_ref) in self.recipe.sources().iter().zip(self.source_refs(root)?) {
            let source = source::resolve(&source_ref, &cancel)
                .await
                .with_context(|| format!("failed to resolve source {}", repository.name))?;

            resolved.push(NamedSource {
                name: repository.name.to_string(),
                path: source.path,
            });
        }

        self.state = BuildState::SourceResolved;

        Ok(resolved)
    }

    async fn prepare_output(&mut self) -> Result<PathBuf> {
        let output = match self.context.output_directory() {
            Some(path) => path.to_path_buf(),
            None => paths::create_temp_dir().await?,
        };

        paths::prepare_output_directory(&output).await?;

        info!(path = %output.display(), "output directory");

        self.output_directory = Some(output.clone());

        Ok(output)
    }

    async fn run_phases(&mut self, sources: &[NamedSource], output: &Path) -> Result<()> {
        let build_directory = ScopedDirectory::create().await?;
        let package = self.recipe.name().to_string();
        let cancel = self.context.cancel_token().clone();

        let mut result = Ok(());

        for (index, phase) in self.recipe.phases().into_iter().enumerate() {
            if cancel.is_cancelled() {
                result = Err(anyhow!("build of {} was cancelled", package));
                break;
            }

            info!(package = %package, phase = phase.name, backend = %phase.backend, "starting phase {}", index);

            self.state = BuildState::PhaseStarted(index);

            let mut step = StepContext {
                context: &self.context,
                package: &package,
                sources,
                output_directory: output,
                build_directory: build_directory.path(),
                record: &mut self.record,
            };

            let outcome = self.recipe.run_phase(&phase, &mut step).await;

            if let Err(err) = outcome {
                result = Err(err.context(PhaseFailure {
                    package: package.clone(),
                    index,
                    phase: phase.name,
                    backend: phase.backend,
                }));
                break;
            }

            self.state = BuildState::PhaseDone(index);
        }

        build_directory.close(result).await
    }

    async fn run_build(&mut self) -> Result<()> {
        let (source_root, ephemeral) = match self.context.source_directory() {
            Some(path) => (path.to_path_buf(), false),
            None => (paths::create_temp_dir().await?, true),
        };

        let result = async {
            let sources = self.resolve_sources(&source_root).await?;
            let output = self.prepare_output().await?;
            self.run_phases(&sources, &output).await
        }
        .await;

        if ephemeral {
            if let Err(err) = fs::remove_dir_all(&source_root).await {
                warn!(path = %source_root.display(), "failed to remove sources: {:?}", err);
            }
        }

        result
    }
}

#[async_trait]
impl Builder for PackageBuilder {
    async fn check_host_requirements(&mut self) -> Result<()> {
        if self.state != BuildState::Created {
            bail!("host requirements of {} were already checked", self.recipe.name());
        }

        match self.recipe.check_host_requirements(&self.context).await {
            Ok(()) => {
                self.state = BuildState::HostChecked;
                info!(package = %self.recipe.name(), "host requirements satisfied");
                Ok(())
            }
            Err(err) => {
                self.state = BuildState::Failed;
                Err(err)
            }
        }
    }

    async fn build(&mut self) -> Result<()> {
        if !matches!(self.state, BuildState::Created | BuildState::HostChecked) {
            bail!("{} has already been built", self.recipe.name());
        }

        let result = self.run_build().await;

        self.state = match result {
            Ok(()) => BuildState::Built,
            Err(_) => BuildState::Failed,
        };

        if result.is_ok() {
            info!(package = %self.recipe.name(), "build finished");
        }

        result
    }

    async fn verify_build(&mut self) -> Result<()> {
        if self.state != BuildState::Built {
            bail!("{} has no successful build to verify", self.recipe.name());
        }

        let output = self
            .output_directory
            .clone()
            .ok_or_else(|| anyhow!("{} has no output directory", self.recipe.name()))?;

        let verification = Verification {
            context: &self.context,
            package: self.recipe.name(),
            output_directory: &output,
            record: &self.record,
        };

        match self.recipe.verify(&verification).await {
            Ok(()) => {
                self.state = BuildState::Verified;
                info!(package = %self.recipe.name(), "verification passed");
                Ok(())
            }
            Err(err) => {
                self.state = BuildState::Failed;
                Err(err)
            }
        }
    }
}
