use super::{
    context::{BuildContext, Capabilities, Capability, HasToolchain},
    step::StepContext,
    Phase, PhasedRecipe, Repository, Verification,
};
use crate::runner::{host::check_executables, Backend};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;

pub const STANDARD_CAPABILITIES: Capabilities = Capabilities::new(&[
    Capability::Source,
    Capability::FilesystemOutput,
    Capability::Toolchain,
    Capability::RootFs,
    Capability::GitRef,
]);

/// A package built with the cross toolchain in a configure step followed
/// by a build step, checked afterwards by inspecting its ELF outputs.
#[async_trait]
pub trait StandardRecipe: Send + Sync {
    fn name(&self) -> &'static str;

    fn source(&self) -> Repository;

    fn capabilities(&self) -> Capabilities {
        STANDARD_CAPABILITIES
    }

    /// Programs the build runs from the host `$PATH` rather than the
    /// toolchain.
    fn host_tools(&self) -> &'static [&'static str] {
        &[]
    }

    fn configure_backend(&self) -> Backend;

    fn build_backend(&self) -> Backend;

    /// ELF files the build must produce, relative to the output directory.
    fn outputs(&self) -> Vec<PathBuf>;

    async fn configure(&self, step: &mut StepContext<'_>) -> Result<()>;

    async fn build(&self, step: &mut StepContext<'_>) -> Result<()>;
}

pub struct Standard<R>(pub R);

#[async_trait]
impl<R: StandardRecipe> PhasedRecipe for Standard<R> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.0.capabilities()
    }

    fn sources(&self) -> Vec<Repository> {
        vec![self.0.source()]
    }

    async fn check_host_requirements(&self, context: &BuildContext) -> Result<()> {
        if let Some(toolchain) = context.toolchain() {
            toolchain.check(context.cancel_token()).await?;
        }
        check_executables(self.0.host_tools(), None)?;
        Ok(())
    }

    fn phases(&self) -> Vec<Phase> {
        vec![
            Phase::new("configure", self.0.configure_backend()),
            Phase::new("build", self.0.build_backend()),
        ]
    }

    async fn run_phase(&self, phase: &Phase, step: &mut StepContext<'_>) -> Result<()> {
        match phase.name {
            "configure" => self.0.configure(step).await,
            "build" => self.0.build(step).await,
            name => bail!("{} has no phase named {}", self.0.name(), name),
        }
    }

    async fn verify(&self, verification: &Verification<'_>) -> Result<()> {
        verification.verify_outputs(&self.0.outputs()).await
    }
}
