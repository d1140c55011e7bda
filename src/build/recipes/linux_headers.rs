use crate::{
    build::{
        BuildContext, Capabilities, Capability, HasTargetTriplet, Phase, PhasedRecipe, Repository,
        StepContext, Verification,
    },
    options::{MakeOptions, OptionMap},
    runner::{self, host::check_executables, Backend, CommandOutput, Make},
    triplet::Triplet,
    verify::VerificationError,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

pub const REPOSITORY: Repository = Repository::new(
    "linux",
    "git://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git",
    "refs/tags/v6.5",
);

pub const CAPABILITIES: Capabilities = Capabilities::new(&[
    Capability::Source,
    Capability::FilesystemOutput,
    Capability::GitRef,
    Capability::TargetTriplet,
]);

/// Expands to the `major.minor.patch` encoded by `linux/version.h`.
const VERSION_PROBE: &str = "#define VERSION(major,minor,patch) VERSION_(major,minor,patch)
#define VERSION_(major,minor,patch) major ## . ## minor ## . ## patch
VERSION(LINUX_VERSION_MAJOR, LINUX_VERSION_PATCHLEVEL, LINUX_VERSION_SUBLEVEL)
";

/// Kernel UAPI headers installed to `<output>/usr/include`.
pub struct LinuxHeaders;

impl LinuxHeaders {
    async fn make(
        &self,
        step: &StepContext<'_>,
        target: &str,
        out_of_tree: bool,
    ) -> Result<CommandOutput> {
        let source = step.source_directory()?;
        let triplet = step
            .context
            .target_triplet()
            .cloned()
            .unwrap_or_else(Triplet::default_target);

        let mut variables = OptionMap::new()
            .with("ARCH", triplet.kernel_arch())
            .with(
                "INSTALL_HDR_PATH",
                step.output_directory.join("usr").display().to_string(),
            );
        if out_of_tree {
            variables.insert("O", step.build_directory.display().to_string());
        }

        let mut make = Make::new(step.runner(step.build_directory)?);
        make.directory = Some(source.to_path_buf());
        make.targets = vec![target.to_string()];
        make.options = vec![MakeOptions::with_variables(variables)];

        step.run(&make).await
    }
}

#[async_trait]
impl PhasedRecipe for LinuxHeaders {
    fn name(&self) -> &str {
        "linux-headers"
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn sources(&self) -> Vec<Repository> {
        vec![REPOSITORY]
    }

    async fn check_host_requirements(&self, _context: &BuildContext) -> Result<()> {
        // clang is only needed to read the installed version back
        check_executables(&["make", "clang"], None)?;
        Ok(())
    }

    fn phases(&self) -> Vec<Phase> {
        vec![
            Phase::new("mrproper", Backend::Make),
            Phase::new("headers_install", Backend::Make),
        ]
    }

    async fn run_phase(&self, phase: &Phase, step: &mut StepContext<'_>) -> Result<()> {
        match phase.name {
            "mrproper" => {
                self.make(step, "mrproper", false).await?;
            }
            "headers_install" => {
                self.make(step, "headers_install", true).await?;

                let output = self.make(step, "kernelversion", true).await?;
                let version = output.stdout.trim().to_string();

                info!("linux source version {}", version);

                step.record.version = Some(version);
            }
            name => bail!("linux-headers has no phase named {}", name),
        }
        Ok(())
    }

    async fn verify(&self, verification: &Verification<'_>) -> Result<()> {
        let expected = verification
            .record
            .version
            .clone()
            .unwrap_or_default();

        let header = verification
            .output_directory
            .join(Path::new("usr/include/linux/version.h"));

        let clang = runner::host::find_executable("clang", None)?;
        let mut invocation = verification.invocation(
            clang,
            [
                "-E".to_string(),
                "-P".to_string(),
                "-include".to_string(),
                header.display().to_string(),
                "-".to_string(),
            ],
        );
        invocation.stdin = Some(VERSION_PROBE.to_string());

        let output = runner::execute(&invocation, verification.context.cancel_token()).await?;
        let found = output.stdout.trim().to_string();

        if found != expected {
            return Err(VerificationError::VersionMismatch { expected, found }.into());
        }

        info!("installed headers report linux {}", found);

        Ok(())
    }
}
