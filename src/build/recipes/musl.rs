use crate::{
    build::{
        standard::STANDARD_CAPABILITIES, Capabilities, Phase, PhasedRecipe, Repository,
        StepContext, Verification,
    },
    runner::Backend,
    verify::{version_pattern, Comparator, VersionCheck},
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

pub const REPOSITORY: Repository = Repository::new(
    "musl",
    "git://git.musl-libc.org/musl",
    "refs/tags/v1.2.4",
);

const LIBC: &str = "usr/lib/libc.so";

pub struct Musl;

#[async_trait]
impl PhasedRecipe for Musl {
    fn name(&self) -> &str {
        "musl"
    }

    fn capabilities(&self) -> Capabilities {
        STANDARD_CAPABILITIES
    }

    fn sources(&self) -> Vec<Repository> {
        vec![REPOSITORY]
    }

    fn phases(&self) -> Vec<Phase> {
        vec![
            Phase::new("configure", Backend::Configure),
            Phase::new("install", Backend::Make),
        ]
    }

    async fn run_phase(&self, phase: &Phase, step: &mut StepContext<'_>) -> Result<()> {
        let source = step.source_directory()?.to_path_buf();

        match phase.name {
            "configure" => step.configure(&source, step.build_directory, vec![]).await,
            "install" => {
                step.make_install(step.build_directory, vec![]).await?;

                let version_file = source.join("VERSION");
                let version = fs::read_to_string(&version_file).await.map_err(|err| {
                    anyhow!("failed to read {}: {:?}", version_file.display(), err)
                })?;

                info!("musl source version {}", version.trim());

                step.record.version = Some(version.trim().to_string());
                Ok(())
            }
            name => bail!("musl has no phase named {}", name),
        }
    }

    async fn verify(&self, verification: &Verification<'_>) -> Result<()> {
        let libc = verification.output_directory.join(LIBC);

        // the dynamic loader prints its version to stderr and exits non-zero
        let check = VersionCheck::new(
            verification.invocation(&libc, Vec::<String>::new()),
            version_pattern("^Version ", "$")?,
            Comparator::Exact(verification.recorded_version()?),
        )
        .from_stderr()
        .ignoring_exit_status();

        check.run(verification.context.cancel_token()).await?;

        verification.verify_outputs(&[PathBuf::from(LIBC)]).await
    }
}
