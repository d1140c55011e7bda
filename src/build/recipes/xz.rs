use crate::{
    build::{
        standard::STANDARD_CAPABILITIES, Capabilities, Phase, PhasedRecipe, Repository,
        StepContext, Verification,
    },
    options::ConfigureOptions,
    runner::Backend,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;

pub const REPOSITORY: Repository = Repository::new(
    "xz",
    "https://github.com/tukaani-project/xz.git",
    "refs/tags/v5.4.4",
);

const SOURCE: &str = "source";

const SHARED_FLAGS: [&str; 3] = ["--disable-static", "--disable-xzdec", "--disable-lzmadec"];

const STATIC_FLAGS: [&str; 4] = [
    "--disable-shared",
    "--disable-nls",
    "--disable-encoders",
    "--disable-threads",
];

/// Shared libraries and tools first, then a static, decoder only
/// `liblzma` to link `xzdec` against.
pub struct Xz;

impl Xz {
    async fn autogen(&self, step: &StepContext<'_>) -> Result<()> {
        let source = step.work_directory(SOURCE).await?;
        step.copy_source(step.source_directory()?, &source).await?;
        step.autogen(&source).await
    }

    async fn shared(&self, step: &StepContext<'_>) -> Result<()> {
        let source = step.build_directory.join(SOURCE);
        let build = step.work_directory("shared").await?;
        let install = vec![step.layers()?.install_make()];

        step.configure(&source, &build, vec![ConfigureOptions::with_flags(SHARED_FLAGS)])
            .await?;
        step.make(&build, &["all", "install-strip"], install).await
    }

    async fn static_decoder(&self, step: &StepContext<'_>) -> Result<()> {
        let source = step.build_directory.join(SOURCE);
        let build = step.work_directory("static").await?;
        let install = vec![step.layers()?.install_make()];

        step.configure(&source, &build, vec![ConfigureOptions::with_flags(STATIC_FLAGS)])
            .await?;
        step.make(&build.join("src/liblzma"), &["all"], vec![]).await?;
        step.make(&build.join("src/xzdec"), &["all", "install-strip"], install)
            .await?;

        let extra = step.output_directory.join("usr/share/doc/xz/extra");
        step.copy_source(&source.join("extra"), &extra).await?;

        step.relocate_pkgconfig().await
    }
}

#[async_trait]
impl PhasedRecipe for Xz {
    fn name(&self) -> &str {
        "xz"
    }

    fn capabilities(&self) -> Capabilities {
        STANDARD_CAPABILITIES
    }

    fn sources(&self) -> Vec<Repository> {
        vec![REPOSITORY]
    }

    fn phases(&self) -> Vec<Phase> {
        vec![
            Phase::new("autogen", Backend::Command),
            Phase::new("shared", Backend::Make),
            Phase::new("static", Backend::Make),
        ]
    }

    async fn run_phase(&self, phase: &Phase, step: &mut StepContext<'_>) -> Result<()> {
        match phase.name {
            "autogen" => self.autogen(step).await,
            "shared" => self.shared(step).await,
            "static" => self.static_decoder(step).await,
            name => bail!("xz has no phase named {}", name),
        }
    }

    async fn verify(&self, verification: &Verification<'_>) -> Result<()> {
        verification
            .verify_outputs(&[
                PathBuf::from("usr/bin/xz"),
                PathBuf::from("usr/bin/xzdec"),
                PathBuf::from("usr/lib/liblzma.so"),
            ])
            .await
    }
}
