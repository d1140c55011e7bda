use crate::{
    build::{Repository, StandardRecipe, StepContext},
    options::ConfigureOptions,
    runner::Backend,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

pub const REPOSITORY: Repository = Repository::new(
    "pcre2",
    "https://github.com/PCRE2Project/pcre2.git",
    "refs/tags/pcre2-10.42",
);

const FLAGS: [&str; 7] = [
    "--enable-pcre2-16",
    "--enable-pcre2-32",
    "--enable-jit=auto",
    "--enable-jit-sealloc",
    "--enable-newline-is-any",
    "--enable-unicode",
    "--enable-pcre2grep-libz",
];

pub struct Pcre2;

/// `pcre2-config` hardcodes the configure prefix, which is `/` here.
pub fn fix_config_script(contents: &str) -> String {
    contents
        .lines()
        .map(|line| if line == "prefix=/" { "prefix=/usr" } else { line })
        .map(|line| format!("{}\n", line))
        .collect()
}

#[async_trait]
impl StandardRecipe for Pcre2 {
    fn name(&self) -> &'static str {
        "pcre2"
    }

    fn source(&self) -> Repository {
        REPOSITORY
    }

    fn configure_backend(&self) -> Backend {
        Backend::Configure
    }

    fn build_backend(&self) -> Backend {
        Backend::Make
    }

    fn outputs(&self) -> Vec<PathBuf> {
        ["pcre2grep", "pcre2test"]
            .iter()
            .map(|name| PathBuf::from("usr/bin").join(name))
            .chain(
                ["libpcre2-8.so", "libpcre2-16.so", "libpcre2-32.so", "libpcre2-posix.so"]
                    .iter()
                    .map(|name| PathBuf::from("usr/lib").join(name)),
            )
            .collect()
    }

    async fn configure(&self, step: &mut StepContext<'_>) -> Result<()> {
        let build = step.build_directory;

        step.copy_source(step.source_directory()?, build).await?;
        step.autogen(build).await?;
        step.configure(build, build, vec![ConfigureOptions::with_flags(FLAGS)])
            .await
    }

    async fn build(&self, step: &mut StepContext<'_>) -> Result<()> {
        step.make_install(step.build_directory, vec![]).await?;
        step.relocate_pkgconfig().await?;

        let script = step.output_directory.join("usr/bin/pcre2-config");
        let contents = fs::read_to_string(&script)
            .await
            .map_err(|err| anyhow!("failed to read {}: {:?}", script.display(), err))?;
        fs::write(&script, fix_config_script(&contents))
            .await
            .map_err(|err| anyhow!("failed to write {}: {:?}", script.display(), err))?;

        let libtool = step.build_directory.join("libtool");
        let libraries = step.output_directory.join("usr/lib");
        step.command(
            step.build_directory,
            libtool,
            ["--finish".to_string(), libraries.display().to_string()],
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_script_prefix_points_at_usr() {
        let script = "#!/bin/sh\nprefix=/\nexec_prefix=${prefix}\n";

        assert_eq!(
            fix_config_script(script),
            "#!/bin/sh\nprefix=/usr\nexec_prefix=${prefix}\n"
        );
    }
}
