use super::{Backend, GenericRunner, Invocation, Runner};
use crate::{
    options::{merge_all, ConfigureOptions},
    triplet::Triplet,
};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// An autoconf style `configure` script.
#[derive(Clone, Debug)]
pub struct Configure {
    pub runner: GenericRunner,
    pub script: PathBuf,
    pub host: Option<Triplet>,
    pub target: Option<Triplet>,
    pub options: Vec<ConfigureOptions>,
}

impl Configure {
    pub fn new(runner: GenericRunner, script: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            script: script.into(),
            host: None,
            target: None,
            options: vec![],
        }
    }

    pub fn arguments(&self) -> Result<Vec<String>> {
        let merged: ConfigureOptions = merge_all(self.options.iter().cloned())?;

        let mut args = merged
            .arguments
            .render()
            .into_iter()
            .map(|(name, value)| format!("--{}={}", name, value))
            .collect::<Vec<_>>();

        args.extend(merged.flags);

        if let Some(host) = &self.host {
            args.push(format!("--host={}", host));
        }

        if let Some(target) = &self.target {
            args.push(format!("--target={}", target));
        }

        args.extend(
            merged
                .variables
                .render()
                .into_iter()
                .map(|(name, value)| format!("{}={}", name, value)),
        );

        Ok(args)
    }
}

#[async_trait]
impl Runner for Configure {
    fn backend(&self) -> Backend {
        Backend::Configure
    }

    fn invocation(&self) -> Result<Invocation> {
        Ok(self.runner.invocation(&self.script, self.arguments()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionMap, OptionValue};

    #[test]
    fn renders_arguments_flags_and_variables() {
        let mut configure = Configure::new(GenericRunner::new("/build"), "/src/configure");
        configure.host = Some("aarch64-linux-musl".parse().unwrap());
        configure.options = vec![
            ConfigureOptions {
                arguments: OptionMap::from([("prefix", "/"), ("srcdir", "/src")]),
                ..Default::default()
            },
            ConfigureOptions::with_flags(["--disable-static"]),
            ConfigureOptions {
                variables: OptionMap::new()
                    .with("CC", "/tc/usr/bin/clang")
                    .with("CFLAGS", OptionValue::flags(["-gz=zstd", "-O2"])),
                ..Default::default()
            },
        ];

        let invocation = configure.invocation().unwrap();

        assert_eq!(invocation.program, PathBuf::from("/src/configure"));
        assert_eq!(
            invocation.args,
            vec![
                "--prefix=/",
                "--srcdir=/src",
                "--disable-static",
                "--host=aarch64-linux-musl",
                "CC=/tc/usr/bin/clang",
                "CFLAGS=-gz=zstd -O2",
            ]
        );
    }
}
