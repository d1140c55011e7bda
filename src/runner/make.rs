use super::{Backend, GenericRunner, Invocation, Runner};
use crate::options::{merge_all, MakeOptions};
use anyhow::Result;
use async_trait::async_trait;
use std::{path::PathBuf, thread};

#[derive(Clone, Debug)]
pub struct Make {
    pub runner: GenericRunner,
    pub directory: Option<PathBuf>,
    pub targets: Vec<String>,
    pub options: Vec<MakeOptions>,
    pub jobs: usize,
}

impl Make {
    pub fn new(runner: GenericRunner) -> Self {
        Self {
            runner,
            directory: None,
            targets: vec![],
            options: vec![],
            jobs: available_jobs(),
        }
    }

    pub fn arguments(&self) -> Result<Vec<String>> {
        let merged: MakeOptions = merge_all(self.options.iter().cloned())?;

        let mut args = vec![];

        if let Some(directory) = &self.directory {
            args.push("-C".to_string());
            args.push(directory.display().to_string());
        }

        args.extend(self.targets.iter().cloned());

        args.extend(
            merged
                .variables
                .render()
                .into_iter()
                .map(|(name, value)| format!("{}={}", name, value)),
        );

        args.push("--no-print-directory".to_string());
        args.push(format!("-j{}", self.jobs));

        Ok(args)
    }
}

#[async_trait]
impl Runner for Make {
    fn backend(&self) -> Backend {
        Backend::Make
    }

    fn invocation(&self) -> Result<Invocation> {
        Ok(self.runner.invocation("make", self.arguments()?)?)
    }
}

pub fn available_jobs() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionMap;

    #[test]
    fn renders_directory_targets_and_variables() {
        let mut make = Make::new(GenericRunner::new("/build"));
        make.directory = Some(PathBuf::from("src/liblzma"));
        make.targets = vec!["install".to_string()];
        make.jobs = 8;
        make.options = vec![MakeOptions::with_variables(OptionMap::from([(
            "DESTDIR",
            "/out/usr",
        )]))];

        let invocation = make.invocation().unwrap();

        assert_eq!(
            invocation.args,
            vec![
                "-C",
                "src/liblzma",
                "install",
                "DESTDIR=/out/usr",
                "--no-print-directory",
                "-j8",
            ]
        );
    }
}
