use super::{Backend, GenericRunner, Invocation, Runner};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Ninja {
    pub runner: GenericRunner,
    pub directory: Option<PathBuf>,
    pub targets: Vec<String>,
}

impl Ninja {
    pub fn new(runner: GenericRunner) -> Self {
        Self {
            runner,
            directory: None,
            targets: vec![],
        }
    }

    pub fn arguments(&self) -> Vec<String> {
        let mut args = vec![];

        if let Some(directory) = &self.directory {
            args.push("-C".to_string());
            args.push(directory.display().to_string());
        }

        if self.targets.is_empty() {
            args.push("install".to_string());
        } else {
            args.extend(self.targets.iter().cloned());
        }

        args
    }
}

#[async_trait]
impl Runner for Ninja {
    fn backend(&self) -> Backend {
        Backend::Ninja
    }

    fn invocation(&self) -> Result<Invocation> {
        Ok(self.runner.invocation("ninja", self.arguments())?)
    }
}
