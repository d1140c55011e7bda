use super::{Backend, GenericRunner, Invocation, Runner};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Any other program, run with the shared environment layers.
#[derive(Clone, Debug)]
pub struct CommandRunner {
    pub runner: GenericRunner,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandRunner {
    pub fn new<I, S>(runner: GenericRunner, program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runner,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }
}

#[async_trait]
impl Runner for CommandRunner {
    fn backend(&self) -> Backend {
        Backend::Command
    }

    fn invocation(&self) -> Result<Invocation> {
        let mut invocation = self.runner.invocation(&self.program, self.args.clone())?;
        invocation.stdin = self.stdin.clone();
        Ok(invocation)
    }
}
