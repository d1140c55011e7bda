use crate::options::{merge_all, MergeError, RunnerOptions};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    fmt, io,
    path::{Path, PathBuf},
    process::Stdio,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod cmake;
pub mod command;
pub mod configure;
pub mod host;
pub mod make;
pub mod meson;
pub mod ninja;

pub use cmake::CMake;
pub use command::CommandRunner;
pub use configure::Configure;
pub use make::Make;
pub use meson::Meson;
pub use ninja::Ninja;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {}{}", exit_label(.exit_code), stderr_tail(.stderr))]
    Failed {
        program: String,
        args: Vec<String>,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines = stderr.lines().collect::<Vec<_>>();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    format!("\n{}", lines[start..].join("\n"))
}

/// The external tool family behind an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Configure,
    CMake,
    Make,
    Meson,
    Ninja,
    Command,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Configure => "configure",
            Backend::CMake => "cmake",
            Backend::Make => "make",
            Backend::Meson => "meson",
            Backend::Ninja => "ninja",
            Backend::Command => "command",
        };
        write!(f, "{}", name)
    }
}

/// Everything needed to spawn one process. Nothing here is taken from the
/// current process state besides the inherited environment it overlays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: PathBuf,
    pub stdin: Option<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Working directory plus the environment layers shared by every backend.
#[derive(Clone, Debug)]
pub struct GenericRunner {
    pub working_directory: PathBuf,
    pub options: Vec<RunnerOptions>,
}

impl GenericRunner {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            options: vec![],
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options.push(options);
        self
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn environment(&self) -> Result<BTreeMap<String, String>, MergeError> {
        let merged: RunnerOptions = merge_all(self.options.iter().cloned())?;
        Ok(merged.environment.render().into_iter().collect())
    }

    pub fn invocation(
        &self,
        program: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Result<Invocation, MergeError> {
        Ok(Invocation {
            program: program.into(),
            args,
            environment: self.environment()?,
            working_directory: self.working_directory.clone(),
            stdin: None,
        })
    }
}

/// A single external tool invocation rendered from merged option layers.
#[async_trait]
pub trait Runner: Send + Sync {
    fn backend(&self) -> Backend;

    /// Writes any files the tool reads besides its argv.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    fn invocation(&self) -> Result<Invocation>;
}

pub async fn run(runner: &dyn Runner, cancel: &CancellationToken) -> Result<CommandOutput> {
    let invocation = runner.invocation()?;

    runner.prepare().await?;

    info!(backend = %runner.backend(), cwd = %invocation.working_directory.display(), "{}", invocation);

    Ok(execute(&invocation, cancel).await?)
}

/// Runs `invocation` and fails on a non-zero exit.
pub async fn execute(
    invocation: &Invocation,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CommandError> {
    let output = execute_unchecked(invocation, cancel).await?;

    if !output.success() {
        return Err(CommandError::Failed {
            program: invocation.program.display().to_string(),
            args: invocation.args.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    Ok(output)
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs `invocation` and returns its output whatever the exit status.
pub async fn execute_unchecked(
    invocation: &Invocation,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CommandError> {
    let program = invocation.program.display().to_string();

    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled { program });
    }

    let spawn_error = |source: io::Error| CommandError::Spawn {
        program: program.clone(),
        source,
    };

    let mut command = Command::new(&invocation.program);

    command
        .args(&invocation.args)
        .envs(&invocation.environment)
        .current_dir(&invocation.working_directory)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if invocation.stdin.is_some() {
        command.stdin(Stdio::piped());
    } else {
        command.stdin(Stdio::null());
    }

    let mut child = command.spawn().map_err(&spawn_error)?;

    if let (Some(input), Some(mut stdin)) = (invocation.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(input.as_bytes()).await {
                warn!("failed to write stdin: {:?}", err);
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_error(io::Error::other("stdout was not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| spawn_error(io::Error::other("stderr was not captured")))?;

    let stdout_lines =
        LinesStream::new(BufReader::new(stdout).lines()).map(|line| (Stream::Stdout, line));
    let stderr_lines =
        LinesStream::new(BufReader::new(stderr).lines()).map(|line| (Stream::Stderr, line));

    let mut lines = stdout_lines.merge(stderr_lines);

    let mut output = CommandOutput::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(err) = child.kill().await {
                    warn!("failed to kill {}: {:?}", program, err);
                }
                return Err(CommandError::Cancelled { program: program.clone() });
            }
            line = lines.next() => match line {
                Some((Stream::Stdout, Ok(line))) => {
                    debug!(target: "distrobuild::stdout", "{}", line);
                    output.stdout.push_str(&line);
                    output.stdout.push('\n');
                }
                Some((Stream::Stderr, Ok(line))) => {
                    debug!(target: "distrobuild::stderr", "{}", line);
                    output.stderr.push_str(&line);
                    output.stderr.push('\n');
                }
                Some((stream, Err(err))) => {
                    warn!("failed to read {:?} of {}: {:?}", stream, program, err);
                }
                None => break,
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    let Some(status) = status else {
        if let Err(err) = child.kill().await {
            warn!("failed to kill {}: {:?}", program, err);
        }
        return Err(CommandError::Cancelled { program: program.clone() });
    };

    output.exit_code = status.map_err(&spawn_error)?.code();

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionMap, OptionValue};
    use std::time::{Duration, Instant};

    fn shell(script: &str) -> Invocation {
        Invocation {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            environment: BTreeMap::new(),
            working_directory: std::env::temp_dir(),
            stdin: None,
        }
    }

    #[tokio::test]
    async fn captures_both_streams() {
        let output = execute(&shell("echo out; echo err >&2"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(output.success());
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_output() {
        let err = execute(&shell("echo broken >&2; exit 3"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            CommandError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "broken\n");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unchecked_keeps_output_of_failures() {
        let output = execute_unchecked(&shell("echo Version 1.2.4 >&2; exit 1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(1));
        assert_eq!(output.stderr, "Version 1.2.4\n");
    }

    #[tokio::test]
    async fn stdin_and_environment_reach_the_child() {
        let mut invocation = shell("read line; echo \"$line $GREETING\"");
        invocation.stdin = Some("hello\n".to_string());
        invocation
            .environment
            .insert("GREETING".to_string(), "world".to_string());

        let output = execute(&invocation, &CancellationToken::new()).await.unwrap();

        assert_eq!(output.stdout, "hello world\n");
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = execute(&shell("sleep 30"), &cancel).await.unwrap_err();

        assert!(matches!(err, CommandError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn generic_runner_merges_environment() {
        let runner = GenericRunner::new("/work")
            .with_options(RunnerOptions {
                environment: OptionMap::new().with("PATH", OptionValue::joined(":", ["/tc/bin"])),
            })
            .with_options(RunnerOptions {
                environment: OptionMap::new()
                    .with("PATH", OptionValue::joined(":", ["/usr/bin"]))
                    .with("DESTDIR", "/out"),
            });

        let invocation = runner.invocation("make", vec!["install".to_string()]).unwrap();

        assert_eq!(invocation.environment["PATH"], "/tc/bin:/usr/bin");
        assert_eq!(invocation.environment["DESTDIR"], "/out");
        assert_eq!(invocation.working_directory, PathBuf::from("/work"));
    }
}
