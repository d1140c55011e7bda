use super::VerificationError;
use crate::runner::{self, Invocation};
use anyhow::Result;
use regex::Regex;
use semver::Version;
use std::{cmp::Ordering, fmt};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Semantic version with a single capture group around the whole version.
pub const SEMVER_PATTERN: &str = r"((?:0|[1-9]\d*)\.(?:0|[1-9]\d*)\.(?:0|[1-9]\d*)(?:-(?:(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+(?:[0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?)";

/// `prefix` followed by a semantic version, compiled as a multi-line
/// pattern.
pub fn version_pattern(prefix: &str, suffix: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?m){}{}{}", prefix, SEMVER_PATTERN, suffix))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Comparator {
    Exact(Version),
    Minimum(Version),
    Valid,
}

impl Comparator {
    pub fn check(&self, found: &Version) -> Result<(), VerificationError> {
        match self {
            Comparator::Exact(expected) => {
                if found.cmp_precedence(expected) != Ordering::Equal {
                    return Err(VerificationError::VersionMismatch {
                        expected: expected.to_string(),
                        found: found.to_string(),
                    });
                }
            }
            Comparator::Minimum(minimum) => {
                if found.cmp_precedence(minimum) == Ordering::Less {
                    return Err(VerificationError::VersionTooOld {
                        minimum: minimum.to_string(),
                        found: found.to_string(),
                    });
                }
            }
            Comparator::Valid => {}
        }

        Ok(())
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Exact(version) => write!(f, "== {}", version),
            Comparator::Minimum(version) => write!(f, ">= {}", version),
            Comparator::Valid => write!(f, "any"),
        }
    }
}

/// Pulls the single version `pattern` captures out of `text`.
pub fn extract_version(text: &str, pattern: &Regex) -> Result<Version, VerificationError> {
    if pattern.captures_len() != 2 {
        return Err(VerificationError::PatternGroups {
            pattern: pattern.to_string(),
            groups: pattern.captures_len().saturating_sub(1),
        });
    }

    let matches = pattern
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|capture| capture.as_str().to_string())
        .collect::<Vec<_>>();

    match matches.as_slice() {
        [] => Err(VerificationError::NoVersionMatch {
            pattern: pattern.to_string(),
        }),
        [single] => Version::parse(single).map_err(|source| VerificationError::InvalidVersion {
            value: single.clone(),
            source,
        }),
        _ => Err(VerificationError::AmbiguousVersion {
            pattern: pattern.to_string(),
            matches,
        }),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

/// Runs a program and compares the version it reports.
#[derive(Clone, Debug)]
pub struct VersionCheck {
    pub invocation: Invocation,
    pub pattern: Regex,
    pub comparator: Comparator,
    pub stream: OutputStream,
    pub ignore_exit_status: bool,
}

impl VersionCheck {
    pub fn new(invocation: Invocation, pattern: Regex, comparator: Comparator) -> Self {
        Self {
            invocation,
            pattern,
            comparator,
            stream: OutputStream::Stdout,
            ignore_exit_status: false,
        }
    }

    pub fn from_stderr(mut self) -> Self {
        self.stream = OutputStream::Stderr;
        self
    }

    pub fn ignoring_exit_status(mut self) -> Self {
        self.ignore_exit_status = true;
        self
    }

    /// Reads the reported version without comparing it.
    pub async fn read(&self, cancel: &CancellationToken) -> Result<Version> {
        let output = if self.ignore_exit_status {
            runner::execute_unchecked(&self.invocation, cancel).await?
        } else {
            runner::execute(&self.invocation, cancel).await?
        };

        let text = match self.stream {
            OutputStream::Stdout => &output.stdout,
            OutputStream::Stderr => &output.stderr,
        };

        Ok(extract_version(text, &self.pattern)?)
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<Version> {
        let found = self.read(cancel).await?;

        self.comparator.check(&found)?;

        info!(
            program = %self.invocation.program.display(),
            "version {} satisfies {}", found, self.comparator
        );

        Ok(found)
    }
}
