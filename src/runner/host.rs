use crate::{
    runner::{execute, CommandError, Invocation},
    verify::{version_pattern, Comparator, VerificationError, VersionCheck},
};
use anyhow::Result;
use semver::Version;
use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RequirementError {
    #[error("required executable '{name}' was not found in {location}")]
    MissingExecutable { name: String, location: String },
    #[error("could not determine the version of {name}: {source}")]
    UnknownVersion {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("{program} {argument} failed: {source}")]
    Unresponsive {
        program: String,
        argument: String,
        #[source]
        source: CommandError,
    },
    #[error("{name} {found} is older than the required {minimum}")]
    VersionTooOld {
        name: String,
        found: String,
        minimum: String,
    },
}

/// Finds `name` inside `directory`, or on `$PATH` when no directory is given.
pub fn find_executable(name: &str, directory: Option<&Path>) -> Result<PathBuf, RequirementError> {
    let found = match directory {
        Some(directory) => which::which_in(name, Some(directory), directory),
        None => which::which(name),
    };

    found.map_err(|_| RequirementError::MissingExecutable {
        name: name.to_string(),
        location: directory
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "$PATH".to_string()),
    })
}

pub fn check_executables(
    names: &[&str],
    directory: Option<&Path>,
) -> Result<Vec<PathBuf>, RequirementError> {
    names
        .iter()
        .map(|name| {
            let path = find_executable(name, directory)?;
            debug!(path = %path.display(), "found {}", name);
            Ok(path)
        })
        .collect()
}

/// Runs `program argument` with an empty environment and returns its
/// trimmed stdout.
pub async fn query(
    program: &Path,
    argument: &str,
    cancel: &CancellationToken,
) -> Result<String, RequirementError> {
    let invocation = Invocation {
        program: program.to_path_buf(),
        args: vec![argument.to_string()],
        environment: BTreeMap::new(),
        working_directory: env::temp_dir(),
        stdin: None,
    };

    let output = execute(&invocation, cancel)
        .await
        .map_err(|source| RequirementError::Unresponsive {
            program: program.display().to_string(),
            argument: argument.to_string(),
            source,
        })?;

    Ok(output.stdout.trim().to_string())
}

/// A program on `$PATH` that must report at least `minimum` through
/// `<name> --version`.
#[derive(Clone, Debug)]
pub struct MinimumVersion {
    pub name: String,
    pub prefix: String,
    pub minimum: Version,
}

impl MinimumVersion {
    pub fn new(name: &str, prefix: &str, minimum: Version) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            minimum,
        }
    }

    pub async fn check(&self, cancel: &CancellationToken) -> Result<Version> {
        let program = find_executable(&self.name, None)?;

        let invocation = Invocation {
            program,
            args: vec!["--version".to_string()],
            environment: BTreeMap::new(),
            working_directory: env::temp_dir(),
            stdin: None,
        };

        let pattern = version_pattern(&self.prefix, "").map_err(|err| {
            RequirementError::UnknownVersion {
                name: self.name.clone(),
                source: err.into(),
            }
        })?;

        let check = VersionCheck::new(invocation, pattern, Comparator::Minimum(self.minimum.clone()));

        let found = check
            .read(cancel)
            .await
            .map_err(|source| RequirementError::UnknownVersion {
                name: self.name.clone(),
                source: source.into(),
            })?;

        match check.comparator.check(&found) {
            Ok(()) => {
                info!("{} {} satisfies >= {}", self.name, found, self.minimum);
                Ok(found)
            }
            Err(VerificationError::VersionTooOld { minimum, found }) => {
                Err(RequirementError::VersionTooOld {
                    name: self.name.clone(),
                    found,
                    minimum,
                }
                .into())
            }
            Err(err) => Err(RequirementError::UnknownVersion {
                name: self.name.clone(),
                source: err.into(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_executable(directory: &Path, name: &str) {
        let path = directory.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn finds_executables_in_directory() {
        let dir = TempDir::new().unwrap();
        write_executable(dir.path(), "clang");
        write_executable(dir.path(), "ld.lld");

        let found = check_executables(&["clang", "ld.lld"], Some(dir.path())).unwrap();

        assert_eq!(found[0], dir.path().join("clang"));
    }

    #[test]
    fn missing_executable_names_location() {
        let dir = TempDir::new().unwrap();
        write_executable(dir.path(), "clang");

        let err = check_executables(&["clang", "clang++"], Some(dir.path())).unwrap_err();

        match err {
            RequirementError::MissingExecutable { name, location } => {
                assert_eq!(name, "clang++");
                assert_eq!(location, dir.path().display().to_string());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn non_executable_files_do_not_count() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clang"), "").unwrap();

        assert!(find_executable("clang", Some(dir.path())).is_err());
    }

    #[tokio::test]
    async fn missing_program_fails_minimum_version() {
        let requirement = MinimumVersion::new(
            "definitely-not-a-real-program-name",
            "cmake version ",
            Version::new(3, 20, 0),
        );

        let err = requirement.check(&CancellationToken::new()).await.unwrap_err();

        assert!(err.downcast_ref::<RequirementError>().is_some());
    }
}
