use crate::triplet::Triplet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

pub mod elf;
pub mod version;

pub use elf::{ElfError, ElfImage};
pub use version::{extract_version, version_pattern, Comparator, OutputStream, VersionCheck};

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid ELF image: {source}")]
    Elf {
        path: PathBuf,
        #[source]
        source: ElfError,
    },
    #[error("{path} targets {found}, expected {expected}")]
    MachineMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
    #[error("{path} requests interpreter {found}, expected one of {expected:?}")]
    InterpreterMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: String,
    },
    #[error("pattern {pattern} must have exactly one capture group, found {groups}")]
    PatternGroups { pattern: String, groups: usize },
    #[error("no version matching {pattern} was reported")]
    NoVersionMatch { pattern: String },
    #[error("pattern {pattern} matched more than one version: {matches:?}")]
    AmbiguousVersion {
        pattern: String,
        matches: Vec<String>,
    },
    #[error("'{value}' is not a semantic version: {source}")]
    InvalidVersion {
        value: String,
        #[source]
        source: semver::Error,
    },
    #[error("expected version {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },
    #[error("version {found} is older than the required {minimum}")]
    VersionTooOld { minimum: String, found: String },
}

/// Machine spelling shared by triplets and ELF images.
pub fn normalize_machine(machine: &str) -> String {
    let machine = machine.to_ascii_lowercase();

    match machine.as_str() {
        "amd64" => "x86_64".to_string(),
        "arm64" => "aarch64".to_string(),
        "i486" | "i586" | "i686" => "i386".to_string(),
        "ppc" => "powerpc".to_string(),
        "ppc64" => "powerpc64".to_string(),
        m if m.starts_with("arm") => "arm".to_string(),
        _ => machine,
    }
}

/// Checks that `path` is an ELF image that runs on `triplet`: the machine
/// must match and a requested interpreter must be the triplet's loader.
pub async fn verify_triplet(path: &Path, triplet: &Triplet) -> Result<(), VerificationError> {
    let data = fs::read(path)
        .await
        .map_err(|source| VerificationError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    check_image(path, &data, triplet)
}

pub fn check_image(path: &Path, data: &[u8], triplet: &Triplet) -> Result<(), VerificationError> {
    let image = ElfImage::parse(data).map_err(|source| VerificationError::Elf {
        path: path.to_path_buf(),
        source,
    })?;

    let expected = normalize_machine(&triplet.machine);
    let found = image
        .machine_name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("machine {}", image.machine));

    if found != expected {
        return Err(VerificationError::MachineMismatch {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }

    match &image.interpreter {
        None => {
            debug!(path = %path.display(), "no interpreter requested, statically linked");
        }
        Some(interpreter) => {
            let loader = triplet.dynamic_loader_name();
            let expected = vec![format!("/lib/{}", loader), format!("/usr/lib/{}", loader)];

            if !expected.contains(interpreter) {
                return Err(VerificationError::InterpreterMismatch {
                    path: path.to_path_buf(),
                    expected,
                    found: interpreter.clone(),
                });
            }
        }
    }

    info!(path = %path.display(), "verified {} image", triplet);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use elf::{tests::elf64, EM_AARCH64, EM_X86_64};
    use tempfile::TempDir;

    fn musl() -> Triplet {
        "x86_64-pc-linux-musl".parse().unwrap()
    }

    #[test]
    fn static_x86_64_passes() {
        let data = elf64(EM_X86_64, None);

        assert!(check_image(Path::new("busybox"), &data, &musl()).is_ok());
    }

    #[test]
    fn wrong_machine_fails() {
        let data = elf64(EM_AARCH64, None);

        assert!(matches!(
            check_image(Path::new("busybox"), &data, &musl()),
            Err(VerificationError::MachineMismatch { .. })
        ));
    }

    #[test]
    fn expected_interpreter_passes() {
        let data = elf64(EM_X86_64, Some("/lib/ld-musl-x86_64.so.1"));

        assert!(check_image(Path::new("xz"), &data, &musl()).is_ok());
    }

    #[test]
    fn unrelated_interpreter_fails() {
        let data = elf64(EM_X86_64, Some("/lib64/ld-linux-x86-64.so.2"));

        assert!(matches!(
            check_image(Path::new("xz"), &data, &musl()),
            Err(VerificationError::InterpreterMismatch { .. })
        ));
    }

    #[test]
    fn aliases_are_normalized() {
        let triplet = Triplet::new("arm64", "", "linux", "musl");
        let data = elf64(EM_AARCH64, Some("/usr/lib/ld-musl-arm64.so.1"));

        assert!(check_image(Path::new("clang"), &data, &triplet).is_ok());
        assert_eq!(normalize_machine("AMD64"), "x86_64");
    }

    #[tokio::test]
    async fn reads_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zstd");
        std::fs::write(&path, elf64(EM_X86_64, None)).unwrap();

        verify_triplet(&path, &musl()).await.unwrap();

        assert!(matches!(
            verify_triplet(&dir.path().join("missing"), &musl()).await,
            Err(VerificationError::Read { .. })
        ));
    }
}
