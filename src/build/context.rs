use crate::{
    runner::host::{check_executables, query, RequirementError},
    source::GitRef,
    triplet::Triplet,
};
use anyhow::{bail, Result};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const REQUIRED_TOOLS: [&str; 3] = ["clang", "clang++", "ld.lld"];

/// A clang/LLVM installation and the target it compiles for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toolchain {
    pub directory: PathBuf,
    pub triplet: Triplet,
}

impl Toolchain {
    pub fn new(directory: impl Into<PathBuf>, triplet: Triplet) -> Self {
        Self {
            directory: directory.into(),
            triplet,
        }
    }

    pub fn bin_directory(&self) -> PathBuf {
        self.directory.join("usr").join("bin")
    }

    pub fn tool(&self, name: &str) -> PathBuf {
        self.bin_directory().join(name)
    }

    pub fn c_compiler(&self) -> PathBuf {
        self.tool("clang")
    }

    pub fn cxx_compiler(&self) -> PathBuf {
        self.tool("clang++")
    }

    pub fn linker(&self) -> PathBuf {
        self.tool("ld.lld")
    }

    /// The tools must exist and clang must answer `--version` and
    /// `-dumpmachine`.
    pub async fn check(&self, cancel: &CancellationToken) -> Result<(), RequirementError> {
        check_executables(&REQUIRED_TOOLS, Some(&self.bin_directory()))?;

        let compiler = self.c_compiler();
        let version = query(&compiler, "--version", cancel).await?;
        let machine = query(&compiler, "-dumpmachine", cancel).await?;

        info!(
            version = %version.lines().next().unwrap_or_default(),
            machine = %machine,
            target = %self.triplet,
            "toolchain ready"
        );

        Ok(())
    }
}

/// Inputs a recipe may declare it accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Source,
    FilesystemOutput,
    Toolchain,
    RootFs,
    GitRef,
    Kconfig,
    TargetTriplet,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Source => "source directory",
            Capability::FilesystemOutput => "output directory",
            Capability::Toolchain => "toolchain",
            Capability::RootFs => "root filesystem",
            Capability::GitRef => "git ref",
            Capability::Kconfig => "kconfig file",
            Capability::TargetTriplet => "target triplet",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities(&'static [Capability]);

impl Capabilities {
    pub const fn new(capabilities: &'static [Capability]) -> Self {
        Self(capabilities)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

pub trait HasSource {
    fn source_directory(&self) -> Option<&Path>;
}

pub trait HasFilesystemOutput {
    fn output_directory(&self) -> Option<&Path>;
}

pub trait HasToolchain {
    fn toolchain(&self) -> Option<&Toolchain>;
}

pub trait HasRootFs {
    fn root_fs_directory(&self) -> Option<&Path>;
}

pub trait HasGitRef {
    fn git_ref(&self) -> Option<&GitRef>;
}

pub trait HasKconfig {
    fn kconfig_path(&self) -> Option<&Path>;
}

/// The target of recipes that do not compile with the cross toolchain
/// themselves.
pub trait HasTargetTriplet {
    fn target_triplet(&self) -> Option<&Triplet>;
}

/// Everything a caller hands to one build.
#[derive(Clone, Debug, Default)]
pub struct BuildContext {
    source_directory: Option<PathBuf>,
    output_directory: Option<PathBuf>,
    git_ref: Option<GitRef>,
    toolchain: Option<Toolchain>,
    root_fs_directory: Option<PathBuf>,
    kconfig_path: Option<PathBuf>,
    target_triplet: Option<Triplet>,
    cancel: CancellationToken,
}

impl BuildContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Default::default()
        }
    }

    pub fn with_source_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_directory = Some(path.into());
        self
    }

    pub fn with_output_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(path.into());
        self
    }

    pub fn with_git_ref(mut self, git_ref: GitRef) -> Self {
        self.git_ref = Some(git_ref);
        self
    }

    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    pub fn with_root_fs_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_fs_directory = Some(path.into());
        self
    }

    pub fn with_kconfig_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kconfig_path = Some(path.into());
        self
    }

    pub fn with_target_triplet(mut self, triplet: Triplet) -> Self {
        self.target_triplet = Some(triplet);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Rejects inputs the recipe never declared and requires a toolchain
    /// when one is declared.
    pub fn validate(&self, package: &str, capabilities: Capabilities) -> Result<()> {
        let provided = [
            (Capability::Source, self.source_directory.is_some()),
            (Capability::FilesystemOutput, self.output_directory.is_some()),
            (Capability::Toolchain, self.toolchain.is_some()),
            (Capability::RootFs, self.root_fs_directory.is_some()),
            (Capability::GitRef, self.git_ref.is_some()),
            (Capability::Kconfig, self.kconfig_path.is_some()),
            (Capability::TargetTriplet, self.target_triplet.is_some()),
        ];

        for (capability, is_set) in provided {
            if is_set && !capabilities.contains(capability) {
                bail!("{} does not accept a {}", package, capability);
            }
        }

        if capabilities.contains(Capability::Toolchain) && self.toolchain.is_none() {
            bail!("{} requires a toolchain", package);
        }

        Ok(())
    }
}

impl HasSource for BuildContext {
    fn source_directory(&self) -> Option<&Path> {
        self.source_directory.as_deref()
    }
}

impl HasFilesystemOutput for BuildContext {
    fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }
}

impl HasToolchain for BuildContext {
    fn toolchain(&self) -> Option<&Toolchain> {
        self.toolchain.as_ref()
    }
}

impl HasRootFs for BuildContext {
    fn root_fs_directory(&self) -> Option<&Path> {
        self.root_fs_directory.as_deref()
    }
}

impl HasGitRef for BuildContext {
    fn git_ref(&self) -> Option<&GitRef> {
        self.git_ref.as_ref()
    }
}

impl HasKconfig for BuildContext {
    fn kconfig_path(&self) -> Option<&Path> {
        self.kconfig_path.as_deref()
    }
}

impl HasTargetTriplet for BuildContext {
    fn target_triplet(&self) -> Option<&Triplet> {
        self.target_triplet.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn stub_toolchain(clang: &str) -> (TempDir, Toolchain) {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("usr/bin");
        std::fs::create_dir_all(&bin).unwrap();

        for (tool, body) in [("clang", clang), ("clang++", "exit 0"), ("ld.lld", "exit 0")] {
            let path = bin.join(tool);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let toolchain = Toolchain::new(dir.path(), "x86_64-linux-musl".parse().unwrap());
        (dir, toolchain)
    }

    const STANDARD: Capabilities = Capabilities::new(&[
        Capability::Source,
        Capability::FilesystemOutput,
        Capability::Toolchain,
        Capability::GitRef,
    ]);

    fn toolchain() -> Toolchain {
        Toolchain::new("/opt/llvm", "x86_64-linux-musl".parse().unwrap())
    }

    #[test]
    fn tool_paths() {
        assert_eq!(
            toolchain().linker(),
            PathBuf::from("/opt/llvm/usr/bin/ld.lld")
        );
    }

    #[tokio::test]
    async fn responsive_toolchain_passes() {
        let (_dir, toolchain) = stub_toolchain(
            "case \"$1\" in\n  --version) echo 'clang version 16.0.6' ;;\n  -dumpmachine) echo x86_64-unknown-linux-musl ;;\nesac",
        );

        toolchain.check(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn clang_that_cannot_run_is_a_missing_requirement() {
        let (_dir, toolchain) = stub_toolchain("echo 'cannot execute binary file' >&2\nexit 126");

        let err = toolchain.check(&CancellationToken::new()).await.unwrap_err();

        match &err {
            RequirementError::Unresponsive { argument, .. } => assert_eq!(argument, "--version"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            ErrorKind::of(&anyhow::Error::from(err)),
            ErrorKind::RequirementMissing
        );
    }

    #[tokio::test]
    async fn clang_without_dumpmachine_is_refused() {
        let (_dir, toolchain) = stub_toolchain("[ \"$1\" = --version ] || exit 1");

        let err = toolchain.check(&CancellationToken::new()).await.unwrap_err();

        assert!(
            matches!(&err, RequirementError::Unresponsive { argument, .. } if argument == "-dumpmachine"),
            "{:?}",
            err
        );
    }

    #[test]
    fn undeclared_inputs_are_rejected() {
        let context = BuildContext::default()
            .with_toolchain(toolchain())
            .with_root_fs_directory("/rootfs");

        let err = context.validate("zstd", STANDARD).unwrap_err();

        assert_eq!(err.to_string(), "zstd does not accept a root filesystem");
    }

    #[test]
    fn declared_toolchain_is_required() {
        let context = BuildContext::default();

        assert!(context.validate("zstd", STANDARD).is_err());
        assert!(context
            .with_toolchain(toolchain())
            .with_output_directory("/out")
            .validate("zstd", STANDARD)
            .is_ok());
    }

    #[test]
    fn target_triplet_is_a_separate_input() {
        let context = BuildContext::default()
            .with_output_directory("/out")
            .with_target_triplet("aarch64-linux-musl".parse().unwrap());

        let err = context.validate("zstd", STANDARD).unwrap_err();
        assert_eq!(err.to_string(), "zstd does not accept a target triplet");

        let headers = Capabilities::new(&[Capability::FilesystemOutput, Capability::TargetTriplet]);
        assert!(context.validate("linux-headers", headers).is_ok());
        assert_eq!(context.target_triplet().unwrap().machine, "aarch64");
    }
}
