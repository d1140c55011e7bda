mod common;

use async_trait::async_trait;
use common::{write_script, Upstream};
use distrobuild::{
    build::{
        BuildContext, BuildState, Builder, PackageBuilder, PhaseFailure, Repository, Standard,
        StandardRecipe, StepContext, Toolchain,
    },
    error::ErrorKind,
    options::ConfigureOptions,
    runner::Backend,
    triplet::Triplet,
};
use std::{fs, path::PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TRIPLET: &str = "x86_64-linux-musl";

struct Stubbed {
    url: &'static str,
}

#[async_trait]
impl StandardRecipe for Stubbed {
    fn name(&self) -> &'static str {
        "stubbed"
    }

    fn source(&self) -> Repository {
        Repository::new("stubbed", self.url, "HEAD")
    }

    fn configure_backend(&self) -> Backend {
        Backend::Configure
    }

    fn build_backend(&self) -> Backend {
        Backend::Make
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("usr/bin/stubbed")]
    }

    async fn configure(&self, step: &mut StepContext<'_>) -> anyhow::Result<()> {
        let source = step.source_directory()?.to_path_buf();
        step.configure(
            &source,
            step.build_directory,
            vec![ConfigureOptions::with_flags(["--enable-stub"])],
        )
        .await
    }

    async fn build(&self, step: &mut StepContext<'_>) -> anyhow::Result<()> {
        step.make_install(step.build_directory, vec![]).await
    }
}

/// A toolchain of shell stubs, a source repository whose `configure`
/// records its arguments and a `make` that either installs a placeholder
/// binary or fails.
struct Fixture {
    _upstream: Upstream,
    toolchain: TempDir,
    logs: TempDir,
    output: TempDir,
    url: &'static str,
}

impl Fixture {
    fn new(make_succeeds: bool) -> Self {
        let logs = TempDir::new().unwrap();
        let configure_log = logs.path().join("configure.log");
        let make_log = logs.path().join("make.log");

        let upstream = Upstream::new();
        upstream.write(
            "configure",
            &format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\n",
                configure_log.display()
            ),
            true,
        );
        upstream.commit_paths(&["configure"], "add configure");

        let toolchain = TempDir::new().unwrap();
        let bin = toolchain.path().join("usr/bin");
        for tool in ["clang", "clang++", "ld.lld"] {
            write_script(&bin.join(tool), "exit 0");
        }

        let make = if make_succeeds {
            format!(
                "printf '%s\\n' \"$@\" > '{}'\n\
for arg in \"$@\"; do\n  case \"$arg\" in DESTDIR=*) dest=\"${{arg#DESTDIR=}}\" ;; esac\ndone\n\
mkdir -p \"$dest/bin\" && echo stub > \"$dest/bin/stubbed\"",
                make_log.display()
            )
        } else {
            "echo 'no rule to make target' >&2\nexit 2".to_string()
        };
        write_script(&bin.join("make"), &make);

        let url: &'static str = Box::leak(upstream.url().into_boxed_str());

        Self {
            _upstream: upstream,
            toolchain,
            logs,
            output: TempDir::new().unwrap(),
            url,
        }
    }

    fn builder(&self) -> PackageBuilder {
        let context = BuildContext::new(CancellationToken::new())
            .with_output_directory(self.output.path())
            .with_toolchain(Toolchain::new(
                self.toolchain.path(),
                TRIPLET.parse::<Triplet>().unwrap(),
            ));

        PackageBuilder::new(Box::new(Standard(Stubbed { url: self.url })), context).unwrap()
    }

    fn log(&self, name: &str) -> Vec<String> {
        fs::read_to_string(self.logs.path().join(name))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn configure_targets_the_toolchain_and_make_installs_under_usr() {
    let fixture = Fixture::new(true);
    let stale = fixture.output.path().join("stale");
    fs::write(&stale, "left over").unwrap();

    let mut builder = fixture.builder();
    builder.check_host_requirements().await.unwrap();
    builder.build().await.unwrap();

    assert_eq!(builder.state(), BuildState::Built);
    assert!(!stale.exists());

    let configure = fixture.log("configure.log");
    assert!(configure.contains(&format!("--host={}", TRIPLET)), "{:?}", configure);
    assert!(configure.contains(&"--prefix=/".to_string()), "{:?}", configure);
    assert!(configure.contains(&"--enable-stub".to_string()), "{:?}", configure);

    let compiler = fixture.toolchain.path().join("usr/bin/clang");
    assert!(
        configure.contains(&format!("CC={}", compiler.display())),
        "{:?}",
        configure
    );

    let make = fixture.log("make.log");
    assert!(make.contains(&"install".to_string()), "{:?}", make);
    assert!(
        make.contains(&format!("DESTDIR={}", fixture.output.path().join("usr").display())),
        "{:?}",
        make
    );

    assert!(fixture.output.path().join("usr/bin/stubbed").exists());
}

#[tokio::test]
async fn placeholder_output_fails_verification() {
    let fixture = Fixture::new(true);

    let mut builder = fixture.builder();
    builder.build().await.unwrap();

    let err = builder.verify_build().await.unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::VerificationFailure, "{:?}", err);
}

#[tokio::test]
async fn failing_make_names_the_phase_and_blocks_verification() {
    let fixture = Fixture::new(false);

    let mut builder = fixture.builder();
    let err = builder.build().await.unwrap_err();

    assert_eq!(ErrorKind::of(&err), ErrorKind::CommandFailure, "{:?}", err);

    let failure = err.downcast_ref::<PhaseFailure>().unwrap();
    assert_eq!(failure.package, "stubbed");
    assert_eq!(failure.index, 1);
    assert_eq!(failure.phase, "build");
    assert_eq!(failure.backend, Backend::Make);

    assert!(format!("{:?}", err).contains("no rule to make target"));

    assert_eq!(builder.state(), BuildState::Failed);
    assert!(builder.verify_build().await.is_err());
}

#[tokio::test]
async fn missing_toolchain_tools_are_reported_before_building() {
    let fixture = Fixture::new(true);
    fs::remove_file(fixture.toolchain.path().join("usr/bin/ld.lld")).unwrap();

    let mut builder = fixture.builder();
    let err = builder.check_host_requirements().await.unwrap_err();

    assert_eq!(ErrorKind::of(&err), ErrorKind::RequirementMissing, "{:?}", err);
    assert_eq!(builder.state(), BuildState::Failed);
}

#[tokio::test]
async fn clang_that_cannot_execute_fails_the_host_check() {
    let fixture = Fixture::new(true);
    write_script(
        &fixture.toolchain.path().join("usr/bin/clang"),
        "echo 'cannot execute binary file' >&2\nexit 126",
    );

    let mut builder = fixture.builder();
    let err = builder.check_host_requirements().await.unwrap_err();

    assert_eq!(ErrorKind::of(&err), ErrorKind::RequirementMissing, "{:?}", err);
    assert!(format!("{:?}", err).contains("--version"), "{:?}", err);
    assert_eq!(builder.state(), BuildState::Failed);
}
