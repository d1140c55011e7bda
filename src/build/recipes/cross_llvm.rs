use crate::{
    build::{
        BuildContext, Capabilities, Capability, HasTargetTriplet, Phase, PhasedRecipe, Repository,
        StepContext, Verification,
    },
    options::{CMakeOptions, MakeOptions, OptionMap, OptionValue, Switch},
    runner::{
        cmake::{parallel_link_jobs, read_cache},
        host::{check_executables, find_executable, MinimumVersion},
        Backend,
    },
    triplet::Triplet,
    verify::{version_pattern, Comparator, VersionCheck},
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use semver::Version;
use std::path::PathBuf;
use tracing::info;

pub const LLVM: Repository = Repository::new(
    "llvm",
    "https://github.com/llvm/llvm-project.git",
    "refs/tags/llvmorg-16.0.6",
);

pub const MUSL: Repository = Repository::new(
    "musl",
    "git://git.musl-libc.org/musl",
    "refs/tags/v1.2.4",
);

pub const CAPABILITIES: Capabilities = Capabilities::new(&[
    Capability::Source,
    Capability::FilesystemOutput,
    Capability::GitRef,
    Capability::TargetTriplet,
]);

const VENDOR: &str = "distrobuild";

const HOST_TOOLS: [&str; 6] = ["cmake", "python3", "ninja", "make", "clang", "clang++"];

const SYSROOT: &str = "sysroot";
const MUSL_BUILD: &str = "musl";
const LLVM_BUILD: &str = "llvm";

/// A clang/lld cross compiler built with the host compiler. The target's
/// libc headers are staged first so the runtimes can be built against them.
pub struct CrossLlvm;

/// `ARCH` as musl's build spells it.
pub fn musl_arch(triplet: &Triplet) -> &str {
    match triplet.machine.as_str() {
        "i386" | "i486" | "i586" | "i686" => "i386",
        "amd64" => "x86_64",
        "arm64" => "aarch64",
        "ppc64" | "ppc64le" | "powerpc64le" => "powerpc64",
        "ppc" => "powerpc",
        m if m.starts_with("armv") => "arm",
        m => m,
    }
}

/// The LLVM backend that generates code for `triplet`.
pub fn llvm_target(triplet: &Triplet) -> &'static str {
    match triplet.machine.as_str() {
        "aarch64" | "arm64" => "AArch64",
        "powerpc" | "powerpc64" | "powerpc64le" | "ppc" | "ppc64" | "ppc64le" => "PowerPC",
        "riscv32" | "riscv64" => "RISCV",
        "s390x" => "SystemZ",
        "mips" | "mipsel" | "mips64" | "mips64el" => "Mips",
        m if m.starts_with("arm") => "ARM",
        _ => "X86",
    }
}

/// Reads `major.minor.patch` of the configured project from a CMake cache.
pub fn cache_version(cache: &std::collections::BTreeMap<String, String>) -> Result<String> {
    let part = |name: &str| {
        cache
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("cmake cache has no {}", name))
    };

    Ok(format!(
        "{}.{}.{}",
        part("CMAKE_PROJECT_VERSION_MAJOR")?,
        part("CMAKE_PROJECT_VERSION_MINOR")?,
        part("CMAKE_PROJECT_VERSION_PATCH")?
    ))
}

fn target_triplet(step: &StepContext<'_>) -> Triplet {
    step.context
        .target_triplet()
        .cloned()
        .unwrap_or_else(Triplet::default_target)
}

pub fn cmake_defines(
    host: &Triplet,
    target: &Triplet,
    compilers: (PathBuf, PathBuf),
    sysroot: PathBuf,
    link_jobs: u64,
) -> CMakeOptions {
    let (c_compiler, cxx_compiler) = compilers;
    let target_name = target.to_string();
    let sysroot = sysroot.display().to_string();

    let mut backends = vec![llvm_target(host)];
    if !backends.contains(&llvm_target(target)) {
        backends.push(llvm_target(target));
    }

    let defines = OptionMap::new()
        .with("LLVM_HOST_TRIPLE", host.to_string())
        .with("LLVM_DEFAULT_TARGET_TRIPLE", target_name.clone())
        .with("CMAKE_SYSTEM_NAME", "Linux")
        .with("CMAKE_C_COMPILER", c_compiler.display().to_string())
        .with("CMAKE_CXX_COMPILER", cxx_compiler.display().to_string())
        .with("CMAKE_C_COMPILER_TARGET", host.to_string())
        .with("CMAKE_CXX_COMPILER_TARGET", host.to_string())
        .with("CMAKE_BUILD_TYPE", "Release")
        .with("CMAKE_C_FLAGS", OptionValue::flags(["-DTSAN_VECTORIZE=0"]))
        .with("CMAKE_CXX_FLAGS", OptionValue::flags(["-DTSAN_VECTORIZE=0"]))
        .with(
            "LLVM_ENABLE_PROJECTS",
            OptionValue::joined(";", ["clang", "clang-tools-extra", "lld"]),
        )
        .with(
            "LLVM_ENABLE_RUNTIMES",
            OptionValue::joined(";", ["compiler-rt", "libcxx", "libcxxabi", "libunwind"]),
        )
        .with("LLVM_TARGETS_TO_BUILD", OptionValue::joined(";", backends))
        .with("LLVM_RUNTIME_TARGETS", target_name.clone())
        .with("LLVM_BUILTIN_TARGETS", target_name.clone())
        .with(format!("RUNTIMES_{}_CMAKE_SYSROOT", target_name), sysroot.clone())
        .with(format!("BUILTINS_{}_CMAKE_SYSROOT", target_name), sysroot)
        .with(format!("RUNTIMES_{}_LIBCXX_HAS_MUSL_LIBC", target_name), Switch::On)
        .with("LLVM_APPEND_VC_REV", Switch::On)
        .with("LLVM_ENABLE_PIC", Switch::On)
        .with("LLVM_ENABLE_LLD", Switch::On)
        .with("LLVM_ENABLE_ZSTD", Switch::ForcedOn)
        .with("LLVM_INSTALL_BINUTILS_SYMLINKS", Switch::On)
        .with("LLVM_INSTALL_CCTOOLS_SYMLINKS", Switch::On)
        .with("LLVM_INSTALL_UTILS", Switch::On)
        .with("LLVM_PARALLEL_LINK_JOBS", link_jobs.to_string())
        .with("COMPILER_RT_BUILD_SANITIZERS", Switch::Off)
        .with("CLANG_DEFAULT_RTLIB", "compiler-rt")
        .with("CLANG_DEFAULT_UNWINDLIB", "libunwind")
        .with("CLANG_DEFAULT_CXX_STDLIB", "libc++")
        .with("LIBCXX_CXX_ABI", "libcxxabi")
        .with("LIBCXX_USE_COMPILER_RT", Switch::On)
        .with("LIBCXXABI_USE_LLVM_UNWINDER", Switch::On)
        .with("LIBCXXABI_USE_COMPILER_RT", Switch::On)
        .with("LIBUNWIND_USE_COMPILER_RT", Switch::On)
        .with("CLANG_VENDOR", VENDOR)
        .with("LLD_VENDOR", VENDOR);

    CMakeOptions {
        defines,
        undefines: vec!["CLANG_VENDOR_UTI".to_string()],
    }
}

impl CrossLlvm {
    async fn musl_headers(&self, step: &StepContext<'_>) -> Result<()> {
        let target = target_triplet(step);
        let build = step.work_directory(MUSL_BUILD).await?;
        let sysroot = step.work_directory(SYSROOT).await?;

        step.copy_source(step.source(MUSL.name)?, &build).await?;

        let variables = OptionMap::new()
            .with("ARCH", musl_arch(&target))
            .with("prefix", "/usr")
            .with("DESTDIR", sysroot.display().to_string());

        step.make_target(&build, "install-headers", vec![MakeOptions::with_variables(variables)])
            .await?;

        Ok(())
    }

    async fn configure(&self, step: &StepContext<'_>) -> Result<()> {
        let target = target_triplet(step);
        let build = step.work_directory(LLVM_BUILD).await?;

        let c_compiler = find_executable("clang", None)?;
        let cxx_compiler = find_executable("clang++", None)?;

        let output = step
            .command(&build, &c_compiler, ["-dumpmachine"])
            .await?;
        let machine = output.stdout.trim();
        let host: Triplet = machine
            .parse()
            .map_err(|err| anyhow!("failed to parse host triplet '{}': {}", machine, err))?;

        info!(host = %host, target = %target, "configuring cross compiler");

        let defines = cmake_defines(
            &host,
            &target,
            (c_compiler, cxx_compiler),
            step.build_directory.join(SYSROOT),
            parallel_link_jobs(),
        );

        step.cmake(&step.source(LLVM.name)?.join("llvm"), &build, vec![defines])
            .await
    }

    async fn build(&self, step: &mut StepContext<'_>) -> Result<()> {
        let build = step.build_directory.join(LLVM_BUILD);

        step.ninja_install(&build).await?;

        let cache = read_cache(&build.join("CMakeCache.txt")).await?;
        let version = cache_version(&cache)?;

        info!("llvm source version {}", version);

        step.record.version = Some(version);
        Ok(())
    }
}

#[async_trait]
impl PhasedRecipe for CrossLlvm {
    fn name(&self) -> &str {
        "cross-llvm"
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn sources(&self) -> Vec<Repository> {
        vec![LLVM, MUSL]
    }

    async fn check_host_requirements(&self, context: &BuildContext) -> Result<()> {
        check_executables(&HOST_TOOLS, None)?;

        let cancel = context.cancel_token();
        MinimumVersion::new("cmake", "cmake version ", Version::new(3, 20, 0))
            .check(cancel)
            .await?;
        MinimumVersion::new("python3", "Python ", Version::new(3, 6, 0))
            .check(cancel)
            .await?;

        Ok(())
    }

    fn phases(&self) -> Vec<Phase> {
        vec![
            Phase::new("musl-headers", Backend::Make),
            Phase::new("configure", Backend::CMake),
            Phase::new("build", Backend::Ninja),
        ]
    }

    async fn run_phase(&self, phase: &Phase, step: &mut StepContext<'_>) -> Result<()> {
        match phase.name {
            "musl-headers" => self.musl_headers(step).await,
            "configure" => self.configure(step).await,
            "build" => self.build(step).await,
            name => bail!("cross-llvm has no phase named {}", name),
        }
    }

    async fn verify(&self, verification: &Verification<'_>) -> Result<()> {
        let clang = verification.output_directory.join("usr/bin/clang");

        let check = VersionCheck::new(
            verification.invocation(&clang, ["--version"]),
            version_pattern("clang version ", "")?,
            Comparator::Exact(verification.recorded_version()?),
        );

        check.run(verification.context.cancel_token()).await?;
        Ok(())
    }
}
