use super::context::{HasFilesystemOutput, HasRootFs, HasToolchain, Toolchain};
use crate::{
    options::{
        CMakeOptions, ConfigureOptions, MakeOptions, MesonOptions, OptionMap, OptionValue,
        RunnerOptions,
    },
    triplet::Triplet,
};
use anyhow::{anyhow, Result};
use std::{
    env,
    path::{Path, PathBuf},
};

/// The option layers derived from a build's toolchain, sysroot and output
/// directory, in the order they are merged.
#[derive(Clone, Debug)]
pub struct Layers {
    toolchain: Option<Toolchain>,
    root_fs: Option<PathBuf>,
    output: PathBuf,
}

impl Layers {
    pub fn new<C>(context: &C) -> Result<Self>
    where
        C: HasToolchain + HasRootFs + HasFilesystemOutput,
    {
        let output = context
            .output_directory()
            .ok_or_else(|| anyhow!("no output directory has been prepared"))?;

        Ok(Self {
            toolchain: context.toolchain().cloned(),
            root_fs: context.root_fs_directory().map(Path::to_path_buf),
            output: output.to_path_buf(),
        })
    }

    pub fn runner(&self) -> Vec<RunnerOptions> {
        let mut layers = vec![];
        if let Some(toolchain) = &self.toolchain {
            layers.push(toolchain_runner(toolchain));
        }
        if let Some(root) = &self.root_fs {
            layers.push(sysroot_runner(root));
        }
        layers
    }

    pub fn configure(&self) -> Vec<ConfigureOptions> {
        let mut layers = vec![output_configure()];
        if let Some(toolchain) = &self.toolchain {
            layers.push(toolchain_configure(toolchain));
        }
        if let Some(root) = &self.root_fs {
            layers.push(sysroot_configure(root));
        }
        layers
    }

    pub fn cmake(&self) -> Vec<CMakeOptions> {
        let mut layers = vec![output_cmake(&self.output)];
        if let Some(toolchain) = &self.toolchain {
            layers.push(toolchain_cmake(toolchain));
        }
        if let Some(root) = &self.root_fs {
            layers.push(sysroot_cmake(root));
        }
        layers
    }

    pub fn meson(&self) -> Vec<MesonOptions> {
        let mut layers = vec![output_meson()];
        if let Some(toolchain) = &self.toolchain {
            layers.push(toolchain_meson(toolchain));
        }
        if let Some(root) = &self.root_fs {
            layers.push(sysroot_meson(root));
        }
        layers
    }

    /// `make install` variables placing files under `<output>/usr`.
    pub fn install_make(&self) -> MakeOptions {
        MakeOptions::with_variables(OptionMap::from([(
            "DESTDIR",
            self.output.join("usr").display().to_string(),
        )]))
    }

    /// Environment for installs configured with a `/usr` prefix.
    pub fn install_runner(&self) -> RunnerOptions {
        RunnerOptions {
            environment: OptionMap::from([("DESTDIR", self.output.display().to_string())]),
        }
    }
}

fn path(path: &Path) -> String {
    path.display().to_string()
}

fn toolchain_flags(toolchain: &Toolchain) -> OptionValue {
    OptionValue::flags([
        format!("--target={}", toolchain.triplet),
        "-gz=zstd".to_string(),
        format!("-fuse-ld={}", path(&toolchain.linker())),
    ])
}

pub fn toolchain_runner(toolchain: &Toolchain) -> RunnerOptions {
    let mut search = vec![path(&toolchain.bin_directory())];
    if let Ok(host_path) = env::var("PATH") {
        search.push(host_path);
    }

    RunnerOptions {
        environment: OptionMap::new().with("PATH", OptionValue::joined(":", search)),
    }
}

pub fn toolchain_configure(toolchain: &Toolchain) -> ConfigureOptions {
    ConfigureOptions {
        variables: OptionMap::new()
            .with("CC", path(&toolchain.c_compiler()))
            .with("CXX", path(&toolchain.cxx_compiler()))
            .with("CFLAGS", toolchain_flags(toolchain))
            .with("CXXFLAGS", toolchain_flags(toolchain))
            .with("LIBCC", "-lclang_rt.builtins"),
        ..Default::default()
    }
}

pub fn toolchain_cmake(toolchain: &Toolchain) -> CMakeOptions {
    let target = toolchain.triplet.to_string();

    CMakeOptions::with_defines(
        OptionMap::new()
            .with("CMAKE_C_COMPILER", path(&toolchain.c_compiler()))
            .with("CMAKE_CXX_COMPILER", path(&toolchain.cxx_compiler()))
            .with("CMAKE_ASM_COMPILER", path(&toolchain.c_compiler()))
            .with("CMAKE_LINKER", path(&toolchain.linker()))
            .with("CMAKE_C_COMPILER_TARGET", target.clone())
            .with("CMAKE_CXX_COMPILER_TARGET", target.clone())
            .with("CMAKE_ASM_COMPILER_TARGET", target)
            .with("CMAKE_C_FLAGS", toolchain_flags(toolchain))
            .with("CMAKE_CXX_FLAGS", toolchain_flags(toolchain)),
    )
}

pub fn toolchain_meson(toolchain: &Toolchain) -> MesonOptions {
    let triplet = &toolchain.triplet;

    MesonOptions::default()
        .cross_section(
            "binaries",
            OptionMap::new()
                .with("c", path(&toolchain.c_compiler()))
                .with("cpp", path(&toolchain.cxx_compiler())),
        )
        .cross_section(
            "host_machine",
            OptionMap::new()
                .with("system", triplet.kernel.clone())
                .with("cpu_family", cpu_family(triplet))
                .with("cpu", triplet.machine.clone())
                .with("endian", endian(triplet)),
        )
        .cross_section(
            "built-in options",
            OptionMap::new()
                .with("c_args", toolchain_flags(toolchain))
                .with("cpp_args", toolchain_flags(toolchain))
                .with("c_link_args", toolchain_flags(toolchain))
                .with("cpp_link_args", toolchain_flags(toolchain)),
        )
}

pub fn sysroot_runner(root: &Path) -> RunnerOptions {
    RunnerOptions {
        environment: OptionMap::new()
            .with(
                "PKG_CONFIG_PATH",
                OptionValue::joined(
                    ":",
                    [
                        path(&root.join("usr/lib/pkgconfig")),
                        path(&root.join("usr/share/pkgconfig")),
                    ],
                ),
            )
            .with("PKG_CONFIG_SYSROOT_DIR", path(root)),
    }
}

fn sysroot_flag(root: &Path) -> OptionValue {
    OptionValue::flags([format!("--sysroot={}", path(root))])
}

pub fn sysroot_configure(root: &Path) -> ConfigureOptions {
    ConfigureOptions {
        variables: OptionMap::new()
            .with("CFLAGS", sysroot_flag(root))
            .with("CXXFLAGS", sysroot_flag(root))
            .with("LDFLAGS", sysroot_flag(root)),
        ..Default::default()
    }
}

pub fn sysroot_cmake(root: &Path) -> CMakeOptions {
    CMakeOptions::with_defines(OptionMap::from([("CMAKE_SYSROOT", path(root))]))
}

pub fn sysroot_meson(root: &Path) -> MesonOptions {
    MesonOptions::default()
        .cross_section("properties", OptionMap::from([("sys_root", path(root))]))
        .cross_section(
            "built-in options",
            OptionMap::new()
                .with("c_args", sysroot_flag(root))
                .with("cpp_args", sysroot_flag(root))
                .with("c_link_args", sysroot_flag(root))
                .with("cpp_link_args", sysroot_flag(root)),
        )
}

pub fn output_configure() -> ConfigureOptions {
    ConfigureOptions {
        arguments: OptionMap::from([("prefix", "/")]),
        ..Default::default()
    }
}

pub fn output_cmake(output: &Path) -> CMakeOptions {
    CMakeOptions::with_defines(OptionMap::from([(
        "CMAKE_INSTALL_PREFIX",
        path(&output.join("usr")),
    )]))
}

pub fn output_meson() -> MesonOptions {
    MesonOptions::with_options(OptionMap::from([("prefix", "/usr")]))
}

/// Meson's `cpu_family` for a triplet machine.
pub fn cpu_family(triplet: &Triplet) -> String {
    let family = match triplet.machine.as_str() {
        "i386" | "i486" | "i586" | "i686" => "x86",
        "amd64" => "x86_64",
        "arm64" => "aarch64",
        "powerpc64" | "powerpc64le" | "ppc64" | "ppc64le" => "ppc64",
        "powerpc" | "ppc" => "ppc",
        m if m.starts_with("armv") => "arm",
        m if m.starts_with("riscv64") => "riscv64",
        m => m,
    };
    family.to_string()
}

pub fn endian(triplet: &Triplet) -> &'static str {
    match triplet.machine.as_str() {
        "powerpc" | "powerpc64" | "ppc" | "ppc64" | "s390x" | "mips" | "mips64" => "big",
        _ => "little",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build::context::BuildContext, options::merge_all};

    fn layers(root_fs: bool) -> Layers {
        let mut context = BuildContext::default()
            .with_toolchain(Toolchain::new(
                "/opt/llvm",
                "aarch64-linux-musl".parse().unwrap(),
            ))
            .with_output_directory("/out");
        if root_fs {
            context = context.with_root_fs_directory("/rootfs");
        }
        Layers::new(&context).unwrap()
    }

    #[test]
    fn configure_layers_merge_flags() {
        let merged: ConfigureOptions = merge_all(layers(true).configure()).unwrap();

        assert_eq!(
            merged.variables.get("CFLAGS").unwrap().render(),
            "--target=aarch64-linux-musl -gz=zstd -fuse-ld=/opt/llvm/usr/bin/ld.lld --sysroot=/rootfs"
        );
        assert_eq!(merged.variables.get("LDFLAGS").unwrap().render(), "--sysroot=/rootfs");
        assert_eq!(merged.arguments.get("prefix").unwrap().render(), "/");
    }

    #[test]
    fn cmake_layers_set_prefix_and_sysroot() {
        let merged: CMakeOptions = merge_all(layers(true).cmake()).unwrap();

        assert_eq!(
            merged.defines.get("CMAKE_INSTALL_PREFIX").unwrap().render(),
            "/out/usr"
        );
        assert_eq!(merged.defines.get("CMAKE_SYSROOT").unwrap().render(), "/rootfs");
        assert_eq!(
            merged.defines.get("CMAKE_C_COMPILER").unwrap().render(),
            "/opt/llvm/usr/bin/clang"
        );
    }

    #[test]
    fn runner_path_starts_with_toolchain() {
        let merged: RunnerOptions = merge_all(layers(false).runner()).unwrap();
        let search = merged.environment.get("PATH").unwrap().render();

        assert!(search.starts_with("/opt/llvm/usr/bin"));
        assert!(merged.environment.get("PKG_CONFIG_SYSROOT_DIR").is_none());
    }

    #[test]
    fn meson_layers_describe_host_machine() {
        let merged: MesonOptions = merge_all(layers(true).meson()).unwrap();

        let host = &merged.cross_file["host_machine"];
        assert_eq!(host.get("cpu_family").unwrap().render(), "aarch64");
        assert_eq!(host.get("endian").unwrap().render(), "little");
        assert_eq!(
            merged.cross_file["properties"].get("sys_root").unwrap().render(),
            "/rootfs"
        );
        assert_eq!(merged.options.get("prefix").unwrap().render(), "/usr");
    }

    #[test]
    fn install_destinations() {
        let layers = layers(false);

        assert_eq!(
            layers.install_make().variables.get("DESTDIR").unwrap().render(),
            "/out/usr"
        );
        assert_eq!(
            layers.install_runner().environment.get("DESTDIR").unwrap().render(),
            "/out"
        );
    }
}
