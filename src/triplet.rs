use std::{env, fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TripletError {
    #[error("triplet '{0}' is missing a machine field")]
    MissingMachine(String),
    #[error("triplet '{0}' is missing a kernel field")]
    MissingKernel(String),
}

/// A target description in the `machine[-vendor]-kernel[-libc]` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Triplet {
    pub machine: String,
    pub vendor: String,
    pub kernel: String,
    pub libc: String,
}

impl Triplet {
    pub fn new(machine: &str, vendor: &str, kernel: &str, libc: &str) -> Self {
        Self {
            machine: machine.to_string(),
            vendor: vendor.to_string(),
            kernel: kernel.to_string(),
            libc: libc.to_string(),
        }
    }

    /// `<host machine>-linux-musl`
    pub fn default_target() -> Self {
        Self::new(host_machine(), "", "linux", "musl")
    }

    /// File name of the dynamic loader for this target,
    /// e.g. `ld-musl-x86_64.so.1`.
    pub fn dynamic_loader_name(&self) -> String {
        format!("ld-{}-{}.so.1", self.libc, self.machine)
    }

    /// Machine name in the spelling the linux kernel build expects for `ARCH`.
    pub fn kernel_arch(&self) -> &str {
        match self.machine.as_str() {
            "x86_64" | "amd64" | "i386" | "i486" | "i586" | "i686" => "x86",
            "aarch64" | "arm64" => "arm64",
            m if m.starts_with("arm") => "arm",
            m if m.starts_with("riscv") => "riscv",
            m if m.starts_with("powerpc") || m.starts_with("ppc") => "powerpc",
            m => m,
        }
    }
}

impl FromStr for Triplet {
    type Err = TripletError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (machine, rest) = value.split_once('-').unwrap_or((value, ""));

        if machine.is_empty() {
            return Err(TripletError::MissingMachine(value.to_string()));
        }

        let (first, remainder) = rest.split_once('-').unwrap_or((rest, ""));

        let (vendor, os) = if first.eq_ignore_ascii_case("linux") {
            ("", rest)
        } else {
            (first, remainder)
        };

        let (kernel, libc) = os.split_once('-').unwrap_or((os, ""));

        if kernel.is_empty() {
            return Err(TripletError::MissingKernel(value.to_string()));
        }

        Ok(Triplet::new(machine, vendor, kernel, libc))
    }
}

impl fmt::Display for Triplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.machine)?;

        if !self.vendor.is_empty() {
            write!(f, "-{}", self.vendor)?;
        }

        write!(f, "-{}", self.kernel)?;

        if !self.libc.is_empty() {
            write!(f, "-{}", self.libc)?;
        }

        Ok(())
    }
}

pub fn host_machine() -> &'static str {
    match env::consts::ARCH {
        "x86" => "i686",
        arch => arch,
    }
}
