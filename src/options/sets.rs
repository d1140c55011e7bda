use super::{MergeError, Mergeable, OptionMap};
use std::collections::BTreeMap;

/// Environment overlay applied to every spawned process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    pub environment: OptionMap,
}

impl Mergeable for RunnerOptions {
    fn merge(self, other: Self) -> Result<Self, MergeError> {
        Ok(Self {
            environment: self.environment.merge(other.environment)?,
        })
    }
}

/// Options for an autoconf style `configure` script: `--name=value`
/// arguments, bare `--flag` tokens and trailing `NAME=value` variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigureOptions {
    pub arguments: OptionMap,
    pub flags: Vec<String>,
    pub variables: OptionMap,
}

impl ConfigureOptions {
    pub fn with_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

impl Mergeable for ConfigureOptions {
    fn merge(self, other: Self) -> Result<Self, MergeError> {
        Ok(Self {
            arguments: self.arguments.merge(other.arguments)?,
            flags: self.flags.merge(other.flags)?,
            variables: self.variables.merge(other.variables)?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CMakeOptions {
    pub defines: OptionMap,
    pub undefines: Vec<String>,
}

impl CMakeOptions {
    pub fn with_defines(defines: OptionMap) -> Self {
        Self {
            defines,
            ..Default::default()
        }
    }
}

impl Mergeable for CMakeOptions {
    fn merge(self, other: Self) -> Result<Self, MergeError> {
        Ok(Self {
            defines: self.defines.merge(other.defines)?,
            undefines: self.undefines.merge(other.undefines)?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MakeOptions {
    pub variables: OptionMap,
}

impl MakeOptions {
    pub fn with_variables(variables: OptionMap) -> Self {
        Self { variables }
    }
}

impl Mergeable for MakeOptions {
    fn merge(self, other: Self) -> Result<Self, MergeError> {
        Ok(Self {
            variables: self.variables.merge(other.variables)?,
        })
    }
}

/// Meson `-D` options plus the machine files, keyed by section name
/// (`binaries`, `host_machine`, `properties`, `built-in options`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MesonOptions {
    pub options: OptionMap,
    pub cross_file: BTreeMap<String, OptionMap>,
    pub native_file: BTreeMap<String, OptionMap>,
}

impl MesonOptions {
    pub fn with_options(options: OptionMap) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn cross_section(mut self, section: &str, entries: OptionMap) -> Self {
        self.cross_file.insert(section.to_string(), entries);
        self
    }

    pub fn native_section(mut self, section: &str, entries: OptionMap) -> Self {
        self.native_file.insert(section.to_string(), entries);
        self
    }
}

impl Mergeable for MesonOptions {
    fn merge(self, other: Self) -> Result<Self, MergeError> {
        Ok(Self {
            options: self.options.merge(other.options)?,
            cross_file: self.cross_file.merge(other.cross_file)?,
            native_file: self.native_file.merge(other.native_file)?,
        })
    }
}
