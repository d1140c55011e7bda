use super::{Backend, GenericRunner, Invocation, Runner};
use crate::options::{merge_all, MesonOptions, OptionMap, OptionValue};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::{collections::BTreeMap, path::PathBuf};
use tera::{Context, Tera};
use tokio::fs;
use tracing::debug;

pub const CROSS_FILE_NAME: &str = "meson-cross-file.txt";
pub const NATIVE_FILE_NAME: &str = "meson-native-file.txt";

const MACHINE_FILE: &str = "{% for section, entries in sections %}[{{ section }}]
{% for key, value in entries %}{{ key }} = {{ value }}
{% endfor %}
{% endfor %}";

#[derive(Clone, Debug)]
pub struct Meson {
    pub runner: GenericRunner,
    pub source_directory: PathBuf,
    pub build_directory: PathBuf,
    pub options: Vec<MesonOptions>,
}

impl Meson {
    pub fn new(
        runner: GenericRunner,
        source_directory: impl Into<PathBuf>,
        build_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            source_directory: source_directory.into(),
            build_directory: build_directory.into(),
            options: vec![],
        }
    }

    pub fn cross_file_path(&self) -> PathBuf {
        self.build_directory.join(CROSS_FILE_NAME)
    }

    pub fn native_file_path(&self) -> PathBuf {
        self.build_directory.join(NATIVE_FILE_NAME)
    }

    fn merged(&self) -> Result<MesonOptions> {
        Ok(merge_all(self.options.iter().cloned())?)
    }

    pub fn arguments(&self) -> Result<Vec<String>> {
        let merged = self.merged()?;

        let mut args = vec![
            "setup".to_string(),
            "--reconfigure".to_string(),
            "--clearcache".to_string(),
            "--backend=ninja".to_string(),
            format!("--cross-file={}", self.cross_file_path().display()),
            format!("--native-file={}", self.native_file_path().display()),
        ];

        args.extend(
            merged
                .options
                .render()
                .into_iter()
                .map(|(name, value)| format!("-D{}={}", name, value)),
        );

        args.push(self.build_directory.display().to_string());
        args.push(self.source_directory.display().to_string());

        Ok(args)
    }
}

#[async_trait]
impl Runner for Meson {
    fn backend(&self) -> Backend {
        Backend::Meson
    }

    async fn prepare(&self) -> Result<()> {
        let merged = self.merged()?;

        fs::create_dir_all(&self.build_directory).await?;

        for (path, sections) in [
            (self.cross_file_path(), &merged.cross_file),
            (self.native_file_path(), &merged.native_file),
        ] {
            let contents = render_machine_file(sections)?;

            debug!(path = %path.display(), "writing meson machine file:\n{}", contents);

            fs::write(&path, contents)
                .await
                .map_err(|err| anyhow!("failed to write {}: {:?}", path.display(), err))?;
        }

        Ok(())
    }

    fn invocation(&self) -> Result<Invocation> {
        Ok(self.runner.invocation("meson", self.arguments()?)?)
    }
}

pub fn render_machine_file(sections: &BTreeMap<String, OptionMap>) -> Result<String> {
    let rendered = sections
        .iter()
        .map(|(section, entries)| {
            let entries = entries
                .iter()
                .map(|(key, value)| (key.clone(), machine_file_value(value)))
                .collect::<BTreeMap<_, _>>();
            (section.clone(), entries)
        })
        .collect::<BTreeMap<_, _>>();

    let mut context = Context::new();
    context.insert("sections", &rendered);

    Tera::one_off(MACHINE_FILE, &context, false)
        .map_err(|err| anyhow!("failed to render meson machine file: {:?}", err))
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Space joined values become meson arrays, everything else a string.
fn machine_file_value(value: &OptionValue) -> String {
    match value {
        OptionValue::Joined { values, separator } if separator == " " => {
            let items = values.iter().map(|v| quote(v)).collect::<Vec<_>>();
            format!("[{}]", items.join(", "))
        }
        other => quote(&other.render()),
    }
}
