use anyhow::{anyhow, Result};
use std::{collections::BTreeMap, path::Path};
use tokio::fs;

/// Replaces the named symbols of a Kconfig `.config`, whether set or
/// commented out as not set. Symbols missing from the file are appended.
pub fn apply(contents: &str, replacements: &BTreeMap<String, String>) -> String {
    let mut pending = replacements.clone();

    let mut lines = contents
        .lines()
        .map(|line| {
            let symbol = line
                .split_once('=')
                .map(|(name, _)| name)
                .or_else(|| {
                    line.strip_prefix("# ")
                        .and_then(|rest| rest.strip_suffix(" is not set"))
                })
                .filter(|name| replacements.contains_key(*name));

            match symbol {
                Some(name) => {
                    pending.remove(name);
                    format!("{}=\"{}\"", name, replacements[name])
                }
                None => line.to_string(),
            }
        })
        .collect::<Vec<_>>();

    for (name, value) in pending {
        lines.push(format!("{}=\"{}\"", name, value));
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

/// Copies a Kconfig file to `destination` with `replacements` applied.
pub async fn copy_with_replacements(
    source: &Path,
    destination: &Path,
    replacements: &BTreeMap<String, String>,
) -> Result<()> {
    let contents = fs::read_to_string(source)
        .await
        .map_err(|err| anyhow!("failed to read kconfig {}: {:?}", source.display(), err))?;

    fs::write(destination, apply(&contents, replacements))
        .await
        .map_err(|err| anyhow!("failed to write kconfig {}: {:?}", destination.display(), err))?;

    Ok(())
}
