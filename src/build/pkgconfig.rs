use crate::paths::get_files_with_extension;
use anyhow::{anyhow, Result};
use std::path::Path;
use tokio::fs;
use tracing::debug;

const RELOCATED: [(&str, &str); 5] = [
    ("prefix", "/usr"),
    ("exec_prefix", "${prefix}"),
    ("libdir", "${prefix}/lib"),
    ("includedir", "${prefix}/include"),
    ("bindir", "${prefix}/bin"),
];

/// Points the directory variables of a `.pc` file back at `/usr` so the
/// installed tree can be dropped into a root filesystem as-is.
pub fn relocate(contents: &str) -> String {
    let mut relocated = contents
        .lines()
        .map(|line| {
            let replacement = RELOCATED.iter().find(|(name, _)| {
                line.strip_prefix(name)
                    .map(|rest| rest.starts_with('='))
                    .unwrap_or(false)
            });

            match replacement {
                Some((name, value)) => format!("{}={}", name, value),
                None => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    if contents.ends_with('\n') {
        relocated.push('\n');
    }

    relocated
}

/// Rewrites every `.pc` file found in a `pkgconfig` directory under `root`.
pub async fn relocate_all(root: &Path) -> Result<usize> {
    let files = get_files_with_extension(root, "pc")?
        .into_iter()
        .filter(|path| {
            path.parent()
                .and_then(Path::file_name)
                .map(|name| name == "pkgconfig")
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    for file in &files {
        let contents = fs::read_to_string(file)
            .await
            .map_err(|err| anyhow!("failed to read {}: {:?}", file.display(), err))?;

        fs::write(file, relocate(&contents))
            .await
            .map_err(|err| anyhow!("failed to write {}: {:?}", file.display(), err))?;

        debug!(path = %file.display(), "relocated pkg-config file");
    }

    Ok(files.len())
}
