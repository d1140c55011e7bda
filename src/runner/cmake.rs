use super::{Backend, GenericRunner, Invocation, Runner};
use crate::options::{merge_all, CMakeOptions};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use sysinfo::System;
use tokio::fs;

const BYTES_PER_LINK_JOB: u64 = 15 * 1024 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct CMake {
    pub runner: GenericRunner,
    pub generator: Option<String>,
    pub source_path: PathBuf,
    pub caches: Vec<PathBuf>,
    pub options: Vec<CMakeOptions>,
}

impl CMake {
    /// Configures `source_path` for the Ninja generator.
    pub fn new(runner: GenericRunner, source_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            generator: Some("Ninja".to_string()),
            source_path: source_path.into(),
            caches: vec![],
            options: vec![],
        }
    }

    pub fn arguments(&self) -> Result<Vec<String>> {
        let merged: CMakeOptions = merge_all(self.options.iter().cloned())?;

        let mut args = vec![];

        if let Some(generator) = &self.generator {
            args.push("-G".to_string());
            args.push(generator.clone());
        }

        args.extend(merged.undefines.iter().map(|name| format!("-U{}", name)));

        args.extend(
            merged
                .defines
                .render()
                .into_iter()
                .map(|(name, value)| format!("-D{}={}", name, value)),
        );

        for cache in &self.caches {
            args.push("-C".to_string());
            args.push(cache.display().to_string());
        }

        args.push(self.source_path.display().to_string());

        Ok(args)
    }
}

#[async_trait]
impl Runner for CMake {
    fn backend(&self) -> Backend {
        Backend::CMake
    }

    fn invocation(&self) -> Result<Invocation> {
        Ok(self.runner.invocation("cmake", self.arguments()?)?)
    }
}

/// Reads `NAME:TYPE=value` entries from a `CMakeCache.txt`.
pub async fn read_cache(path: &Path) -> Result<BTreeMap<String, String>> {
    let contents = fs::read_to_string(path)
        .await
        .map_err(|err| anyhow!("failed to read cmake cache {}: {:?}", path.display(), err))?;

    Ok(parse_cache(&contents))
}

pub fn parse_cache(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//") && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let name = key.split_once(':').map(|(name, _)| name).unwrap_or(key);
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// How many concurrent link jobs the available memory allows.
pub fn parallel_link_jobs() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    link_jobs_for(system.available_memory())
}

pub fn link_jobs_for(available_bytes: u64) -> u64 {
    (available_bytes / BYTES_PER_LINK_JOB).max(1)
}
