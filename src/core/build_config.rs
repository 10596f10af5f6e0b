//! Composable build configuration.

use std::collections::BTreeMap;
use std::ops::BitOr;
use std::path::{Path, PathBuf};

use crate::errors::BuildError;
use crate::exec::ProcessBuilder;
use crate::util::fs::{normalize_path, write_kconfig_file};

/// An immutable bundle of everything one configuration-generator
/// invocation needs: environment variables, cmake definitions, kconfig
/// definitions, and kconfig fragment files.
///
/// Configs compose with `|`. The merge is associative but not
/// commutative: on a key collision the right-hand operand wins, which is
/// how increasingly specific overrides are layered
/// (base | toolchain | modules | overlays | variant).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildConfig {
    environ: BTreeMap<String, String>,
    cmake_defs: BTreeMap<String, String>,
    kconfig_defs: BTreeMap<String, String>,
    kconfig_files: Vec<PathBuf>,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environ.insert(key.into(), value.into());
        self
    }

    /// Add a cmake `-D` definition.
    pub fn cmake_def(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cmake_defs.insert(key.into(), value.into());
        self
    }

    /// Add a kconfig definition.
    pub fn kconfig_def(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kconfig_defs.insert(key.into(), value.into());
        self
    }

    /// Add a kconfig fragment file.
    pub fn kconfig_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.kconfig_files.contains(&path) {
            self.kconfig_files.push(path);
        }
        self
    }

    pub fn environ(&self) -> &BTreeMap<String, String> {
        &self.environ
    }

    pub fn cmake_defs(&self) -> &BTreeMap<String, String> {
        &self.cmake_defs
    }

    pub fn kconfig_defs(&self) -> &BTreeMap<String, String> {
        &self.kconfig_defs
    }

    pub fn kconfig_files(&self) -> &[PathBuf] {
        &self.kconfig_files
    }

    /// Key-wise union of two configs; `other` wins on collision. No key
    /// present in only one operand is ever dropped. Kconfig files keep
    /// their relative order, left operand first, duplicates removed.
    pub fn merge(&self, other: &BuildConfig) -> BuildConfig {
        let union = |a: &BTreeMap<String, String>, b: &BTreeMap<String, String>| {
            let mut merged = a.clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
        };

        let mut kconfig_files = self.kconfig_files.clone();
        for path in &other.kconfig_files {
            if !kconfig_files.contains(path) {
                kconfig_files.push(path.clone());
            }
        }

        BuildConfig {
            environ: union(&self.environ, &other.environ),
            cmake_defs: union(&self.cmake_defs, &other.cmake_defs),
            kconfig_defs: union(&self.kconfig_defs, &other.kconfig_defs),
            kconfig_files,
        }
    }

    /// Produce the configuration-generator command line for this config.
    ///
    /// Kconfig definitions are written to `kconfig_path` (a no-op when
    /// the file already holds the same content) and the path joins the
    /// effective fragment list, which is passed as a single `CONF_FILE`
    /// definition. Definitions without a destination path are an error:
    /// there is nowhere to emit them.
    pub fn cmake_invocation(
        &self,
        cmake: &Path,
        source_dir: &Path,
        build_dir: &Path,
        kconfig_path: Option<&Path>,
    ) -> Result<ProcessBuilder, BuildError> {
        let mut kconfig_files = self.kconfig_files.clone();
        match kconfig_path {
            Some(path) => {
                write_kconfig_file(path, &self.kconfig_defs)?;
                kconfig_files.push(path.to_path_buf());
            }
            None if !self.kconfig_defs.is_empty() => {
                return Err(BuildError::Configuration(
                    "kconfig definitions present but no kconfig output path was supplied"
                        .to_string(),
                ));
            }
            None => {}
        }

        let mut defs = self.cmake_defs.clone();
        if !kconfig_files.is_empty() {
            let joined = kconfig_files
                .iter()
                .map(|p| normalize_path(p).display().to_string())
                .collect::<Vec<_>>()
                .join(";");
            defs.insert("CONF_FILE".to_string(), joined);
        }

        let mut cmd = ProcessBuilder::new(cmake)
            .arg("-S")
            .arg(source_dir)
            .arg("-B")
            .arg(build_dir)
            .arg("-GNinja");
        for (key, value) in &defs {
            cmd = cmd.arg(format!("-D{}={}", key, value));
        }
        for (key, value) in &self.environ {
            cmd = cmd.env(key, value);
        }
        Ok(cmd)
    }
}

impl BitOr for BuildConfig {
    type Output = BuildConfig;

    fn bitor(self, rhs: BuildConfig) -> BuildConfig {
        self.merge(&rhs)
    }
}
