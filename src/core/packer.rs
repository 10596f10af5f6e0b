//! Artifact packers: how variant build trees become output files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::build_config::BuildConfig;
use crate::errors::BuildError;

/// The variant name used by single-image packers.
const SINGLE_IMAGE: &str = "singleimage";

/// Closed set of artifact-collection strategies.
///
/// A packer decides which build variants a project needs and which files
/// from their build directories are the final outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackerKind {
    /// The ELF output of a single build, unmodified.
    Elf,
    /// The raw binary output of a single build, unmodified.
    Raw,
}

impl PackerKind {
    /// The build variants this packer requires, with their extra config.
    pub fn configs(&self) -> Vec<(String, BuildConfig)> {
        match self {
            PackerKind::Elf | PackerKind::Raw => {
                vec![(SINGLE_IMAGE.to_string(), BuildConfig::new())]
            }
        }
    }

    /// Collect the output artifacts from completed variant builds.
    ///
    /// `build_dirs` maps variant name to its build directory; the work
    /// directory is scratch space for packers that post-process images.
    /// Returns `(source path, output file name)` pairs to copy into the
    /// output directory.
    pub fn pack(
        &self,
        _work_dir: &Path,
        build_dirs: &BTreeMap<String, PathBuf>,
    ) -> Result<Vec<(PathBuf, String)>, BuildError> {
        let image_dir = build_dirs.get(SINGLE_IMAGE).ok_or_else(|| {
            BuildError::Resource(format!("no `{}` build directory to pack", SINGLE_IMAGE))
        })?;

        let artifact = match self {
            PackerKind::Elf => "zephyr.elf",
            PackerKind::Raw => "zephyr.bin",
        };
        Ok(vec![(
            image_dir.join("zephyr").join(artifact),
            artifact.to_string(),
        )])
    }
}
