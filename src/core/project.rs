//! Project descriptors and the project model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::build_config::BuildConfig;
use crate::core::packer::PackerKind;
use crate::errors::BuildError;
use crate::util::fs::normalize_path;
use crate::util::version::parse_version;

/// File name of the project descriptor.
pub const DESCRIPTOR_NAME: &str = "embark.yaml";

/// The validated contents of an `embark.yaml` descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProjectConfig {
    /// Board identifier passed to the configuration generator.
    pub board: String,
    /// Zephyr versions (e.g. "v2.6") this project builds against.
    pub supported_versions: Vec<String>,
    /// Required modules; absent means every known module.
    #[serde(default)]
    pub modules: Option<Vec<String>>,
    /// Which packer collects the output artifacts.
    pub output_type: PackerKind,
    /// Default toolchain name.
    pub toolchain: String,
    /// Whether the packed artifacts are runnable test binaries.
    #[serde(default)]
    pub is_test: bool,
    /// Extra device-tree overlay files, relative to the project directory.
    #[serde(default)]
    pub dts_overlays: Vec<PathBuf>,
}

impl ProjectConfig {
    /// The supported versions as comparable `(major, minor)` pairs.
    pub fn supported_versions(&self) -> Result<Vec<(u32, u32)>, BuildError> {
        self.supported_versions
            .iter()
            .map(|v| parse_version(v).map_err(BuildError::Other))
            .collect()
    }
}

/// A project directory plus its parsed descriptor.
#[derive(Debug, Clone)]
pub struct Project {
    project_dir: PathBuf,
    pub config: ProjectConfig,
}

/// The device-tree overlay a module would contribute for a board.
fn module_dts_overlay_name(module_path: &Path, board: &str) -> PathBuf {
    module_path
        .join("zephyr")
        .join("dts")
        .join("board-overlays")
        .join(format!("{}.dts", board))
}

impl Project {
    /// Load the project rooted at `project_dir`.
    ///
    /// `project_dir` may be a symlink (the `project` link inside a
    /// configured build directory); it is resolved first.
    pub fn open(project_dir: &Path) -> Result<Self, BuildError> {
        let project_dir = normalize_path(project_dir);
        let descriptor = project_dir.join(DESCRIPTOR_NAME);
        let contents = std::fs::read_to_string(&descriptor).map_err(|err| {
            BuildError::Resource(format!("failed to read {}: {}", descriptor.display(), err))
        })?;
        let config: ProjectConfig = serde_yaml::from_str(&contents).map_err(|err| {
            BuildError::Configuration(format!("{}: {}", descriptor.display(), err))
        })?;
        Ok(Project {
            project_dir,
            config,
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn packer(&self) -> PackerKind {
        self.config.output_type
    }

    /// The build variants of this project: one `(name, config)` pair per
    /// packer variant, with the project-level board and kconfig settings
    /// already merged in.
    pub fn iter_builds(&self) -> Vec<(String, BuildConfig)> {
        let mut conf = BuildConfig::new().cmake_def("BOARD", &self.config.board);
        if self.project_dir.join("boards").is_dir() {
            conf = conf.cmake_def("BOARD_ROOT", self.project_dir.display().to_string());
        }
        let prj_conf = self.project_dir.join("prj.conf");
        if prj_conf.is_file() {
            conf = conf.kconfig_file(prj_conf);
        }

        self.packer()
            .configs()
            .into_iter()
            .map(|(name, packer_config)| (name, conf.clone() | packer_config))
            .collect()
    }

    /// Collect device-tree overlays from the given modules and from the
    /// descriptor into a `DTC_OVERLAY_FILE` definition.
    pub fn find_dts_overlays(&self, modules: &BTreeMap<String, PathBuf>) -> BuildConfig {
        let mut overlays = Vec::new();
        for module_path in modules.values() {
            let dts = module_dts_overlay_name(module_path, &self.config.board);
            if dts.is_file() {
                overlays.push(normalize_path(&dts));
            }
        }
        overlays.extend(
            self.config
                .dts_overlays
                .iter()
                .map(|f| self.project_dir.join(f)),
        );

        if overlays.is_empty() {
            return BuildConfig::new();
        }
        let joined = overlays
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(";");
        BuildConfig::new().cmake_def("DTC_OVERLAY_FILE", joined)
    }

    /// Restrict a known-module map to the modules this project requires.
    ///
    /// Without an explicit module list the whole map is required; module
    /// conventions gate most of them behind kconfig anyway.
    pub fn prune_modules(
        &self,
        module_paths: &BTreeMap<String, PathBuf>,
    ) -> Result<BTreeMap<String, PathBuf>, BuildError> {
        let wanted: Vec<String> = match &self.config.modules {
            Some(modules) => modules.clone(),
            None => module_paths.keys().cloned().collect(),
        };

        let mut pruned = BTreeMap::new();
        for name in wanted {
            let path = module_paths.get(&name).ok_or_else(|| {
                BuildError::Resource(format!(
                    "the `{}` module is required by {}, but is not available",
                    name,
                    self.project_dir.display()
                ))
            })?;
            pruned.insert(name, path.clone());
        }
        Ok(pruned)
    }
}
