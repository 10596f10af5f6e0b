//! Module discovery and the per-build module symlink farm.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::build_config::BuildConfig;
use crate::errors::BuildError;
use crate::util::fs::{ensure_dir, update_symlink};

/// Module names the orchestrator knows how to wire up.
pub const KNOWN_MODULES: &[&str] = &["ec", "zephyr-chrome", "cmsis", "hal_stm32"];

/// Locate known modules as direct subdirectories of `modules_dir`.
pub fn locate_from_directory(modules_dir: &Path) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();
    for name in KNOWN_MODULES {
        let path = modules_dir.join(name);
        if path.is_dir() {
            found.insert(name.to_string(), path);
        }
    }
    found
}

/// Create one symlink per module under `symlink_dir` and return the
/// config pointing the build at them.
///
/// The links give every variant a stable module layout regardless of
/// where the modules actually live; re-running configure re-points them.
pub fn setup_module_symlinks(
    symlink_dir: &Path,
    modules: &BTreeMap<String, PathBuf>,
) -> Result<BuildConfig, BuildError> {
    ensure_dir(symlink_dir)?;

    let mut links = Vec::new();
    for (name, path) in modules {
        let link = symlink_dir.join(name);
        update_symlink(path, &link)?;
        links.push(link.display().to_string());
    }

    if links.is_empty() {
        return Ok(BuildConfig::new());
    }
    Ok(BuildConfig::new().cmake_def("ZEPHYR_MODULES", links.join(";")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("ec")).unwrap();
        std::fs::create_dir(dir.path().join("cmsis")).unwrap();
        std::fs::create_dir(dir.path().join("unrelated")).unwrap();

        let modules = locate_from_directory(dir.path());
        assert_eq!(modules.len(), 2);
        assert!(modules.contains_key("ec"));
        assert!(modules.contains_key("cmsis"));
    }

    #[test]
    fn test_setup_module_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let ec = dir.path().join("ec");
        std::fs::create_dir(&ec).unwrap();
        let mut modules = BTreeMap::new();
        modules.insert("ec".to_string(), ec.clone());

        let symlink_dir = dir.path().join("build").join("modules");
        let config = setup_module_symlinks(&symlink_dir, &modules).unwrap();

        let link = symlink_dir.join("ec");
        assert!(link.is_symlink());
        assert_eq!(
            crate::util::fs::normalize_path(&link),
            crate::util::fs::normalize_path(&ec)
        );
        assert_eq!(config.cmake_defs()["ZEPHYR_MODULES"], link.display().to_string());

        // Idempotent on re-configure.
        setup_module_symlinks(&symlink_dir, &modules).unwrap();
        assert!(link.is_symlink());
    }

    #[test]
    fn test_no_modules_no_defs() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup_module_symlinks(&dir.path().join("modules"), &BTreeMap::new()).unwrap();
        assert!(config.cmake_defs().is_empty());
    }
}
