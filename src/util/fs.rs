//! Filesystem utilities.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Canonicalize a path, but don't fail if it doesn't exist yet.
/// Returns the path as-is if canonicalization fails.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Create or re-point a symlink so that it resolves to `target`.
///
/// A symlink that already resolves to `target` is left untouched, so
/// repeated configuration of the same build directory is a no-op.
pub fn update_symlink(target: &Path, link: &Path) -> Result<()> {
    let target = normalize_path(target);

    if link.is_symlink() {
        if let Ok(existing) = fs::read_link(link) {
            if normalize_path(&existing) == target {
                return Ok(());
            }
        }
    }
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)
            .with_context(|| format!("failed to remove stale link: {}", link.display()))?;
    }

    std::os::unix::fs::symlink(&target, link).with_context(|| {
        format!(
            "failed to link {} -> {}",
            link.display(),
            target.display()
        )
    })
}

/// Parse a Kconfig fragment into a name -> value map.
///
/// Comments (everything after `#`) and blank lines are ignored.
pub fn read_kconfig_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read file: {}", path.display()))?;

    let mut result = BTreeMap::new();
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once('=') {
            result.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(result)
}

/// Write a name -> value map out in Kconfig format.
///
/// The file is left untouched when it already holds the same definitions,
/// so the external build tool's configure cache stays valid.
pub fn write_kconfig_file(path: &Path, defs: &BTreeMap<String, String>) -> Result<()> {
    if path.exists() {
        if let Ok(existing) = read_kconfig_file(path) {
            if existing == *defs {
                return Ok(());
            }
        }
    }

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = fs::File::create(path)
        .with_context(|| format!("failed to write file: {}", path.display()))?;
    for (name, value) in defs {
        writeln!(file, "{}={}", name, value)?;
    }
    Ok(())
}
