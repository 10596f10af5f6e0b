//! Zephyr version parsing.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// Parse a human-readable version string (e.g. "v2.4" or "2.4.99") into a
/// `(major, minor)` pair. The patch level, if present, is ignored for
/// compatibility checks.
pub fn parse_version(version: &str) -> Result<(u32, u32)> {
    let trimmed = version.strip_prefix('v').unwrap_or(version);
    let mut parts = trimmed.split(['.', '_']);

    let major = parts
        .next()
        .and_then(|p| p.parse().ok())
        .with_context(|| format!("`{}` does not look like a Zephyr version", version))?;
    let minor = parts
        .next()
        .and_then(|p| p.parse().ok())
        .with_context(|| format!("`{}` does not look like a Zephyr version", version))?;

    if let Some(patch) = parts.next() {
        if patch.parse::<u32>().is_err() {
            bail!("`{}` does not look like a Zephyr version", version);
        }
    }
    if parts.next().is_some() {
        bail!("`{}` does not look like a Zephyr version", version);
    }

    Ok((major, minor))
}

/// Read the Zephyr version from the VERSION file at the root of a Zephyr
/// source tree.
pub fn read_zephyr_version(zephyr_base: &Path) -> Result<(u32, u32)> {
    let path = zephyr_base.join("VERSION");
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut major = None;
    let mut minor = None;
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "VERSION_MAJOR" => major = value.trim().parse().ok(),
            "VERSION_MINOR" => minor = value.trim().parse().ok(),
            _ => {}
        }
    }

    match (major, minor) {
        (Some(major), Some(minor)) => Ok((major, minor)),
        _ => bail!("{} has no VERSION_MAJOR/VERSION_MINOR", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_with_prefix() {
        assert_eq!(parse_version("v2.4").unwrap(), (2, 4));
        assert_eq!(parse_version("v2.6.99").unwrap(), (2, 6));
    }

    #[test]
    fn test_parse_version_bare() {
        assert_eq!(parse_version("2.5").unwrap(), (2, 5));
        assert_eq!(parse_version("1_7").unwrap(), (1, 7));
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(parse_version("").is_err());
        assert!(parse_version("v2").is_err());
        assert!(parse_version("banana").is_err());
        assert!(parse_version("v2.4.x").is_err());
        assert!(parse_version("1.2.3.4").is_err());
    }

    #[test]
    fn test_read_zephyr_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("VERSION"),
            "VERSION_MAJOR = 2\nVERSION_MINOR = 6\nPATCHLEVEL = 99\n",
        )
        .unwrap();
        assert_eq!(read_zephyr_version(dir.path()).unwrap(), (2, 6));
    }

    #[test]
    fn test_read_zephyr_version_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("VERSION"), "PATCHLEVEL = 99\n").unwrap();
        assert!(read_zephyr_version(dir.path()).is_err());
    }
}
