//! Toolchain name to build-configuration lookup.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::build_config::BuildConfig;
use crate::errors::BuildError;

/// Resolve a toolchain name into the cmake definitions that select it.
///
/// Unknown names fall back to passing the name straight through as the
/// toolchain variant, which covers any toolchain Zephyr itself knows.
pub fn get_toolchain(
    name: &str,
    module_paths: &BTreeMap<String, PathBuf>,
) -> Result<BuildConfig, BuildError> {
    match name {
        "coreboot-sdk" => {
            let root = module_paths.get("zephyr-chrome").ok_or_else(|| {
                BuildError::Resource(
                    "the coreboot-sdk toolchain requires the zephyr-chrome module".to_string(),
                )
            })?;
            Ok(BuildConfig::new()
                .cmake_def("TOOLCHAIN_ROOT", root.display().to_string())
                .cmake_def("ZEPHYR_TOOLCHAIN_VARIANT", "coreboot-sdk"))
        }
        "arm-none-eabi" => Ok(BuildConfig::new()
            .cmake_def("ZEPHYR_TOOLCHAIN_VARIANT", "cross-compile")
            .cmake_def("CROSS_COMPILE", "/usr/bin/arm-none-eabi-")),
        other => Ok(BuildConfig::new().cmake_def("ZEPHYR_TOOLCHAIN_VARIANT", other)),
    }
}
