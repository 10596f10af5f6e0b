//! Core data model: build configurations, projects, packers, toolchains.

pub mod build_config;
pub mod modules;
pub mod packer;
pub mod project;
pub mod toolchain;

pub use build_config::BuildConfig;
pub use packer::PackerKind;
pub use project::{Project, ProjectConfig, DESCRIPTOR_NAME};
