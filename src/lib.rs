//! Meta-build orchestration for Zephyr-based firmware.
//!
//! `embark` does not build anything itself; it drives the external
//! configuration generator and build tool for whole firmware projects,
//! sharing one job budget with recursive make via the GNU jobserver
//! protocol and multiplexing the tools' output into a single log stream.
//!
//! The library is organized in layers:
//!
//! - [`core`] holds the domain model: composable build configurations,
//!   project descriptors, packers, toolchains and modules.
//! - [`exec`] handles subprocess plumbing: the job token broker, process
//!   builders and the concurrent output multiplexer.
//! - [`ops`] implements the operations the CLI exposes: configure,
//!   build, test and testall, plus the parallel task executor behind
//!   testall.
//! - [`util`] collects filesystem and version helpers.

pub mod core;
pub mod errors;
pub mod exec;
pub mod ops;
pub mod util;

pub use errors::BuildError;
