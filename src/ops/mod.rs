//! High-level operations driving whole builds.

pub mod executor;
pub mod orchestrator;

pub use executor::Executor;
pub use orchestrator::{
    BuildOptions, ConfigureOptions, Orchestrator, OrchestratorOptions,
};
