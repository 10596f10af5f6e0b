//! Typed failures shared across the build engine.

use std::io;

use thiserror::Error;

/// Errors produced while orchestrating external build tools.
#[derive(Debug, Error)]
pub enum BuildError {
    /// An executable could not be launched at all. Never retried.
    #[error("failed to launch `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// An external tool ran to completion and exited non-zero.
    #[error("execution failed (return code={code}): {command}")]
    ProcessFailure { command: String, code: i32 },

    /// The composed build configuration cannot produce a valid invocation.
    #[error("invalid build configuration: {0}")]
    Configuration(String),

    /// A required external resource (module, jobserver, descriptor) is
    /// missing or unusable.
    #[error("{0}")]
    Resource(String),

    /// Warnings were observed in build output while `fail_on_warnings`
    /// was requested.
    #[error("warnings detected in build output")]
    WarningsDetected,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
