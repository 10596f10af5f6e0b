//! Subprocess execution: job tokens, spawning, and concurrent output capture.

mod fd;
pub mod jobserver;
pub mod multiproc;
pub mod process;

pub use jobserver::{parse_jobserver_auth, ChildHandle, JobBroker, JobToken};
pub use multiproc::{Classifier, LogSink, OutputMultiplexer, OutputStream, Severity, TracingSink};
pub use process::ProcessBuilder;
