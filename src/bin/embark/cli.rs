//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use embark::ops::OrchestratorOptions;

/// Embark - meta-build orchestrator for Zephyr-based firmware
#[derive(Parser)]
#[command(name = "embark")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Number of parallel jobs (defaults to the CPU count; ignored when
    /// running under a make jobserver)
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// Directory the firmware modules are checked out under
    #[arg(long, global = true)]
    pub modules_dir: Option<PathBuf>,

    /// Zephyr source tree to build against
    #[arg(long, global = true, env = "ZEPHYR_BASE")]
    pub zephyr_base: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            jobs: self.jobs,
            modules_dir: self.modules_dir.clone(),
            zephyr_base: self.zephyr_base.clone(),
            ..OrchestratorOptions::default()
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the build system for a project
    Configure(ConfigureArgs),

    /// Build a configured project and collect its artifacts
    Build(BuildArgs),

    /// Build a configured project and run its test binaries
    Test(TestArgs),

    /// Configure, build and test every project under the given roots
    Testall(TestallArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct ConfigureArgs {
    /// Project directory (holds embark.yaml)
    pub project_dir: PathBuf,

    /// Build directory (defaults to <project>/build)
    #[arg(short = 'B', long)]
    pub build_dir: Option<PathBuf>,

    /// Override the project's toolchain
    #[arg(short, long)]
    pub toolchain: Option<String>,

    /// Build immediately after configuring
    #[arg(short, long)]
    pub build: bool,

    /// Run tests immediately after configuring
    #[arg(long)]
    pub test: bool,

    /// Enable bringup diagnostics
    #[arg(long)]
    pub bringup: bool,

    /// Enable coverage instrumentation
    #[arg(long)]
    pub coverage: bool,

    /// Skip the Zephyr version compatibility check
    #[arg(long)]
    pub allow_unsupported: bool,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Configured build directory
    pub build_dir: PathBuf,

    /// Build variants one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Fail when build output contains warnings
    #[arg(short = 'w', long)]
    pub fail_on_warnings: bool,
}

#[derive(Args)]
pub struct TestArgs {
    /// Configured build directory
    pub build_dir: PathBuf,
}

#[derive(Args)]
pub struct TestallArgs {
    /// Directories to search for projects (defaults to the current
    /// directory)
    pub roots: Vec<PathBuf>,

    /// Stop starting new projects after the first failure
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}
