//! `embark build` command

use anyhow::Result;

use crate::cli::{BuildArgs, Cli};
use embark::ops::{BuildOptions, Orchestrator};

pub fn execute(cli: &Cli, args: &BuildArgs) -> Result<()> {
    let orchestrator = Orchestrator::new(&cli.orchestrator_options())?;

    let opts = BuildOptions {
        sequential: args.sequential,
        fail_on_warnings: args.fail_on_warnings,
    };

    let artifacts = orchestrator.build(&args.build_dir, &opts)?;
    for artifact in &artifacts {
        eprintln!("    Finished -> {}", artifact.display());
    }
    Ok(())
}
