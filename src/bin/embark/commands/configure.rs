//! `embark configure` command

use anyhow::Result;

use crate::cli::{Cli, ConfigureArgs};
use embark::ops::{ConfigureOptions, Orchestrator};

pub fn execute(cli: &Cli, args: &ConfigureArgs) -> Result<()> {
    let orchestrator = Orchestrator::new(&cli.orchestrator_options())?;

    let build_dir = args
        .build_dir
        .clone()
        .unwrap_or_else(|| args.project_dir.join("build"));

    let opts = ConfigureOptions {
        toolchain: args.toolchain.clone(),
        bringup: args.bringup,
        coverage: args.coverage,
        allow_unsupported: args.allow_unsupported,
        build_after_configure: args.build,
        test_after_configure: args.test,
    };

    orchestrator.configure(&args.project_dir, &build_dir, &opts)?;
    Ok(())
}
