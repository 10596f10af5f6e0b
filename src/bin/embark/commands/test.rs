//! `embark test` command

use anyhow::Result;

use crate::cli::{Cli, TestArgs};
use embark::ops::Orchestrator;

pub fn execute(cli: &Cli, args: &TestArgs) -> Result<()> {
    let orchestrator = Orchestrator::new(&cli.orchestrator_options())?;
    orchestrator.test(&args.build_dir)?;
    Ok(())
}
