//! `embark testall` command

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::{Cli, TestallArgs};
use embark::ops::Orchestrator;

pub fn execute(cli: &Cli, args: &TestallArgs) -> Result<()> {
    let orchestrator = Orchestrator::new(&cli.orchestrator_options())?;

    let roots = if args.roots.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        args.roots.clone()
    };

    orchestrator.testall(&roots, args.fail_fast)?;
    Ok(())
}
