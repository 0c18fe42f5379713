//! `brave compose`: build and deploy every service of a compose file.

use std::path::PathBuf;

use anyhow::Context;
use bravekit_common::cancel::CancellationToken;
use bravekit_compose::descriptor::ComposeFile;
use bravekit_compose::orchestrator;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the `compose` command.
#[derive(Args, Debug)]
pub struct ComposeArgs {
    /// Path to the compose file.
    #[arg(default_value = "brave-compose.yml")]
    pub file: PathBuf,

    /// Print the resolved order without building or deploying.
    #[arg(long)]
    pub plan: bool,
}

/// Executes the `compose` command.
///
/// # Errors
///
/// Returns an error if the file is invalid or a service fails; artefacts
/// created before the failure are removed first.
pub fn execute(args: &ComposeArgs, global: &GlobalArgs, token: &CancellationToken) -> anyhow::Result<()> {
    let file = ComposeFile::load(&args.file)
        .with_context(|| format!("loading {}", args.file.display()))?;
    let host = global.host()?;

    if args.plan {
        let (order, pruned) = orchestrator::plan(&host, &file)?;
        for (i, name) in order.iter().enumerate() {
            println!("{:>3}. {name}", i + 1);
        }
        for name in pruned {
            println!("  -  {name} (base image not needed)");
        }
        return Ok(());
    }

    let report = orchestrator::run(&host, &file, token)
        .with_context(|| format!("composing {}", args.file.display()))?;
    for image in &report.built {
        println!("built     {image}");
    }
    for service in &report.skipped {
        println!("skipped   {service} (image exists)");
    }
    for unit in &report.deployed {
        println!("deployed  {unit}");
    }
    Ok(())
}
