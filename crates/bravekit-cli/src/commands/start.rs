//! `brave start`: start units.

use anyhow::Context;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Units to start, optionally `remote:name`.
    #[arg(required = true)]
    pub units: Vec<String>,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns the first unit that fails to start.
pub fn execute(args: &StartArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    for unit in &args.units {
        host.start_unit(unit)
            .with_context(|| format!("starting {unit}"))?;
        println!("Unit {unit} started");
    }
    Ok(())
}
