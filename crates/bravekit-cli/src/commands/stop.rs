//! `brave stop`: stop units.

use anyhow::Context;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Units to stop, optionally `remote:name`.
    #[arg(required = true)]
    pub units: Vec<String>,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns the first unit that fails to stop.
pub fn execute(args: &StopArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    for unit in &args.units {
        host.stop_unit(unit)
            .with_context(|| format!("stopping {unit}"))?;
        println!("Unit {unit} stopped");
    }
    Ok(())
}
