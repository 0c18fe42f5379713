//! `brave units`: list managed units across remotes.

use clap::Args;

use super::GlobalArgs;
use crate::output::{Table, list_cell};

/// Arguments for the `units` command.
#[derive(Args, Debug)]
pub struct UnitsArgs {
    /// Only list units on this remote.
    #[arg(long)]
    pub remote: Option<String>,
}

/// Executes the `units` command.
///
/// # Errors
///
/// Returns an error if a remote cannot be listed.
pub fn execute(args: &UnitsArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    let units = match &args.remote {
        Some(remote) => host.units(remote)?,
        None => host.all_units()?,
    };
    if units.is_empty() {
        println!("No units found.");
        return Ok(());
    }

    let mut table = Table::new(&["NAME", "STATE", "IPV4", "MOUNTS", "PORTS"]);
    for unit in units {
        table.row([
            unit.name,
            unit.state.to_string(),
            if unit.address.is_empty() { "-".to_string() } else { unit.address },
            list_cell(&unit.mounts),
            list_cell(&unit.ports),
        ]);
    }
    print!("{table}");
    Ok(())
}
