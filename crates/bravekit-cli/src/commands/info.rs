//! `brave info`: host resources as reported by the backend.

use clap::Args;

use super::GlobalArgs;
use crate::output::Table;

/// Arguments for the `info` command.
#[derive(Args, Debug)]
pub struct InfoArgs {}

/// Executes the `info` command.
///
/// # Errors
///
/// Returns an error if the backend cannot be queried.
pub fn execute(_args: &InfoArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    let info = host.host_info()?;

    let mut table = Table::new(&["NAME", "STATE", "IPV4", "DISK", "MEMORY", "CPU"]);
    table.row([
        info.name,
        info.state,
        info.ipv4,
        format!("{} of {}", info.disk.used, info.disk.total),
        format!("{} of {}", info.memory.used, info.memory.total),
        info.cpu,
    ]);
    print!("{table}");
    if !info.release.is_empty() {
        println!("\nRelease: {}\nLoad: {}", info.release, info.load);
    }
    Ok(())
}
