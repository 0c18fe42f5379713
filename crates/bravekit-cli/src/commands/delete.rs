//! `brave delete`: remove units with their shares and records.

use clap::Args;

use super::GlobalArgs;

/// Arguments for the `delete` command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Units to delete, optionally `remote:name`.
    #[arg(required = true)]
    pub units: Vec<String>,
}

/// Executes the `delete` command.
///
/// Every unit is attempted; failures are reported together.
///
/// # Errors
///
/// Returns an error naming the units that could not be deleted.
pub fn execute(args: &DeleteArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    let mut failed = Vec::new();
    for unit in &args.units {
        match host.delete_unit(unit) {
            Ok(()) => println!("Unit {unit} deleted"),
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "delete failed");
                failed.push(unit.as_str());
            }
        }
    }
    if !failed.is_empty() {
        anyhow::bail!("could not delete {}", failed.join(", "));
    }
    Ok(())
}
