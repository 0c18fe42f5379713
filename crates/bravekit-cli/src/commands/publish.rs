//! `brave publish`: export a unit as an image archive.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the `publish` command.
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Unit to publish, optionally `remote:name`.
    pub unit: String,

    /// Image name, `name[/version[/arch]]`. Defaults to a timestamped
    /// version of the unit name.
    #[arg(long)]
    pub image: Option<String>,

    /// Destination directory.
    #[arg(long, default_value = ".")]
    pub out: PathBuf,
}

/// Executes the `publish` command.
///
/// # Errors
///
/// Returns an error if the archive exists or the runtime fails to export.
pub fn execute(args: &PublishArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    let path = host
        .publish_unit(&args.unit, args.image.as_deref(), &args.out)
        .with_context(|| format!("publishing {}", args.unit))?;
    println!("Unit {} published to {}", args.unit, path.display());
    Ok(())
}
