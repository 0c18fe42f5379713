//! `brave build`: build an image from a Bravefile into the local store.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bravekit_common::bravefile::Bravefile;
use bravekit_common::cancel::CancellationToken;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Path to the Bravefile; its directory is the build context.
    #[arg(default_value = "Bravefile")]
    pub file: PathBuf,
}

/// Directory holding `file`, used to resolve relative paths.
pub(crate) fn context_of(file: &Path) -> anyhow::Result<PathBuf> {
    let absolute = std::path::absolute(file).with_context(|| format!("resolving {}", file.display()))?;
    Ok(absolute
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf))
}

/// Executes the `build` command.
///
/// # Errors
///
/// Returns an error if the Bravefile is invalid or a build step fails.
pub fn execute(args: &BuildArgs, global: &GlobalArgs, token: &CancellationToken) -> anyhow::Result<()> {
    let bravefile = Bravefile::load(&args.file)?;
    let context = context_of(&args.file)?;
    let host = global.host()?;

    tracing::info!(file = %args.file.display(), image = %bravefile.image, "building image");
    let identity = host
        .build_image(&bravefile, &context, token)
        .with_context(|| format!("building {}", bravefile.image))?;
    println!("Image {identity} built");
    Ok(())
}
