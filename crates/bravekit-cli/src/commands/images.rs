//! `brave images`: manage the local image store.

use std::path::PathBuf;

use anyhow::Context;
use bravekit_common::units::format_bytes_si;
use clap::Subcommand;

use super::GlobalArgs;
use crate::output::Table;

/// Image store subcommands.
#[derive(Subcommand, Debug)]
pub enum ImagesCommand {
    /// List stored images.
    List,
    /// Copy an archive into the store; its filename names the image.
    Import {
        /// Archive path, e.g. `web_1.0_x86_64.tar.gz`.
        archive: PathBuf,
    },
    /// Delete an image.
    Remove {
        /// Image reference, e.g. `web/1.0`.
        image: String,
    },
    /// Copy an image archive out of the store.
    Export {
        /// Image reference.
        image: String,
        /// Destination directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

/// Executes an `images` subcommand.
///
/// # Errors
///
/// Returns an error if a store operation fails.
pub fn execute(command: ImagesCommand, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    match command {
        ImagesCommand::List => {
            let now = chrono::Utc::now();
            let mut table = Table::new(&["IMAGE", "CREATED", "SIZE", "HASH"]);
            for entry in host.list_images()? {
                table.row([
                    entry.identity.to_string(),
                    entry.age(now),
                    format_bytes_si(entry.size_bytes),
                    entry.hash.chars().take(12).collect::<String>(),
                ]);
            }
            if table.is_empty() {
                println!("No images found.");
            } else {
                print!("{table}");
            }
        }
        ImagesCommand::Import { archive } => {
            let identity = host
                .import_image(&archive)
                .with_context(|| format!("importing {}", archive.display()))?;
            println!("Image {identity} imported");
        }
        ImagesCommand::Remove { image } => {
            host.delete_image(&image)
                .with_context(|| format!("removing image {image}"))?;
            println!("Image {image} removed");
        }
        ImagesCommand::Export { image, out } => {
            let path = host
                .export_image(&image, &out)
                .with_context(|| format!("exporting image {image}"))?;
            println!("Image {image} exported to {}", path.display());
        }
    }
    Ok(())
}
