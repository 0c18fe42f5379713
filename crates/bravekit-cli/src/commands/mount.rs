//! `brave mount`, `brave umount` and `brave mounts`: shares between the
//! host and units.

use anyhow::Context;
use bravekit_runtime::mounts::MountSource;
use clap::Args;

use super::GlobalArgs;
use crate::output::Table;

/// Arguments for the `mount` command.
#[derive(Args, Debug)]
pub struct MountArgs {
    /// Host directory, or `unit:/path` to share a unit's directory.
    pub source: String,

    /// Target as `unit:/path`.
    pub target: String,
}

/// Arguments for the `umount` command.
#[derive(Args, Debug)]
pub struct UmountArgs {
    /// Mounted target as `unit:/path`.
    pub target: String,
}

/// Arguments for the `mounts` command.
#[derive(Args, Debug)]
pub struct MountsArgs {
    /// Only list this unit's shares.
    pub unit: Option<String>,
}

/// Splits `unit:/path`.
fn split_target(target: &str) -> anyhow::Result<(&str, &str)> {
    match target.split_once(':') {
        Some((unit, path)) if !unit.is_empty() && !path.is_empty() => Ok((unit, path)),
        _ => anyhow::bail!("cannot parse mount target {target:?}, expected UNIT:PATH"),
    }
}

/// Executes the `mount` command.
///
/// # Errors
///
/// Returns an error if either side cannot be parsed or the share fails.
pub fn mount(args: &MountArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    let source = MountSource::parse(&args.source, &cwd)?;
    let (unit, path) = split_target(&args.target)?;
    let host = global.host()?;

    host.mount(&source, unit, path)
        .with_context(|| format!("mounting {} on {}", args.source, args.target))?;
    println!("Mounted {} on {}", args.source, args.target);
    Ok(())
}

/// Executes the `umount` command.
///
/// # Errors
///
/// Returns an error if the target is not a bravekit share.
pub fn umount(args: &UmountArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let (unit, path) = split_target(&args.target)?;
    let host = global.host()?;
    host.unmount(unit, path)
        .with_context(|| format!("unmounting {}", args.target))?;
    println!("Unmounted {}", args.target);
    Ok(())
}

/// Executes the `mounts` command.
///
/// # Errors
///
/// Returns an error if a unit cannot be inspected.
pub fn list(args: &MountsArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    let mounts = match &args.unit {
        Some(unit) => vec![(unit.clone(), host.list_mounts(unit)?)],
        None => host.list_all_mounts()?,
    };

    let mut table = Table::new(&["UNIT", "SOURCE", "PATH"]);
    for (unit, infos) in mounts {
        for info in infos {
            table.row([unit.clone(), info.source, info.path]);
        }
    }
    if table.is_empty() {
        println!("No mounts found.");
    } else {
        print!("{table}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_split_on_first_colon() {
        assert_eq!(split_target("web:/data").expect("target"), ("web", "/data"));
        assert!(split_target("web").is_err());
        assert!(split_target(":/data").is_err());
        assert!(split_target("web:").is_err());
    }
}
