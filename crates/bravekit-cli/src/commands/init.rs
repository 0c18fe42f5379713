//! `brave init`: provision the backend and register the local remote.

use anyhow::Context;
use bravekit_common::config::HostSettings;
use bravekit_runtime::backend::KindArg;
use bravekit_runtime::host::BraveHost;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Host name, also used as the VM name on Multipass.
    #[arg(long)]
    pub name: Option<String>,

    /// Backend: `lxd` or `multipass`.
    #[arg(long)]
    pub backend: Option<KindArg>,

    /// Storage pool driver, e.g. `zfs` or `dir`.
    #[arg(long)]
    pub pool_driver: Option<String>,

    /// Storage pool size, e.g. `50GB`.
    #[arg(long)]
    pub pool_size: Option<String>,

    /// Bridge address of the unit network.
    #[arg(long)]
    pub bridge: Option<String>,

    /// VM CPU count.
    #[arg(long)]
    pub cpu: Option<String>,

    /// VM RAM, e.g. `4GB`.
    #[arg(long)]
    pub ram: Option<String>,

    /// VM disk size, e.g. `50GB`.
    #[arg(long)]
    pub disk: Option<String>,
}

impl InitArgs {
    /// Overlays the given flags onto `settings`.
    pub fn apply(&self, settings: &mut HostSettings) {
        if let Some(name) = &self.name {
            settings.name.clone_from(name);
            settings.backend.resources.name.clone_from(name);
        }
        if let Some(KindArg(kind)) = self.backend {
            settings.backend.kind = kind;
        }
        let overrides = [
            (&self.pool_driver, &mut settings.storage_pool.kind),
            (&self.pool_size, &mut settings.storage_pool.size),
            (&self.bridge, &mut settings.network.bridge),
            (&self.cpu, &mut settings.backend.resources.cpu),
            (&self.ram, &mut settings.backend.resources.ram),
            (&self.disk, &mut settings.backend.resources.hd),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }
    }
}

/// Executes the `init` command.
///
/// # Errors
///
/// Returns an error if the host is already active or provisioning fails.
pub fn execute(args: &InitArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let paths = global.paths()?;
    let mut settings = HostSettings::load(&paths.settings())?;
    if settings.is_active() {
        anyhow::bail!(
            "host {:?} is already initialized, settings at {}",
            settings.name,
            paths.settings().display()
        );
    }
    args.apply(&mut settings);
    settings.validate()?;
    settings
        .save(&paths.settings())
        .context("writing host settings")?;

    let mut host = BraveHost::open(paths)?;
    host.initialize()
        .with_context(|| format!("initializing {} backend", host.settings().backend.kind))?;
    println!(
        "Host {} initialized on {}",
        host.settings().name,
        host.settings().backend.kind
    );
    Ok(())
}
