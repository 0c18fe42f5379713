//! CLI command definitions and dispatch.

pub mod build;
pub mod compose;
pub mod delete;
pub mod deploy;
pub mod images;
pub mod info;
pub mod init;
pub mod mount;
pub mod publish;
pub mod remote;
pub mod start;
pub mod stop;
pub mod units;

use std::path::PathBuf;

use anyhow::Context;
use bravekit_common::cancel::CancellationToken;
use bravekit_common::constants::Paths;
use bravekit_runtime::host::BraveHost;
use clap::{Args, Parser, Subcommand};

/// bravekit: deploy and manage LXD units.
#[derive(Parser, Debug)]
#[command(name = "brave", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Data directory, `~/.bravekit` by default.
    #[arg(long, global = true, env = "BRAVE_HOME")]
    pub data_dir: Option<PathBuf>,
}

impl GlobalArgs {
    /// Data directory layout.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be found.
    pub fn paths(&self) -> anyhow::Result<Paths> {
        match &self.data_dir {
            Some(dir) => Ok(Paths::new(dir)),
            None => Paths::from_home()
                .context("cannot locate a home directory, pass --data-dir or set BRAVE_HOME"),
        }
    }

    /// Opens the configured host.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be loaded.
    pub fn host(&self) -> anyhow::Result<BraveHost> {
        let paths = self.paths()?;
        let root = paths.root().display().to_string();
        BraveHost::open(paths).with_context(|| format!("opening host data in {root}"))
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision the backend and register the local remote.
    Init(init::InitArgs),
    /// Show host resources.
    Info(info::InfoArgs),
    /// Build an image from a Bravefile.
    Build(build::BuildArgs),
    /// Deploy a unit from a Bravefile's service section.
    Deploy(deploy::DeployArgs),
    /// Build and deploy every service of a compose file.
    Compose(compose::ComposeArgs),
    /// Manage the local image store.
    #[command(subcommand)]
    Images(images::ImagesCommand),
    /// List managed units.
    Units(units::UnitsArgs),
    /// Start a unit.
    Start(start::StartArgs),
    /// Stop a unit.
    Stop(stop::StopArgs),
    /// Delete a unit, its shares and its record.
    Delete(delete::DeleteArgs),
    /// Share a host or unit directory into a unit.
    Mount(mount::MountArgs),
    /// Remove a share from a unit.
    Umount(mount::UmountArgs),
    /// List shares of one or all units.
    Mounts(mount::MountsArgs),
    /// Publish a unit as an image archive.
    Publish(publish::PublishArgs),
    /// Manage remotes.
    #[command(subcommand)]
    Remote(remote::RemoteCommand),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli, token: &CancellationToken) -> anyhow::Result<()> {
    let global = &cli.global;
    match cli.command {
        Command::Init(args) => init::execute(&args, global),
        Command::Info(args) => info::execute(&args, global),
        Command::Build(args) => build::execute(&args, global, token),
        Command::Deploy(args) => deploy::execute(&args, global, token),
        Command::Compose(args) => compose::execute(&args, global, token),
        Command::Images(command) => images::execute(command, global),
        Command::Units(args) => units::execute(&args, global),
        Command::Start(args) => start::execute(&args, global),
        Command::Stop(args) => stop::execute(&args, global),
        Command::Delete(args) => delete::execute(&args, global),
        Command::Mount(args) => mount::mount(&args, global),
        Command::Umount(args) => mount::umount(&args, global),
        Command::Mounts(args) => mount::list(&args, global),
        Command::Publish(args) => publish::execute(&args, global),
        Command::Remote(command) => remote::execute(command, global),
    }
}
