//! `brave remote`: manage named runtime remotes.

use anyhow::Context;
use bravekit_runtime::remote::{Protocol, Remote};
use clap::{Args, Subcommand};

use super::GlobalArgs;
use crate::output::Table;

/// Remote subcommands.
#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// Register and save a remote.
    Add(AddArgs),
    /// List saved remotes.
    List,
    /// Remove a saved remote.
    Remove {
        /// Remote name.
        name: String,
    },
}

/// Arguments for `remote add`.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Remote name.
    pub name: String,

    /// Endpoint URL, e.g. `https://10.0.0.5:8443`.
    pub url: String,

    /// Trust password of the remote.
    #[arg(long, env = "BRAVE_REMOTE_PASSWORD", hide_env_values = true, default_value = "")]
    pub password: String,

    /// Transport: `lxd`, `unix` or `simplestreams`.
    #[arg(long, default_value = "lxd", value_parser = parse_protocol)]
    pub protocol: Protocol,

    /// Serve public images only.
    #[arg(long)]
    pub public: bool,

    /// Default profile for units deployed there.
    #[arg(long, default_value = "")]
    pub profile: String,

    /// Default network for units deployed there.
    #[arg(long, default_value = "")]
    pub network: String,

    /// Default storage pool for units deployed there.
    #[arg(long, default_value = "")]
    pub storage: String,
}

fn parse_protocol(value: &str) -> Result<Protocol, String> {
    match value.to_ascii_lowercase().as_str() {
        "lxd" | "https" => Ok(Protocol::Lxd),
        "unix" => Ok(Protocol::Unix),
        "simplestreams" => Ok(Protocol::Simplestreams),
        other => Err(format!("unknown protocol {other:?}")),
    }
}

impl AddArgs {
    fn remote(&self) -> Remote {
        Remote {
            name: self.name.clone(),
            url: self.url.clone(),
            protocol: self.protocol,
            public: self.public,
            profile: self.profile.clone(),
            network: self.network.clone(),
            storage: self.storage.clone(),
            alias: String::new(),
        }
    }
}

/// Executes a `remote` subcommand.
///
/// # Errors
///
/// Returns an error if the registry or the runtime client fails.
pub fn execute(command: RemoteCommand, global: &GlobalArgs) -> anyhow::Result<()> {
    let host = global.host()?;
    match command {
        RemoteCommand::Add(args) => {
            host.add_remote(&args.remote(), &args.password)
                .with_context(|| format!("adding remote {}", args.name))?;
            println!("Remote {} added", args.name);
        }
        RemoteCommand::List => {
            let mut table = Table::new(&["NAME", "URL", "PROTOCOL", "PUBLIC", "PROFILE"]);
            for remote in host.list_remotes()? {
                table.row([
                    remote.name,
                    remote.url,
                    format!("{:?}", remote.protocol).to_ascii_lowercase(),
                    if remote.public { "yes" } else { "no" }.to_string(),
                    remote.profile,
                ]);
            }
            print!("{table}");
        }
        RemoteCommand::Remove { name } => {
            host.remove_remote(&name)
                .with_context(|| format!("removing remote {name}"))?;
            println!("Remote {name} removed");
        }
    }
    Ok(())
}
