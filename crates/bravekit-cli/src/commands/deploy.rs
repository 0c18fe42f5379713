//! `brave deploy`: deploy one unit from a Bravefile's `service` section.

use std::path::PathBuf;

use anyhow::Context;
use bravekit_common::bravefile::{Bravefile, Service};
use bravekit_common::cancel::CancellationToken;
use clap::Args;

use super::GlobalArgs;
use super::build::context_of;

/// Arguments for the `deploy` command.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Path to the Bravefile; its directory is the deploy context.
    #[arg(default_value = "Bravefile")]
    pub file: PathBuf,

    /// Unit name, optionally `remote:name`.
    #[arg(long)]
    pub name: Option<String>,

    /// Static IPv4 address.
    #[arg(long)]
    pub ip: Option<String>,

    /// Port rule `unit:host`, repeatable. Replaces the Bravefile's rules.
    #[arg(long = "port")]
    pub ports: Vec<String>,
}

impl DeployArgs {
    /// The Bravefile's service with flags applied.
    #[must_use]
    pub fn service(&self, bravefile: &Bravefile) -> Service {
        let mut service = bravefile.service.clone();
        if service.image.is_empty() {
            service.image.clone_from(&bravefile.image);
        }
        if let Some(name) = &self.name {
            service.name.clone_from(name);
        }
        if let Some(ip) = &self.ip {
            service.ip.clone_from(ip);
        }
        if !self.ports.is_empty() {
            service.ports.clone_from(&self.ports);
        }
        service
    }
}

/// Executes the `deploy` command.
///
/// # Errors
///
/// Returns an error if the service is invalid or any deployment stage
/// fails.
pub fn execute(args: &DeployArgs, global: &GlobalArgs, token: &CancellationToken) -> anyhow::Result<()> {
    let bravefile = Bravefile::load(&args.file)?;
    let service = args.service(&bravefile);
    service.validate_deploy()?;
    let context = context_of(&args.file)?;
    let host = global.host()?;

    let record = host
        .deploy_unit(&service, &context, token)
        .with_context(|| format!("deploying {}", service.name))?;
    println!(
        "Unit {} deployed from {} ({} CPU, {})",
        record.name,
        record.data.image,
        record.data.cpu,
        if record.data.ip.is_empty() { "dynamic IP" } else { record.data.ip.as_str() }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_bravefile_service() {
        let mut bravefile = Bravefile {
            image: "web/1.0".into(),
            ..Bravefile::default()
        };
        bravefile.service.name = "web".into();
        bravefile.service.ports = vec!["80:80".into()];

        let args = DeployArgs {
            file: PathBuf::from("Bravefile"),
            name: Some("prod:web2".into()),
            ip: None,
            ports: vec!["80:8080".into()],
        };
        let service = args.service(&bravefile);

        assert_eq!(service.name, "prod:web2");
        assert_eq!(service.image, "web/1.0");
        assert_eq!(service.ports, ["80:8080"]);
        assert!(service.ip.is_empty());
    }
}
