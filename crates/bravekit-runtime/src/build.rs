//! Image builds.
//!
//! A build launches a transient unit from the Bravefile's base, applies the
//! build steps, publishes the unit and exports the result into the local
//! image store. The transient unit and every runtime-cached image are
//! deleted whatever the outcome.

use std::path::Path;
use std::sync::Arc;

use bravekit_common::bravefile::{BaseLocation, Bravefile};
use bravekit_common::cancel::CancellationToken;
use bravekit_common::constants::{DEFAULT_IMAGE_VERSION, LOCAL_REMOTE};
use bravekit_common::error::{BraveError, Result, io_at};
use bravekit_common::types::parse_remote_name;
use bravekit_image::identity::ImageIdentity;

use crate::client::{ImageSource, LaunchRequest, RuntimeClient};
use crate::host::{BraveHost, CachedImageGuard, InstanceGuard};

/// Public image server used for `public` bases.
pub const PUBLIC_IMAGE_REMOTE: &str = "images";

const BUILD_UNIT_PREFIX: &str = "brave-build-";

impl BraveHost {
    /// Builds the image described by `bravefile`, resolving copy sources
    /// against `context`, and stores it in the local image store.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::ImageExists`] if the store already holds the
    /// identity, [`BraveError::Cancelled`] if interrupted, or the error of
    /// the failed build step.
    pub fn build_image(
        &self,
        bravefile: &Bravefile,
        context: &Path,
        token: &CancellationToken,
    ) -> Result<ImageIdentity> {
        bravefile.validate_build()?;
        let (_, client) = self.connect(LOCAL_REMOTE)?;
        let architecture = client.server_info()?.architecture()?.to_string();
        let (identity, _) = ImageIdentity::parse_any(&bravefile.image)?;
        let identity = identity.with_defaults(DEFAULT_IMAGE_VERSION, &architecture);
        if self.store.contains(&identity)? {
            return Err(BraveError::ImageExists {
                name: identity.to_string(),
            });
        }

        let unit = build_unit_name();
        tracing::info!(image = %identity, unit = %unit, base = %bravefile.base.image, "building image");

        let (source, _base_guard) = self.base_source(&client, bravefile, &unit, &architecture)?;
        token.check("build")?;

        client.launch(&LaunchRequest {
            name: unit.clone(),
            source,
            profile: self.settings.profile.clone(),
            storage: self.settings.storage_pool.name.clone(),
        })?;
        let _unit_guard = InstanceGuard::new(Arc::clone(&client), &unit);
        token.check("launch build unit")?;

        let steps = BuildSteps {
            client: client.as_ref(),
            unit: &unit,
            token,
        };
        steps.install_packages(bravefile)?;
        steps.copy_files(bravefile, context)?;
        steps.run_commands(bravefile)?;

        token.settle("stop build unit", client.stop(&unit))?;
        let basename = identity.to_basename();
        let fingerprint = client.publish(&unit, &basename)?;
        let _published = CachedImageGuard::new(Arc::clone(&client), fingerprint.clone());
        token.check("publish image")?;

        let staging = self.paths.root().join("tmp");
        std::fs::create_dir_all(&staging).map_err(io_at(&staging))?;
        let exported = client.export_image(&fingerprint, &staging, &basename)?;
        let imported = self.store.import_as(&identity, &exported);
        remove_staged(&exported);
        let path = imported?;

        tracing::info!(image = %identity, path = %path.display(), "image built");
        Ok(identity)
    }

    /// Image source for the build unit, with a guard for any image imported
    /// into the runtime cache to provide it.
    fn base_source(
        &self,
        client: &Arc<dyn RuntimeClient>,
        bravefile: &Bravefile,
        unit: &str,
        architecture: &str,
    ) -> Result<(ImageSource, Option<CachedImageGuard>)> {
        let base = &bravefile.base.image;
        match bravefile.base.location {
            BaseLocation::Local => {
                let (identity, _) = ImageIdentity::parse_any(base)?;
                let archive = self.store.resolve(&identity.with_defaults("", architecture))?;
                let fingerprint = client.import_image(&archive, unit)?;
                let guard = CachedImageGuard::new(Arc::clone(client), fingerprint);
                Ok((ImageSource::Cached(unit.to_string()), Some(guard)))
            }
            BaseLocation::Private => {
                let (remote, alias) = parse_remote_name(base);
                if remote == LOCAL_REMOTE {
                    return Err(BraveError::validation(format!(
                        "private base image {base:?} must name its remote as REMOTE:IMAGE"
                    )));
                }
                Ok((
                    ImageSource::Remote {
                        remote: remote.to_string(),
                        alias: alias.to_string(),
                    },
                    None,
                ))
            }
            BaseLocation::Public => {
                let (remote, alias) = parse_remote_name(base);
                let remote = if remote == LOCAL_REMOTE { PUBLIC_IMAGE_REMOTE } else { remote };
                Ok((
                    ImageSource::Remote {
                        remote: remote.to_string(),
                        alias: alias.to_string(),
                    },
                    None,
                ))
            }
        }
    }
}

fn build_unit_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{BUILD_UNIT_PREFIX}{}", &id[..8])
}

fn remove_staged(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove exported archive");
    }
}

/// Build steps run inside the transient unit.
struct BuildSteps<'a> {
    client: &'a dyn RuntimeClient,
    unit: &'a str,
    token: &'a CancellationToken,
}

impl BuildSteps<'_> {
    fn exec(&self, operation: &str, argv: &[String]) -> Result<()> {
        tracing::debug!(unit = %self.unit, command = %argv.join(" "), "build step");
        let output = self
            .client
            .exec(self.unit, argv)
            .and_then(|out| out.check(argv));
        let _ = self.token.settle(operation, output)?;
        Ok(())
    }

    fn install_packages(&self, bravefile: &Bravefile) -> Result<()> {
        let managers = [
            ("apt", &bravefile.system.apt, ["install", "-y"]),
            ("apk", &bravefile.system.apk, ["add", "--no-cache"]),
        ];
        for (manager, packages, install) in managers {
            if packages.is_empty() {
                continue;
            }
            self.exec("update packages", &[manager.to_string(), "update".to_string()])?;
            let argv: Vec<String> = std::iter::once(manager)
                .chain(install)
                .map(str::to_string)
                .chain(packages.iter().cloned())
                .collect();
            self.exec("install packages", &argv)?;
            tracing::info!(unit = %self.unit, manager, count = packages.len(), "packages installed");
        }
        Ok(())
    }

    fn copy_files(&self, bravefile: &Bravefile, context: &Path) -> Result<()> {
        for copy in &bravefile.copy {
            let source = context.join(&copy.source);
            let pushed = self.client.push_file(self.unit, &source, &copy.target);
            self.token.settle("copy file", pushed)?;
            if !copy.action.is_empty() {
                let argv = ["sh".to_string(), "-c".to_string(), copy.action.clone()];
                self.exec("run copy action", &argv)?;
            }
        }
        Ok(())
    }

    fn run_commands(&self, bravefile: &Bravefile) -> Result<()> {
        for run in &bravefile.run {
            self.exec("run command", &run.argv())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryClient;

    #[test]
    fn build_unit_names_are_unique_and_prefixed() {
        let a = build_unit_name();
        let b = build_unit_name();
        assert!(a.starts_with(BUILD_UNIT_PREFIX));
        assert_eq!(a.len(), BUILD_UNIT_PREFIX.len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn package_steps_update_then_install() {
        let client = MemoryClient::new().with_instance("builder", "brave");
        let token = CancellationToken::new();
        let steps = BuildSteps {
            client: &client,
            unit: "builder",
            token: &token,
        };
        let mut bravefile = Bravefile::default();
        bravefile.system.apk = vec!["curl".into(), "jq".into()];
        steps.install_packages(&bravefile).expect("install");

        let commands: Vec<String> = client
            .exec_log()
            .into_iter()
            .map(|(_, argv)| argv.join(" "))
            .collect();
        assert_eq!(commands, ["apk update", "apk add --no-cache curl jq"]);
    }

    #[test]
    fn cancelled_step_fails_after_running() {
        let client = MemoryClient::new().with_instance("builder", "brave");
        let token = CancellationToken::new();
        let _ = token.cancel();
        let steps = BuildSteps {
            client: &client,
            unit: "builder",
            token: &token,
        };
        let mut bravefile = Bravefile::default();
        bravefile.run = vec![bravekit_common::bravefile::RunCommand {
            command: "true".into(),
            args: Vec::new(),
        }];
        let err = steps.run_commands(&bravefile).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(client.exec_log().len(), 1);
    }
}
