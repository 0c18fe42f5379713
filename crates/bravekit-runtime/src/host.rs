//! The host facade.
//!
//! [`BraveHost`] owns settings, paths, the platform, the runtime connector,
//! the record store, the image store and the remote registry. Deployment,
//! builds and mounts are implemented on it in their own modules.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bravekit_common::config::{BackendKind, HostSettings};
use bravekit_common::constants::{DEFAULT_IMAGE_VERSION, DEVICE_PREFIX, LOCAL_REMOTE, Paths};
use bravekit_common::error::{BraveError, Result};
use bravekit_common::types::{PortRule, UnitState, parse_remote_name};
use bravekit_image::identity::ImageIdentity;
use bravekit_image::store::{ImageEntry, ImageStore};

use crate::backend::{HostInfo, Platform, select};
use crate::client::lxc::LxcConnector;
use crate::client::{Connector, Instance, RuntimeClient};
use crate::records::{JsonRecordStore, RecordStore};
use crate::remote::{Remote, RemoteRegistry};
use crate::shell::{Shell, SystemShell};

/// A unit as listed by [`BraveHost::units`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSummary {
    /// Unit name, prefixed with `remote:` for non-local remotes.
    pub name: String,
    /// Runtime state.
    pub state: UnitState,
    /// IPv4 address on the unit NIC, empty if none.
    pub address: String,
    /// Mounted sources as `source -> path`.
    pub mounts: Vec<String>,
    /// Port rules as `unit:host`.
    pub ports: Vec<String>,
}

/// Everything needed to operate units on the configured hosts.
pub struct BraveHost {
    pub(crate) settings: HostSettings,
    pub(crate) paths: Paths,
    pub(crate) platform: Platform,
    pub(crate) shell: Arc<dyn Shell>,
    pub(crate) connector: Box<dyn Connector>,
    pub(crate) records: Box<dyn RecordStore>,
    pub(crate) store: ImageStore,
    pub(crate) remotes: RemoteRegistry,
}

impl std::fmt::Debug for BraveHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BraveHost")
            .field("host", &self.settings.name)
            .field("root", &self.paths.root())
            .finish_non_exhaustive()
    }
}

impl BraveHost {
    /// Assembles a host from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the image store directory cannot be created.
    pub fn new(
        settings: HostSettings,
        paths: Paths,
        platform: Platform,
        shell: Arc<dyn Shell>,
        connector: Box<dyn Connector>,
        records: Box<dyn RecordStore>,
    ) -> Result<Self> {
        let store = ImageStore::open(&paths.image_store())?;
        let remotes = RemoteRegistry::new(paths.remotes());
        Ok(Self {
            settings,
            paths,
            platform,
            shell,
            connector,
            records,
            store,
            remotes,
        })
    }

    /// Opens the host described by the settings under `paths`, driving the
    /// real `lxc` and `multipass` binaries.
    ///
    /// # Errors
    ///
    /// Returns an error if settings cannot be loaded or the image store
    /// cannot be opened.
    pub fn open(paths: Paths) -> Result<Self> {
        let settings = HostSettings::load(&paths.settings())?;
        let shell: Arc<dyn Shell> = Arc::new(SystemShell);
        let platform = select(&settings, &paths, Arc::clone(&shell));
        let connector = Box::new(LxcConnector::new(Arc::clone(&shell)));
        let records = Box::new(JsonRecordStore::new(paths.records()));
        Self::new(settings, paths, platform, shell, connector, records)
    }

    /// Host settings.
    #[must_use]
    pub const fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// Data directory layout.
    #[must_use]
    pub const fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Local image store.
    #[must_use]
    pub const fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Unit record store.
    #[must_use]
    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    /// Provisions the backend, persists the local remote and registers it
    /// with the runtime client.
    ///
    /// # Errors
    ///
    /// Returns the first failing provisioning step.
    pub fn initialize(&mut self) -> Result<()> {
        self.settings.validate()?;
        let settings = self.platform.backend.initialize()?;
        settings.save(&self.paths.settings())?;
        self.settings = settings;

        let mut local = Remote::local(&self.settings);
        if self.settings.backend.kind == BackendKind::Multipass {
            local.set_address(&self.platform.backend.info()?.ipv4)?;
        }
        self.remotes.save(&local)?;
        local.register(self.shell.as_ref(), &self.settings.trust)?;
        tracing::info!(host = %self.settings.name, backend = %self.settings.backend.kind, "host initialized");
        Ok(())
    }

    /// Starts the backend when `remote` is the local remote.
    pub(crate) fn ensure_backend(&self, remote: &str) -> Result<()> {
        if remote == LOCAL_REMOTE {
            self.platform.backend.start()?;
        }
        Ok(())
    }

    /// Loads a remote definition.
    pub(crate) fn remote(&self, name: &str) -> Result<Remote> {
        self.remotes.load(name, &self.settings)
    }

    /// Connects to the remote named `name`, starting the backend first for
    /// the local remote.
    pub(crate) fn connect(&self, name: &str) -> Result<(Remote, Arc<dyn RuntimeClient>)> {
        self.ensure_backend(name)?;
        let remote = self.remote(name)?;
        let client = self.connector.connect(&remote)?;
        Ok((remote, client))
    }

    fn require_instance(client: &dyn RuntimeClient, unit: &str) -> Result<Instance> {
        client.instance(unit)?.ok_or_else(|| BraveError::NotFound {
            kind: "unit",
            id: unit.to_string(),
        })
    }

    /// Deletes a unit, reversing its mounts first, then its record.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if the unit does not exist or does
    /// not carry the bravekit profile.
    pub fn delete_unit(&self, name: &str) -> Result<()> {
        let (remote_name, unit) = parse_remote_name(name);
        let (remote, client) = self.connect(remote_name)?;
        let instance = Self::require_instance(client.as_ref(), unit)?;

        let profile = if remote.profile.is_empty() {
            self.settings.profile.as_str()
        } else {
            remote.profile.as_str()
        };
        if !instance.profiles.iter().any(|p| p == profile) {
            return Err(BraveError::NotFound {
                kind: "unit",
                id: format!("{unit} (not managed under profile {profile})"),
            });
        }

        let owned: Vec<String> = instance
            .devices
            .iter()
            .filter(|(name, device)| {
                name.starts_with(DEVICE_PREFIX) && device.get("type").is_some_and(|t| t == "disk")
            })
            .filter_map(|(_, device)| device.get("path").cloned())
            .collect();
        for path in owned {
            if let Err(e) = self.unmount_with(client.as_ref(), unit, &path) {
                tracing::warn!(unit = %unit, path = %path, error = %e, "failed to unmount share");
            }
        }

        client.delete_instance(unit)?;
        match self.records.delete(unit) {
            Ok(()) => {}
            Err(BraveError::NotFound { .. }) => {
                tracing::warn!(unit = %unit, "unit had no record");
            }
            Err(e) => return Err(e),
        }
        tracing::info!(unit = %unit, remote = %remote.name, "unit deleted");
        Ok(())
    }

    /// Starts a unit.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if the unit does not exist.
    pub fn start_unit(&self, name: &str) -> Result<()> {
        let (remote_name, unit) = parse_remote_name(name);
        let (_, client) = self.connect(remote_name)?;
        let _ = Self::require_instance(client.as_ref(), unit)?;
        client.start(unit)?;
        tracing::info!(unit = %unit, "unit started");
        Ok(())
    }

    /// Stops a unit.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if the unit does not exist.
    pub fn stop_unit(&self, name: &str) -> Result<()> {
        let (remote_name, unit) = parse_remote_name(name);
        let (_, client) = self.connect(remote_name)?;
        let _ = Self::require_instance(client.as_ref(), unit)?;
        client.stop(unit)?;
        tracing::info!(unit = %unit, "unit stopped");
        Ok(())
    }

    /// Publishes a unit as an image archive in `out_dir`.
    ///
    /// Without `image`, the identity is `unit/<timestamp>/<arch>`. The
    /// runtime copy of the published image is always deleted.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::AlreadyExists`] if the archive would overwrite
    /// a file, or the runtime's error.
    pub fn publish_unit(&self, name: &str, image: Option<&str>, out_dir: &Path) -> Result<PathBuf> {
        let (remote_name, unit) = parse_remote_name(name);
        let (_, client) = self.connect(remote_name)?;
        let _ = Self::require_instance(client.as_ref(), unit)?;
        let architecture = client.server_info()?.architecture()?.to_string();

        let image = image.map_or_else(
            || {
                let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
                format!("{unit}/{stamp}/{architecture}")
            },
            str::to_string,
        );
        let identity =
            ImageIdentity::parse(&image)?.with_defaults(DEFAULT_IMAGE_VERSION, &architecture);

        let target = out_dir.join(identity.to_filename());
        if target.exists() {
            return Err(BraveError::AlreadyExists {
                kind: "file",
                id: target.display().to_string(),
            });
        }

        let fingerprint = client.publish(unit, &identity.to_basename())?;
        let _guard = CachedImageGuard::new(Arc::clone(&client), fingerprint.clone());
        let path = client.export_image(&fingerprint, out_dir, &identity.to_basename())?;
        tracing::info!(unit = %unit, image = %identity, path = %path.display(), "unit published");
        Ok(path)
    }

    /// Units on `remote` carrying its profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote cannot be loaded or listed.
    pub fn units(&self, remote_name: &str) -> Result<Vec<UnitSummary>> {
        let (remote, client) = self.connect(remote_name)?;
        let profile = if remote.profile.is_empty() {
            self.settings.profile.clone()
        } else {
            remote.profile.clone()
        };
        let prefix = if remote.name == LOCAL_REMOTE {
            String::new()
        } else {
            format!("{}:", remote.name)
        };
        let mut units: Vec<UnitSummary> = client
            .instances(Some(&profile))?
            .into_iter()
            .map(|instance| summarize(&prefix, &instance))
            .collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    /// Units across every saved remote; unreachable remotes are logged and
    /// skipped, public image servers are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub fn all_units(&self) -> Result<Vec<UnitSummary>> {
        let mut all = Vec::new();
        for name in self.remotes.list()? {
            match self.remote(&name) {
                Ok(remote) if remote.public => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(remote = %name, error = %e, "failed to load remote");
                    continue;
                }
            }
            match self.units(&name) {
                Ok(units) => all.extend(units),
                Err(e) => tracing::warn!(remote = %name, error = %e, "failed to list units"),
            }
        }
        Ok(all)
    }

    /// Names of units on the local remote.
    ///
    /// # Errors
    ///
    /// Returns an error if the local runtime cannot be listed.
    pub fn unit_names(&self) -> Result<Vec<String>> {
        Ok(self
            .units(LOCAL_REMOTE)?
            .into_iter()
            .map(|u| u.name)
            .collect())
    }

    /// Backend host facts.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    pub fn host_info(&self) -> Result<HostInfo> {
        self.platform.backend.info()
    }

    /// Images in the local store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_images(&self) -> Result<Vec<ImageEntry>> {
        self.store.list()
    }

    /// Imports an archive into the local store.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::ImageExists`] if the identity is present.
    pub fn import_image(&self, source: &Path) -> Result<ImageIdentity> {
        self.store.import(source)
    }

    /// Deletes an image from the local store.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if the image is absent.
    pub fn delete_image(&self, image: &str) -> Result<()> {
        let (identity, _) = ImageIdentity::parse_any(image)?;
        self.store.delete(&identity)
    }

    /// Copies an image archive out of the local store.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::AlreadyExists`] if the destination exists.
    pub fn export_image(&self, image: &str, out_dir: &Path) -> Result<PathBuf> {
        let (identity, _) = ImageIdentity::parse_any(image)?;
        self.store.export(&identity, out_dir)
    }

    /// Saves a remote and registers it with the runtime client.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::AlreadyExists`] if a remote of that name is saved.
    pub fn add_remote(&self, remote: &Remote, password: &str) -> Result<()> {
        if self.remotes.list()?.iter().any(|n| *n == remote.name) {
            return Err(BraveError::AlreadyExists {
                kind: "remote",
                id: remote.name.clone(),
            });
        }
        remote.register(self.shell.as_ref(), password)?;
        self.remotes.save(remote)?;
        tracing::info!(remote = %remote.name, url = %remote.url, "remote added");
        Ok(())
    }

    /// Removes a saved remote.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] for unknown remotes.
    pub fn remove_remote(&self, name: &str) -> Result<()> {
        self.remotes.remove(name)?;
        tracing::info!(remote = %name, "remote removed");
        Ok(())
    }

    /// Saved remotes, `local` first.
    ///
    /// # Errors
    ///
    /// Returns an error if a definition cannot be read.
    pub fn list_remotes(&self) -> Result<Vec<Remote>> {
        self.remotes
            .list()?
            .iter()
            .map(|name| self.remote(name))
            .collect()
    }
}

fn summarize(prefix: &str, instance: &Instance) -> UnitSummary {
    let mut mounts = Vec::new();
    let mut ports = Vec::new();
    for (name, device) in &instance.devices {
        let kind = device.get("type").map(String::as_str);
        if kind == Some("disk") && name.starts_with(DEVICE_PREFIX) {
            let source = device.get("source").map_or("", String::as_str);
            let path = device.get("path").map_or("", String::as_str);
            mounts.push(format!("{source} -> {path}"));
        } else if kind == Some("proxy") {
            if let Some(rule) = proxy_rule(device) {
                ports.push(rule.to_string());
            }
        }
    }
    UnitSummary {
        name: format!("{prefix}{}", instance.name),
        state: UnitState::from_status(&instance.status),
        address: instance.addresses.first().cloned().unwrap_or_default(),
        mounts,
        ports,
    }
}

fn proxy_rule(device: &crate::client::Device) -> Option<PortRule> {
    let port = |key: &str| device.get(key)?.rsplit(':').next()?.parse::<u16>().ok();
    Some(PortRule {
        unit_port: port("connect")?,
        host_port: port("listen")?,
    })
}

/// Deletes a runtime-cached image when dropped.
pub(crate) struct CachedImageGuard {
    client: Arc<dyn RuntimeClient>,
    fingerprint: String,
}

impl CachedImageGuard {
    pub(crate) fn new(client: Arc<dyn RuntimeClient>, fingerprint: String) -> Self {
        Self {
            client,
            fingerprint,
        }
    }
}

impl Drop for CachedImageGuard {
    fn drop(&mut self) {
        if let Err(e) = self.client.delete_image(&self.fingerprint) {
            tracing::warn!(fingerprint = %self.fingerprint, error = %e, "failed to delete cached image");
        }
    }
}

/// Deletes a runtime instance when dropped.
pub(crate) struct InstanceGuard {
    client: Arc<dyn RuntimeClient>,
    name: String,
}

impl InstanceGuard {
    pub(crate) fn new(client: Arc<dyn RuntimeClient>, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Err(e) = self.client.delete_instance(&self.name) {
            tracing::warn!(unit = %self.name, error = %e, "failed to delete transient unit");
        }
    }
}
