//! In-process [`RuntimeClient`] for tests and dry runs.
//!
//! State lives behind an `Arc<Mutex<_>>` so clones observe the same runtime.
//! Any operation can be made to fail with [`MemoryClient::fail_on`], and a
//! hook registered with [`MemoryClient::on_call`] runs after every
//! successful operation.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bravekit_common::error::{BraveError, Result, io_at};
use bravekit_image::hash::hash_bytes;

use super::{
    Capacity, Connector, Device, ExecOutput, ImageSource, Instance, LaunchRequest, RuntimeClient,
    ServerInfo, Volume,
};
use crate::remote::Remote;

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
struct CachedImage {
    aliases: Vec<String>,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct State {
    server: ServerInfo,
    memory: Capacity,
    pools: BTreeMap<String, Capacity>,
    networks: BTreeMap<String, String>,
    instances: BTreeMap<String, Instance>,
    images: BTreeMap<String, CachedImage>,
    volumes: BTreeSet<(String, String)>,
    failures: BTreeSet<String>,
    calls: Vec<String>,
    exec_log: Vec<(String, Vec<String>)>,
    pushed: Vec<(String, PathBuf, String)>,
}

/// A fake runtime remote held in memory.
#[derive(Clone)]
pub struct MemoryClient {
    state: Arc<Mutex<State>>,
    hook: Arc<Mutex<Option<Hook>>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    /// An `x86_64` server on version 5.0.2 with 8 GB of free memory.
    #[must_use]
    pub fn new() -> Self {
        let state = State {
            server: ServerInfo {
                version: "5.0.2".into(),
                architectures: vec!["x86_64".into()],
            },
            memory: Capacity {
                total: 8_000_000_000,
                used: 0,
            },
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            hook: Arc::new(Mutex::new(None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Sets the reported server version and native architecture.
    #[must_use]
    pub fn with_server(self, version: &str, architecture: &str) -> Self {
        self.lock().server = ServerInfo {
            version: version.into(),
            architectures: vec![architecture.into()],
        };
        self
    }

    /// Sets host memory.
    #[must_use]
    pub fn with_memory(self, total: u64, used: u64) -> Self {
        self.lock().memory = Capacity { total, used };
        self
    }

    /// Adds a storage pool.
    #[must_use]
    pub fn with_pool(self, name: &str, total: u64, used: u64) -> Self {
        let _ = self
            .lock()
            .pools
            .insert(name.into(), Capacity { total, used });
        self
    }

    /// Adds a managed network.
    #[must_use]
    pub fn with_network(self, name: &str, address: &str) -> Self {
        let _ = self.lock().networks.insert(name.into(), address.into());
        self
    }

    /// Adds a running instance.
    #[must_use]
    pub fn with_instance(self, name: &str, profile: &str) -> Self {
        let _ = self.lock().instances.insert(
            name.into(),
            Instance {
                name: name.into(),
                status: "Running".into(),
                profiles: vec![profile.into()],
                ..Instance::default()
            },
        );
        self
    }

    /// Makes every later call to `operation` fail.
    pub fn fail_on(&self, operation: &str) {
        let _ = self.lock().failures.insert(operation.into());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Runs `hook` with the operation name after every successful call.
    pub fn on_call(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self
            .hook
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Snapshot of an instance.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> Option<Instance> {
        self.lock().instances.get(name).cloned()
    }

    /// Names of all instances.
    #[must_use]
    pub fn instance_names(&self) -> Vec<String> {
        self.lock().instances.keys().cloned().collect()
    }

    /// Fingerprints of all cached images.
    #[must_use]
    pub fn image_fingerprints(&self) -> Vec<String> {
        self.lock().images.keys().cloned().collect()
    }

    /// Names of all custom volumes in `pool`.
    #[must_use]
    pub fn volume_names(&self, pool: &str) -> Vec<String> {
        self.lock()
            .volumes
            .iter()
            .filter(|(p, _)| p == pool)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Every operation that ran, in order, failed ones included.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Commands run through `exec`, with the instance name.
    #[must_use]
    pub fn exec_log(&self) -> Vec<(String, Vec<String>)> {
        self.lock().exec_log.clone()
    }

    /// Files pushed into instances as `(instance, source, target)`.
    #[must_use]
    pub fn pushed_files(&self) -> Vec<(String, PathBuf, String)> {
        self.lock().pushed.clone()
    }

    /// Records the call and fails it if a failure was injected.
    fn enter(&self, operation: &'static str, target: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(format!("{operation} {target}"));
        if state.failures.contains(operation) {
            return Err(BraveError::remote(operation, target, "injected failure"));
        }
        Ok(state)
    }

    fn done<T>(&self, operation: &str, value: T) -> Result<T> {
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(operation);
        }
        Ok(value)
    }
}

fn missing_instance(operation: &'static str, name: &str) -> BraveError {
    BraveError::remote(operation, name, "instance not found")
}

fn instance_mut<'s>(
    state: &'s mut State,
    operation: &'static str,
    name: &str,
) -> Result<&'s mut Instance> {
    state
        .instances
        .get_mut(name)
        .ok_or_else(|| missing_instance(operation, name))
}

/// Builds a minimal unified image tarball for a published instance.
fn image_archive(name: &str) -> Result<Vec<u8>> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    let entries = [
        ("metadata.yaml", format!("properties:\n  description: {name}\n")),
        ("rootfs/etc/hostname", format!("{name}\n")),
    ];
    for (path, data) in &entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, data.as_bytes())
            .map_err(|e| BraveError::remote("publish instance", name, e))?;
    }
    let mut encoder = builder
        .into_inner()
        .map_err(|e| BraveError::remote("publish instance", name, e))?;
    encoder
        .flush()
        .map_err(|e| BraveError::remote("publish instance", name, e))?;
    encoder
        .finish()
        .map_err(|e| BraveError::remote("publish instance", name, e))
}

impl RuntimeClient for MemoryClient {
    fn server_info(&self) -> Result<ServerInfo> {
        let info = self.enter("server_info", "server")?.server.clone();
        self.done("server_info", info)
    }

    fn memory(&self) -> Result<Capacity> {
        let memory = self.enter("memory", "server")?.memory;
        self.done("memory", memory)
    }

    fn storage_pool(&self, pool: &str) -> Result<Capacity> {
        let capacity = self
            .enter("storage_pool", pool)?
            .pools
            .get(pool)
            .copied()
            .ok_or_else(|| BraveError::remote("storage_pool", pool, "storage pool not found"))?;
        self.done("storage_pool", capacity)
    }

    fn instance(&self, name: &str) -> Result<Option<Instance>> {
        let instance = self.enter("instance", name)?.instances.get(name).cloned();
        self.done("instance", instance)
    }

    fn instances(&self, profile: Option<&str>) -> Result<Vec<Instance>> {
        let instances = self
            .enter("instances", profile.unwrap_or("*"))?
            .instances
            .values()
            .filter(|i| profile.is_none_or(|p| i.profiles.iter().any(|q| q == p)))
            .cloned()
            .collect();
        self.done("instances", instances)
    }

    fn launch(&self, request: &LaunchRequest) -> Result<()> {
        {
            let mut state = self.enter("launch", &request.name)?;
            if state.instances.contains_key(&request.name) {
                return Err(BraveError::remote(
                    "launch",
                    &request.name,
                    "instance already exists",
                ));
            }
            if let ImageSource::Cached(alias) = &request.source {
                let known = state.images.iter().any(|(fp, image)| {
                    fp == alias || image.aliases.iter().any(|a| a == alias)
                });
                if !known {
                    return Err(BraveError::remote("launch", &request.name, "image not found"));
                }
            }
            let profiles = if request.profile.is_empty() {
                vec!["default".to_string()]
            } else {
                vec![request.profile.clone()]
            };
            let _ = state.instances.insert(
                request.name.clone(),
                Instance {
                    name: request.name.clone(),
                    status: "Running".into(),
                    profiles,
                    ..Instance::default()
                },
            );
        }
        self.done("launch", ())
    }

    fn start(&self, name: &str) -> Result<()> {
        {
            let mut state = self.enter("start", name)?;
            instance_mut(&mut state, "start", name)?.status = "Running".into();
        }
        self.done("start", ())
    }

    fn stop(&self, name: &str) -> Result<()> {
        {
            let mut state = self.enter("stop", name)?;
            instance_mut(&mut state, "stop", name)?.status = "Stopped".into();
        }
        self.done("stop", ())
    }

    fn delete_instance(&self, name: &str) -> Result<()> {
        let removed = self.enter("delete_instance", name)?.instances.remove(name);
        if removed.is_none() {
            return Err(missing_instance("delete_instance", name));
        }
        self.done("delete_instance", ())
    }

    fn set_config(&self, name: &str, config: &BTreeMap<String, String>) -> Result<()> {
        {
            let mut state = self.enter("set_config", name)?;
            let instance = instance_mut(&mut state, "set_config", name)?;
            instance
                .config
                .extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.done("set_config", ())
    }

    fn add_device(&self, name: &str, device_name: &str, device: &Device) -> Result<()> {
        {
            let mut state = self.enter("add_device", name)?;
            let instance = instance_mut(&mut state, "add_device", name)?;
            let _ = instance
                .devices
                .insert(device_name.to_string(), device.clone());
        }
        self.done("add_device", ())
    }

    fn remove_device(&self, name: &str, device_name: &str) -> Result<Device> {
        let removed = {
            let mut state = self.enter("remove_device", name)?;
            let instance = instance_mut(&mut state, "remove_device", name)?;
            instance
                .devices
                .remove(device_name)
                .ok_or_else(|| BraveError::NotFound {
                    kind: "device",
                    id: format!("{name}/{device_name}"),
                })?
        };
        self.done("remove_device", removed)
    }

    fn image_exists(&self, fingerprint: &str) -> Result<bool> {
        let exists = self
            .enter("image_exists", fingerprint)?
            .images
            .contains_key(fingerprint);
        self.done("image_exists", exists)
    }

    fn import_image(&self, archive: &Path, alias: &str) -> Result<String> {
        let bytes = std::fs::read(archive).map_err(io_at(archive))?;
        let fingerprint = hash_bytes(&bytes);
        {
            let mut state = self.enter("import_image", alias)?;
            if state
                .images
                .values()
                .any(|image| image.aliases.iter().any(|a| a == alias))
            {
                return Err(BraveError::remote("import_image", alias, "alias already exists"));
            }
            let entry = state
                .images
                .entry(fingerprint.clone())
                .or_insert_with(|| CachedImage {
                    aliases: Vec::new(),
                    bytes,
                });
            entry.aliases.push(alias.to_string());
        }
        self.done("import_image", fingerprint)
    }

    fn delete_image(&self, fingerprint: &str) -> Result<()> {
        let removed = self.enter("delete_image", fingerprint)?.images.remove(fingerprint);
        if removed.is_none() {
            return Err(BraveError::remote("delete_image", fingerprint, "image not found"));
        }
        self.done("delete_image", ())
    }

    fn publish(&self, name: &str, alias: &str) -> Result<String> {
        let fingerprint = {
            let mut state = self.enter("publish", name)?;
            if !state.instances.contains_key(name) {
                return Err(missing_instance("publish", name));
            }
            let bytes = image_archive(name)?;
            let fingerprint = hash_bytes(&bytes);
            let _ = state.images.insert(
                fingerprint.clone(),
                CachedImage {
                    aliases: vec![alias.to_string()],
                    bytes,
                },
            );
            fingerprint
        };
        self.done("publish", fingerprint)
    }

    fn export_image(&self, fingerprint: &str, dir: &Path, basename: &str) -> Result<PathBuf> {
        let bytes = self
            .enter("export_image", fingerprint)?
            .images
            .get(fingerprint)
            .map(|image| image.bytes.clone())
            .ok_or_else(|| BraveError::remote("export_image", fingerprint, "image not found"))?;
        let target = dir.join(format!("{basename}.tar.gz"));
        std::fs::write(&target, bytes).map_err(io_at(&target))?;
        self.done("export_image", target)
    }

    fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput> {
        {
            let mut state = self.enter("exec", name)?;
            if !state.instances.contains_key(name) {
                return Err(missing_instance("exec", name));
            }
            state.exec_log.push((name.to_string(), command.to_vec()));
        }
        self.done("exec", ExecOutput::default())
    }

    fn push_file(&self, name: &str, source: &Path, target: &str) -> Result<()> {
        {
            let mut state = self.enter("push_file", name)?;
            if !state.instances.contains_key(name) {
                return Err(missing_instance("push_file", name));
            }
            if !source.exists() {
                return Err(BraveError::remote(
                    "push_file",
                    name,
                    format!("{} does not exist", source.display()),
                ));
            }
            state
                .pushed
                .push((name.to_string(), source.to_path_buf(), target.to_string()));
        }
        self.done("push_file", ())
    }

    fn create_volume(&self, pool: &str, volume: &str) -> Result<()> {
        let inserted = self
            .enter("create_volume", volume)?
            .volumes
            .insert((pool.to_string(), volume.to_string()));
        if !inserted {
            return Err(BraveError::remote("create_volume", volume, "volume already exists"));
        }
        self.done("create_volume", ())
    }

    fn volume(&self, pool: &str, volume: &str) -> Result<Option<Volume>> {
        let found = {
            let state = self.enter("volume", volume)?;
            state
                .volumes
                .contains(&(pool.to_string(), volume.to_string()))
                .then(|| Volume {
                    name: volume.to_string(),
                    used_by: state
                        .instances
                        .values()
                        .filter(|i| {
                            i.devices.values().any(|d| {
                                d.get("pool").is_some_and(|p| p == pool)
                                    && d.get("source").is_some_and(|s| s == volume)
                            })
                        })
                        .map(|i| format!("/1.0/instances/{}", i.name))
                        .collect(),
                })
        };
        self.done("volume", found)
    }

    fn delete_volume(&self, pool: &str, volume: &str) -> Result<()> {
        let removed = self
            .enter("delete_volume", volume)?
            .volumes
            .remove(&(pool.to_string(), volume.to_string()));
        if !removed {
            return Err(BraveError::remote("delete_volume", volume, "volume not found"));
        }
        self.done("delete_volume", ())
    }

    fn network_address(&self, network: &str) -> Result<Option<String>> {
        let address = self
            .enter("network_address", network)?
            .networks
            .get(network)
            .cloned();
        self.done("network_address", address)
    }
}

/// [`Connector`] handing out [`MemoryClient`]s by remote name.
///
/// Unknown remotes get a fresh default client that is kept for later
/// connections, so tests can inspect it afterwards.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    clients: Arc<Mutex<BTreeMap<String, MemoryClient>>>,
}

impl MemoryConnector {
    /// Creates a connector with no clients.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `client` for the remote named `remote`.
    #[must_use]
    pub fn with_client(self, remote: &str, client: MemoryClient) -> Self {
        let _ = self
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(remote.to_string(), client);
        self
    }

    /// Client for `remote`, created on first use.
    #[must_use]
    pub fn client(&self, remote: &str) -> MemoryClient {
        self.clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(remote.to_string())
            .or_default()
            .clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, remote: &Remote) -> Result<Arc<dyn RuntimeClient>> {
        Ok(Arc::new(self.client(&remote.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::device;

    #[test]
    fn clones_share_state() {
        let client = MemoryClient::new().with_instance("web", "brave");
        let clone = client.clone();
        clone.stop("web").expect("stop");
        assert_eq!(client.snapshot("web").expect("web").status, "Stopped");
    }

    #[test]
    fn injected_failure_names_operation() {
        let client = MemoryClient::new().with_instance("web", "brave");
        client.fail_on("start");
        let err = client.start("web").unwrap_err();
        assert!(err.to_string().contains("start"));
        assert!(err.to_string().contains("web"));
        client.clear_failures();
        client.start("web").expect("start");
    }

    #[test]
    fn hook_runs_after_success_only() {
        let client = MemoryClient::new().with_instance("web", "brave");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_call(move |op| sink.lock().unwrap().push(op.to_string()));
        client.stop("web").expect("stop");
        client.fail_on("start");
        assert!(client.start("web").is_err());
        assert_eq!(*seen.lock().unwrap(), vec!["stop"]);
    }

    #[test]
    fn launch_requires_cached_image() {
        let client = MemoryClient::new();
        let request = LaunchRequest {
            name: "web".into(),
            source: ImageSource::Cached("web".into()),
            profile: "brave".into(),
            storage: String::new(),
        };
        assert!(client.launch(&request).is_err());
        assert!(client.instance_names().is_empty());
    }

    #[test]
    fn publish_then_export_round_trips_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = MemoryClient::new().with_instance("web", "brave");
        let fp = client.publish("web", "web-image").expect("publish");
        let path = client.export_image(&fp, dir.path(), "web_1.0_x86_64").expect("export");
        assert!(path.ends_with("web_1.0_x86_64.tar.gz"));
        assert!(bravekit_image::archive::validate_archive(&path).is_ok());

        let other = MemoryClient::new();
        assert_eq!(other.import_image(&path, "copy").expect("import"), fp);
    }

    #[test]
    fn volume_used_by_tracks_devices() {
        let client = MemoryClient::new().with_instance("a", "brave");
        client.create_volume("pool", "vol").expect("create");
        client
            .add_device(
                "a",
                "brave_x",
                &device(&[("type", "disk"), ("pool", "pool"), ("source", "vol"), ("path", "/data")]),
            )
            .expect("attach");
        let vol = client.volume("pool", "vol").expect("query").expect("exists");
        assert_eq!(vol.used_by, vec!["/1.0/instances/a"]);

        let _ = client.remove_device("a", "brave_x").expect("detach");
        let vol = client.volume("pool", "vol").expect("query").expect("exists");
        assert!(vol.used_by.is_empty());
    }

    #[test]
    fn connector_keeps_clients() {
        let connector = MemoryConnector::new();
        let remote = Remote::local(&bravekit_common::config::HostSettings::default());
        let client = connector.connect(&remote).expect("connect");
        client.create_volume("pool", "vol").expect("create");
        assert_eq!(connector.client("local").volume_names("pool"), vec!["vol"]);
    }
}
