//! Runtime-control client seam.
//!
//! [`RuntimeClient`] is the narrow view of the LXD API the rest of the crate
//! needs. [`lxc::LxcClient`] drives the `lxc` CLI; [`memory::MemoryClient`]
//! keeps everything in process for tests and dry runs.

pub mod lxc;
pub mod memory;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bravekit_common::error::{BraveError, Result};

use crate::remote::Remote;

/// Device configuration, `type` included.
pub type Device = BTreeMap<String, String>;

/// Builds a [`Device`] from key/value pairs.
#[must_use]
pub fn device(pairs: &[(&str, &str)]) -> Device {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// A container instance as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    /// Instance name.
    pub name: String,
    /// Runtime status (`Running`, `Stopped`, ...).
    pub status: String,
    /// Profiles applied to the instance.
    pub profiles: Vec<String>,
    /// Instance-local configuration.
    pub config: BTreeMap<String, String>,
    /// Instance-local devices by name.
    pub devices: BTreeMap<String, Device>,
    /// IPv4 addresses on the unit NIC.
    pub addresses: Vec<String>,
}

/// Server identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server version string, e.g. `5.0.2`.
    pub version: String,
    /// Supported architectures, native first.
    pub architectures: Vec<String>,
}

impl ServerInfo {
    /// Native architecture of the server.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] if the server reported none.
    pub fn architecture(&self) -> Result<&str> {
        self.architectures
            .first()
            .map(String::as_str)
            .ok_or_else(|| BraveError::validation("runtime server reported no architecture"))
    }
}

/// Total and used capacity in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    /// Total bytes.
    pub total: u64,
    /// Used bytes.
    pub used: u64,
}

impl Capacity {
    /// Bytes still available.
    #[must_use]
    pub const fn available(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }
}

/// A custom storage volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// API paths of the instances using the volume.
    pub used_by: Vec<String>,
}

/// Where a new instance takes its root filesystem from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// An alias or fingerprint already in the target's image cache.
    Cached(String),
    /// An alias on another remote (a private remote or a public image server).
    Remote {
        /// Remote name as known to the runtime client.
        remote: String,
        /// Image alias on that remote.
        alias: String,
    },
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cached(alias) => write!(f, "{alias}"),
            Self::Remote { remote, alias } => write!(f, "{remote}:{alias}"),
        }
    }
}

/// Parameters for creating and starting an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Instance name.
    pub name: String,
    /// Root filesystem source.
    pub source: ImageSource,
    /// Profile to apply; empty means the server default.
    pub profile: String,
    /// Storage pool for the root disk; empty means the profile's.
    pub storage: String,
}

/// Output of a command run inside an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Fails unless the command exited with zero.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Command`] carrying stderr.
    pub fn check(self, command: &[String]) -> Result<Self> {
        if self.exit_code == 0 {
            return Ok(self);
        }
        Err(BraveError::Command {
            command: command.join(" "),
            message: format!("exit code {}: {}", self.exit_code, self.stderr.trim()),
        })
    }
}

/// Operations against one runtime remote.
pub trait RuntimeClient: Send + Sync {
    /// Server version and architectures.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] if the server cannot be queried.
    fn server_info(&self) -> Result<ServerInfo>;

    /// Host memory.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] if resources cannot be queried.
    fn memory(&self) -> Result<Capacity>;

    /// Space in a storage pool.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] if the pool cannot be queried.
    fn storage_pool(&self, pool: &str) -> Result<Capacity>;

    /// Looks up an instance; `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] for failures other than absence.
    fn instance(&self, name: &str) -> Result<Option<Instance>>;

    /// Lists instances, optionally only those carrying `profile`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] if the listing fails.
    fn instances(&self, profile: Option<&str>) -> Result<Vec<Instance>>;

    /// Creates and starts an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] if creation or start fails.
    fn launch(&self, request: &LaunchRequest) -> Result<()>;

    /// Starts an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn start(&self, name: &str) -> Result<()>;

    /// Stops an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn stop(&self, name: &str) -> Result<()>;

    /// Force-deletes an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn delete_instance(&self, name: &str) -> Result<()>;

    /// Sets configuration keys on an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn set_config(&self, name: &str, config: &BTreeMap<String, String>) -> Result<()>;

    /// Adds a device, replacing an instance-local device of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn add_device(&self, name: &str, device_name: &str, device: &Device) -> Result<()>;

    /// Removes a device and returns its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if the device does not exist.
    fn remove_device(&self, name: &str, device_name: &str) -> Result<Device>;

    /// Whether an image with `fingerprint` is cached.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] for failures other than absence.
    fn image_exists(&self, fingerprint: &str) -> Result<bool>;

    /// Imports a unified image tarball under `alias`; returns its fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn import_image(&self, archive: &Path, alias: &str) -> Result<String>;

    /// Deletes a cached image.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn delete_image(&self, fingerprint: &str) -> Result<()>;

    /// Publishes an instance as an image under `alias`; returns its fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn publish(&self, name: &str, alias: &str) -> Result<String>;

    /// Exports a cached image as `<dir>/<basename>.tar.gz`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn export_image(&self, fingerprint: &str, dir: &Path, basename: &str) -> Result<PathBuf>;

    /// Runs a command inside an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] if the command cannot be started.
    fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput>;

    /// Copies a host file or directory into an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn push_file(&self, name: &str, source: &Path, target: &str) -> Result<()>;

    /// Creates a custom storage volume.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn create_volume(&self, pool: &str, volume: &str) -> Result<()>;

    /// Looks up a custom storage volume; `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] for failures other than absence.
    fn volume(&self, pool: &str, volume: &str) -> Result<Option<Volume>>;

    /// Deletes a custom storage volume.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] on failure.
    fn delete_volume(&self, pool: &str, volume: &str) -> Result<()>;

    /// IPv4 address of a managed network, if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Remote`] if the network cannot be queried.
    fn network_address(&self, network: &str) -> Result<Option<String>>;
}

/// Opens clients for remotes.
pub trait Connector: Send + Sync {
    /// Connects to `remote`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote cannot be reached.
    fn connect(&self, remote: &Remote) -> Result<Arc<dyn RuntimeClient>>;
}
