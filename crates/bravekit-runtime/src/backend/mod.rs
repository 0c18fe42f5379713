//! Runtime host abstraction.
//!
//! A [`Backend`] provisions and supervises the machine the runtime runs on.
//! [`ShareStaging`] carries the backend-specific part of host-path mounts so
//! the mount subsystem never branches on the backend kind.

pub mod multipass;
pub mod native;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use bravekit_common::config::{BackendKind, HostSettings};
use bravekit_common::constants::Paths;
use bravekit_common::error::{BraveError, Result};
use bravekit_common::units::format_bytes_si;

use crate::shell::Shell;

/// Placeholder for host facts that could not be gathered.
pub const UNKNOWN: &str = "unknown";

/// Used and total quantities, already formatted for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    /// Used amount.
    pub used: String,
    /// Total amount.
    pub total: String,
}

impl Default for Usage {
    fn default() -> Self {
        Self {
            used: UNKNOWN.into(),
            total: UNKNOWN.into(),
        }
    }
}

impl Usage {
    /// Formats byte counts with SI units.
    #[must_use]
    pub fn from_bytes(used: u64, total: u64) -> Self {
        Self {
            used: format_bytes_si(used),
            total: format_bytes_si(total),
        }
    }
}

/// Facts about the runtime host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Host name.
    pub name: String,
    /// Running state as reported by the backend.
    pub state: String,
    /// Primary IPv4 address.
    pub ipv4: String,
    /// Guest release.
    pub release: String,
    /// Load averages.
    pub load: String,
    /// Storage pool usage.
    pub disk: Usage,
    /// Memory usage.
    pub memory: Usage,
    /// CPU count.
    pub cpu: String,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            name: UNKNOWN.into(),
            state: UNKNOWN.into(),
            ipv4: UNKNOWN.into(),
            release: UNKNOWN.into(),
            load: UNKNOWN.into(),
            disk: Usage::default(),
            memory: Usage::default(),
            cpu: UNKNOWN.into(),
        }
    }
}

impl HostInfo {
    /// Whether the host reported itself running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Lifecycle of the runtime host.
pub trait Backend: Send + Sync {
    /// Provisions the host and returns the settings as finally persisted.
    ///
    /// # Errors
    ///
    /// Returns the first mandatory step that failed.
    fn initialize(&self) -> Result<HostSettings>;

    /// Host facts; fields stay [`UNKNOWN`] while the host is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried at all.
    fn info(&self) -> Result<HostInfo>;

    /// Whether the host is up. Has no side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if liveness cannot be determined.
    fn running(&self) -> Result<bool>;

    /// Starts the host; a running host is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be started.
    fn start(&self) -> Result<()>;
}

/// Makes host paths reachable by the runtime.
pub trait ShareStaging: Send + Sync {
    /// Stages `source` for the device named `device` and returns the path the
    /// runtime should mount.
    ///
    /// # Errors
    ///
    /// Returns an error if the share cannot be set up.
    fn stage(&self, source: &Path, device: &str) -> Result<String>;

    /// Reverses [`stage`](Self::stage) for a path it returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the share cannot be torn down.
    fn release(&self, staged: &str) -> Result<()>;
}

/// The backend and its share plumbing, selected together.
pub struct Platform {
    /// Host lifecycle.
    pub backend: Box<dyn Backend>,
    /// Host-path share staging.
    pub shares: Box<dyn ShareStaging>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

/// Builds the platform for the configured backend kind.
#[must_use]
pub fn select(settings: &HostSettings, paths: &Paths, shell: Arc<dyn Shell>) -> Platform {
    match settings.backend.kind {
        BackendKind::Multipass => Platform {
            backend: Box::new(multipass::MultipassBackend::new(
                settings.clone(),
                paths.clone(),
                Arc::clone(&shell),
            )),
            shares: Box::new(multipass::MultipassShares::new(&settings.name, shell)),
        },
        BackendKind::Lxd => Platform {
            backend: Box::new(native::NativeBackend::new(settings.clone(), shell)),
            shares: Box::new(native::NativeShares),
        },
    }
}

/// Parses a backend kind name as written in settings or on the command line.
///
/// # Errors
///
/// Returns [`BraveError::Validation`] for unsupported kinds.
pub fn parse_kind(name: &str) -> Result<BackendKind> {
    match name.trim().to_ascii_lowercase().as_str() {
        "multipass" => Ok(BackendKind::Multipass),
        "lxd" => Ok(BackendKind::Lxd),
        other => Err(BraveError::validation(format!(
            "backend type {other:?} not supported"
        ))),
    }
}

/// Backend kind parsed from a CLI flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindArg(pub BackendKind);

impl FromStr for KindArg {
    type Err = BraveError;

    fn from_str(s: &str) -> Result<Self> {
        parse_kind(s).map(Self)
    }
}

/// Parses `/proc/meminfo`, whose `kB` are KiB, into `(total, available)` bytes.
pub(crate) fn parse_meminfo(meminfo: &str) -> Option<(u64, u64)> {
    let field = |key: &str| {
        meminfo.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
    };
    Some((field("MemTotal")? * 1024, field("MemAvailable")? * 1024))
}

/// Parses `lxc storage info --bytes` into `(used, total)` bytes.
pub(crate) fn parse_storage_info(info: &str) -> Option<(u64, u64)> {
    let field = |key: &str| {
        info.lines().find_map(|line| {
            let (name, value) = line.trim().split_once(':')?;
            (name.trim() == key)
                .then(|| value.trim().trim_matches('"').parse::<u64>().ok())
                .flatten()
        })
    };
    Some((field("space used")?, field("total space")?))
}
