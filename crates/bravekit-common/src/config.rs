//! Host settings: the persisted source of defaults for units and services.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BraveError, Result, io_at};

/// Root settings for the bravekit host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Name of the runtime host (the Multipass VM name for VM backends).
    pub name: String,
    /// Trust secret registered with the runtime for remote clients.
    pub trust: String,
    /// Profile applied to every unit.
    pub profile: String,
    /// Storage pool backing unit root disks and shared volumes.
    pub storage_pool: StoragePool,
    /// Bridge network units attach to.
    pub network: NetworkSettings,
    /// Backend selection and sizing.
    pub backend: BackendSettings,
    /// Provisioning status, `active` once initialization completed.
    #[serde(default)]
    pub status: String,
}

/// Storage pool definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePool {
    /// Pool name.
    pub name: String,
    /// Pool driver (`zfs`, `btrfs`, `dir`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Pool size, e.g. `50GB`.
    pub size: String,
}

/// Bridge network definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Network name.
    pub name: String,
    /// IPv4 address of the bridge.
    pub bridge: String,
}

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Runtime hosted in a Multipass VM.
    Multipass,
    /// Runtime installed directly on this machine.
    Lxd,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Multipass => write!(f, "multipass"),
            Self::Lxd => write!(f, "lxd"),
        }
    }
}

/// Backend selection and VM sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Backend kind.
    #[serde(rename = "type")]
    pub kind: BackendKind,
    /// VM resources, used by VM-hosted backends only.
    pub resources: VmResources,
}

/// Sizing of the backend VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmResources {
    /// VM name.
    pub name: String,
    /// Guest release to launch.
    pub os: String,
    /// CPU count.
    pub cpu: String,
    /// RAM, e.g. `4GB`.
    pub ram: String,
    /// Disk size, e.g. `50GB`.
    pub hd: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        let kind = if cfg!(target_os = "linux") {
            BackendKind::Lxd
        } else {
            BackendKind::Multipass
        };
        Self {
            name: "brave".into(),
            trust: "brave".into(),
            profile: "brave".into(),
            storage_pool: StoragePool {
                name: "brave".into(),
                kind: "zfs".into(),
                size: "50GB".into(),
            },
            network: NetworkSettings {
                name: "bravebr0".into(),
                bridge: "10.0.0.1".into(),
            },
            backend: BackendSettings {
                kind,
                resources: VmResources {
                    name: "brave".into(),
                    os: "jammy".into(),
                    cpu: "2".into(),
                    ram: "4GB".into(),
                    hd: "50GB".into(),
                },
            },
            status: String::new(),
        }
    }
}

impl HostSettings {
    /// Loads settings from `path`, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(io_at(path))?;
        let settings: Self = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    /// Writes settings to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(io_at(path))?;
        tracing::debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Whether backend initialization has completed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// Fails unless the settings describe a usable host.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("profile", &self.profile),
            ("storage_pool.name", &self.storage_pool.name),
            ("network.name", &self.network.name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(BraveError::validation(format!(
                    "host setting {field} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = HostSettings::load(&dir.path().join("config.yml")).expect("load");
        assert_eq!(settings, HostSettings::default());
        assert!(!settings.is_active());
    }

    #[test]
    fn save_then_load_keeps_backend_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.yml");
        let mut settings = HostSettings::default();
        settings.backend.kind = BackendKind::Multipass;
        settings.status = "active".into();
        settings.save(&path).expect("save");

        let loaded = HostSettings::load(&path).expect("load");
        assert_eq!(loaded.backend.kind, BackendKind::Multipass);
        assert!(loaded.is_active());
    }

    #[test]
    fn yaml_uses_type_keys() {
        let yaml = serde_yaml::to_string(&HostSettings::default()).expect("yaml");
        assert!(yaml.contains("type: zfs"));
    }

    #[test]
    fn validate_rejects_empty_profile() {
        let mut settings = HostSettings::default();
        settings.profile = " ".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("profile"));
    }
}
