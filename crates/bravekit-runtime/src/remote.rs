//! Named runtime remotes, persisted as one JSON file each.

use std::path::{Path, PathBuf};

use bravekit_common::config::{BackendKind, HostSettings};
use bravekit_common::constants::LOCAL_REMOTE;
use bravekit_common::error::{BraveError, Result, io_at};
use serde::{Deserialize, Serialize};

use crate::backend::UNKNOWN;
use crate::shell::{Shell, args};

/// Port the LXD API listens on inside a VM host.
pub const VM_API_PORT: u16 = 8443;

/// Transport used to reach a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// LXD REST API over HTTPS.
    #[default]
    Lxd,
    /// Local unix socket.
    Unix,
    /// Read-only simplestreams image server.
    Simplestreams,
}

/// A named connection target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    /// Name used in `remote:unit` references.
    pub name: String,
    /// Endpoint URL.
    pub url: String,
    /// Transport.
    #[serde(default)]
    pub protocol: Protocol,
    /// Whether the remote serves public images only.
    #[serde(default)]
    pub public: bool,
    /// Default profile for units deployed here.
    #[serde(default)]
    pub profile: String,
    /// Default network for units deployed here.
    #[serde(default)]
    pub network: String,
    /// Default storage pool for units deployed here.
    #[serde(default)]
    pub storage: String,
    /// Name the `lxc` client knows this remote by, when it differs.
    #[serde(default)]
    pub alias: String,
}

impl Remote {
    /// The local remote implied by host settings.
    ///
    /// A native host is reached over the unix socket; a VM host over HTTPS
    /// under the VM's name.
    #[must_use]
    pub fn local(settings: &HostSettings) -> Self {
        let (url, protocol, alias) = match settings.backend.kind {
            BackendKind::Lxd => (
                "unix:///var/snap/lxd/common/lxd/unix.socket".to_string(),
                Protocol::Unix,
                LOCAL_REMOTE.to_string(),
            ),
            BackendKind::Multipass => (String::new(), Protocol::Lxd, settings.name.clone()),
        };
        Self {
            name: LOCAL_REMOTE.to_string(),
            url,
            protocol,
            public: false,
            profile: settings.profile.clone(),
            network: settings.network.name.clone(),
            storage: settings.storage_pool.name.clone(),
            alias,
        }
    }

    /// Points the remote at the LXD API on `address`, the first entry of a
    /// whitespace-separated address list.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] if no address is known.
    pub fn set_address(&mut self, address: &str) -> Result<()> {
        let Some(ip) = address.split_whitespace().next().filter(|a| *a != UNKNOWN) else {
            return Err(BraveError::validation(format!(
                "remote {} has no known address",
                self.name
            )));
        };
        self.url = format!("https://{ip}:{VM_API_PORT}");
        Ok(())
    }

    /// Name to address this remote by through the `lxc` client.
    #[must_use]
    pub fn client_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }

    /// Whether the remote is reached over a local socket.
    #[must_use]
    pub fn is_unix(&self) -> bool {
        self.protocol == Protocol::Unix || self.url.starts_with("unix:")
    }

    /// Host part of the URL, used for port probing.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        let rest = self.url.split_once("://").map_or(self.url.as_str(), |(_, r)| r);
        let authority = rest.split('/').next().unwrap_or_default();
        let host = if let Some(bracketed) = authority.strip_prefix('[') {
            bracketed.split(']').next().unwrap_or_default()
        } else {
            authority.split(':').next().unwrap_or_default()
        };
        (!host.is_empty()).then_some(host)
    }

    /// Registers the remote with the `lxc` client.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Command`] if `lxc remote add` fails.
    pub fn register(&self, shell: &dyn Shell, trust: &str) -> Result<()> {
        if self.is_unix() {
            return Ok(());
        }
        let mut argv = args(&["remote", "add", self.client_name(), &self.url]);
        match self.protocol {
            Protocol::Simplestreams => {
                argv.extend(args(&["--protocol", "simplestreams", "--public"]));
            }
            Protocol::Lxd | Protocol::Unix => {
                argv.extend(args(&["--accept-certificate", "--password", trust]));
            }
        }
        let _ = shell.run("lxc", &argv)?;
        tracing::info!(remote = %self.name, url = %self.url, "remote registered");
        Ok(())
    }
}

/// Directory of remote definitions.
#[derive(Debug, Clone)]
pub struct RemoteRegistry {
    dir: PathBuf,
}

impl RemoteRegistry {
    /// Uses `dir` as the registry directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Loads a remote; the local remote falls back to `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] for unknown remotes.
    pub fn load(&self, name: &str, settings: &HostSettings) -> Result<Remote> {
        let path = self.path_of(name);
        if !path.exists() {
            if name == LOCAL_REMOTE {
                return Ok(Remote::local(settings));
            }
            return Err(BraveError::NotFound {
                kind: "remote",
                id: name.to_string(),
            });
        }
        let content = std::fs::read_to_string(&path).map_err(io_at(&path))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes a remote definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the file cannot be written.
    pub fn save(&self, remote: &Remote) -> Result<()> {
        validate_name(&remote.name)?;
        std::fs::create_dir_all(&self.dir).map_err(io_at(&self.dir))?;
        let path = self.path_of(&remote.name);
        let json = serde_json::to_string_pretty(remote)?;
        std::fs::write(&path, json).map_err(io_at(&path))?;
        tracing::debug!(remote = %remote.name, "remote saved");
        Ok(())
    }

    /// Names of all saved remotes, sorted; the local remote is always listed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = vec![LOCAL_REMOTE.to_string()];
        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir).map_err(io_at(&self.dir))? {
                let path = entry.map_err(io_at(&self.dir))?.path();
                if path.extension().is_some_and(|e| e == "json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        if stem != LOCAL_REMOTE {
                            names.push(stem.to_string());
                        }
                    }
                }
            }
        }
        names[1..].sort();
        Ok(names)
    }

    /// Deletes a remote definition.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] for the local remote and
    /// [`BraveError::NotFound`] for unknown remotes.
    pub fn remove(&self, name: &str) -> Result<()> {
        if name == LOCAL_REMOTE {
            return Err(BraveError::validation("the local remote cannot be removed"));
        }
        let path = self.path_of(name);
        if !path.exists() {
            return Err(BraveError::NotFound {
                kind: "remote",
                id: name.to_string(),
            });
        }
        std::fs::remove_file(&path).map_err(io_at(&path))
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Registry directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
    {
        return Err(BraveError::validation(format!(
            "remote name {name:?} must be alphanumeric with '-', '_' or '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(name: &str, url: &str) -> Remote {
        Remote {
            name: name.into(),
            url: url.into(),
            protocol: Protocol::Lxd,
            public: false,
            profile: "brave".into(),
            network: "bravebr0".into(),
            storage: "brave".into(),
            alias: String::new(),
        }
    }

    #[test]
    fn local_falls_back_to_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RemoteRegistry::new(dir.path());
        let mut settings = HostSettings::default();
        settings.backend.kind = BackendKind::Lxd;
        let local = registry.load(LOCAL_REMOTE, &settings).expect("load");
        assert!(local.is_unix());
        assert_eq!(local.profile, settings.profile);
    }

    #[test]
    fn vm_local_remote_takes_first_address() {
        let mut settings = HostSettings::default();
        settings.backend.kind = BackendKind::Multipass;
        let mut local = Remote::local(&settings);
        assert!(local.host().is_none());

        local.set_address("10.1.2.3 172.17.0.1").expect("address");
        assert_eq!(local.url, "https://10.1.2.3:8443");
        assert_eq!(local.host(), Some("10.1.2.3"));
        assert!(!local.is_unix());

        assert!(matches!(
            local.set_address(UNKNOWN),
            Err(BraveError::Validation { .. })
        ));
        assert!(local.set_address("").is_err());
    }

    #[test]
    fn unknown_remote_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RemoteRegistry::new(dir.path());
        assert!(matches!(
            registry.load("prod", &HostSettings::default()),
            Err(BraveError::NotFound { .. })
        ));
    }

    #[test]
    fn save_list_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RemoteRegistry::new(dir.path().join("remotes"));
        registry.save(&remote("zeta", "https://10.0.0.9:8443")).expect("save");
        registry.save(&remote("alpha", "https://10.0.0.8:8443")).expect("save");

        assert_eq!(registry.list().expect("list"), vec!["local", "alpha", "zeta"]);
        let loaded = registry.load("zeta", &HostSettings::default()).expect("load");
        assert_eq!(loaded.url, "https://10.0.0.9:8443");

        registry.remove("zeta").expect("remove");
        assert_eq!(registry.list().expect("list"), vec!["local", "alpha"]);
        assert!(registry.remove(LOCAL_REMOTE).is_err());
    }

    #[test]
    fn host_is_extracted_from_url() {
        assert_eq!(remote("a", "https://10.0.0.9:8443").host(), Some("10.0.0.9"));
        assert_eq!(remote("a", "https://[::1]:8443").host(), Some("::1"));
        assert_eq!(remote("a", "example.org").host(), Some("example.org"));
        assert_eq!(remote("a", "").host(), None);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RemoteRegistry::new(dir.path());
        assert!(registry.save(&remote("bad/name", "https://x")).is_err());
    }
}
