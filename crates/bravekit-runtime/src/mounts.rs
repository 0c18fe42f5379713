//! Shared storage between the host and units, and between units.
//!
//! Every device bravekit attaches is named [`device_name`] of the unit and
//! its normalized target, so the same mount can be found again from either
//! spelling of the path.

use std::path::{Path, PathBuf};

use bravekit_common::constants::{DEVICE_PREFIX, LOCAL_REMOTE};
use bravekit_common::error::{BraveError, Result};
use bravekit_image::hash::hash_str;

use crate::client::{Device, RuntimeClient, device};
use crate::host::BraveHost;

const DEVICE_HASH_LEN: usize = 20;

/// Normalizes a target path to forward slashes, one leading slash and no
/// trailing slash.
#[must_use]
pub fn normalize_target(target: &str) -> String {
    let parts: Vec<&str> = target
        .split(['/', '\\'])
        .filter(|p| !p.is_empty())
        .collect();
    format!("/{}", parts.join("/"))
}

/// Device name owning the mount of `target` in `unit`.
#[must_use]
pub fn device_name(unit: &str, target: &str) -> String {
    let digest = hash_str(&format!("{unit}:{}", normalize_target(target)));
    format!("{DEVICE_PREFIX}{}", &digest[..DEVICE_HASH_LEN])
}

/// What a mount shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// A directory on the host.
    Host(PathBuf),
    /// A directory inside another unit.
    Unit {
        /// Unit holding the directory.
        unit: String,
        /// Directory inside that unit.
        path: String,
    },
}

impl MountSource {
    /// Parses `[UNIT:]PATH`; relative host paths are resolved against `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] for more than one `:` or empty parts.
    pub fn parse(source: &str, cwd: &Path) -> Result<Self> {
        let invalid =
            || BraveError::validation(format!("cannot parse mount source {source:?}, expected [UNIT:]PATH"));
        let parts: Vec<&str> = source.split(':').collect();
        match parts.as_slice() {
            [path] if !path.is_empty() => {
                let path = Path::new(path);
                Ok(Self::Host(if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    cwd.join(path)
                }))
            }
            [unit, path] if !unit.is_empty() && !path.is_empty() => Ok(Self::Unit {
                unit: (*unit).to_string(),
                path: path.replace('\\', "/"),
            }),
            _ => Err(invalid()),
        }
    }
}

/// A bravekit-owned mount of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Host path, staged path or volume name.
    pub source: String,
    /// Path inside the unit, always with a leading `/`.
    pub path: String,
}

impl BraveHost {
    /// Mounts `source` at `path` inside `unit` on the local remote.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if a unit is missing, or the error of
    /// the step that failed after partial work was reversed.
    pub fn mount(&self, source: &MountSource, unit: &str, path: &str) -> Result<()> {
        let (_, client) = self.connect(LOCAL_REMOTE)?;
        let client = client.as_ref();
        self.require_managed(client, unit)?;
        let target = normalize_target(path);

        match source {
            MountSource::Unit {
                unit: source_unit,
                path: source_path,
            } => {
                self.require_managed(client, source_unit)?;
                let result = self.share_between(client, source_unit, source_path, unit, &target);
                if result.is_err() {
                    let sides = [(source_unit.as_str(), source_path.as_str()), (unit, target.as_str())];
                    for (side, side_path) in sides {
                        if let Err(e) = self.unmount_with(client, side, side_path) {
                            tracing::warn!(unit = %side, path = %side_path, error = %e, "cleanup unmount failed");
                        }
                    }
                    let pool = &self.settings.storage_pool.name;
                    let volume = device_name(source_unit, source_path);
                    if let Err(e) = delete_if_unused(client, pool, &volume) {
                        tracing::warn!(volume = %volume, error = %e, "failed to delete shared volume");
                    }
                }
                result
            }
            MountSource::Host(host_path) => {
                let name = device_name(unit, &target);
                let staged = self.platform.shares.stage(host_path, &name)?;
                let disk = device(&[("type", "disk"), ("source", &staged), ("path", &target)]);
                if let Err(e) = client.add_device(unit, &name, &disk) {
                    if let Err(release) = self.platform.shares.release(&staged) {
                        tracing::warn!(staged = %staged, error = %release, "failed to release staged share");
                    }
                    return Err(e);
                }
                tracing::info!(source = %host_path.display(), unit = %unit, path = %target, "host path mounted");
                Ok(())
            }
        }
    }

    fn share_between(
        &self,
        client: &dyn RuntimeClient,
        source_unit: &str,
        source_path: &str,
        unit: &str,
        target: &str,
    ) -> Result<()> {
        let pool = &self.settings.storage_pool.name;
        let source_path = normalize_target(source_path);
        let volume = device_name(source_unit, &source_path);
        if client.volume(pool, &volume)?.is_none() {
            client.create_volume(pool, &volume)?;
        }
        let disk = |path: &str| device(&[("type", "disk"), ("pool", pool), ("source", &volume), ("path", path)]);
        client.add_device(source_unit, &volume, &disk(&source_path))?;
        client.add_device(unit, &device_name(unit, target), &disk(target))?;
        tracing::info!(source = %source_unit, unit = %unit, volume = %volume, "volume shared between units");
        Ok(())
    }

    /// Unmounts `path` from `unit` on the local remote.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if there is no such mount.
    pub fn unmount(&self, unit: &str, path: &str) -> Result<()> {
        let (_, client) = self.connect(LOCAL_REMOTE)?;
        self.unmount_with(client.as_ref(), unit, path)
    }

    /// Removes the device for `path`, then releases a staged host share or
    /// deletes the backing volume once nothing uses it.
    pub(crate) fn unmount_with(&self, client: &dyn RuntimeClient, unit: &str, path: &str) -> Result<()> {
        let target = normalize_target(path);
        let removed: Device = client.remove_device(unit, &device_name(unit, &target))?;
        let source = removed.get("source").cloned().unwrap_or_default();

        if let Some(pool) = removed.get("pool") {
            delete_if_unused(client, pool, &source)?;
        } else {
            self.platform.shares.release(&source)?;
        }
        tracing::info!(unit = %unit, path = %target, "unmounted");
        Ok(())
    }

    /// bravekit-owned disk mounts of `unit`, ordered by source length then
    /// lexicographically.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if the unit does not exist.
    pub fn list_mounts(&self, unit: &str) -> Result<Vec<MountInfo>> {
        let (_, client) = self.connect(LOCAL_REMOTE)?;
        let instance = client.instance(unit)?.ok_or_else(|| BraveError::NotFound {
            kind: "unit",
            id: unit.to_string(),
        })?;
        let mut mounts: Vec<MountInfo> = instance
            .devices
            .iter()
            .filter(|(name, device)| {
                name.starts_with(DEVICE_PREFIX) && device.get("type").is_some_and(|t| t == "disk")
            })
            .filter_map(|(_, device)| {
                let source = device.get("source")?.clone();
                let path = device.get("path").map_or_else(String::new, Clone::clone);
                let path = if path.starts_with('/') { path } else { format!("/{path}") };
                Some(MountInfo { source, path })
            })
            .collect();
        mounts.sort_by(|a, b| {
            a.source
                .len()
                .cmp(&b.source.len())
                .then_with(|| a.source.cmp(&b.source))
        });
        Ok(mounts)
    }

    /// Mounts of every unit on the local remote, by unit name.
    ///
    /// # Errors
    ///
    /// Returns an error if units cannot be listed.
    pub fn list_all_mounts(&self) -> Result<Vec<(String, Vec<MountInfo>)>> {
        self.unit_names()?
            .into_iter()
            .map(|unit| {
                let mounts = self.list_mounts(&unit)?;
                Ok((unit, mounts))
            })
            .collect()
    }

    fn require_managed(&self, client: &dyn RuntimeClient, unit: &str) -> Result<()> {
        let managed = client
            .instance(unit)?
            .is_some_and(|i| i.profiles.iter().any(|p| *p == self.settings.profile));
        if !managed {
            return Err(BraveError::NotFound {
                kind: "unit",
                id: unit.to_string(),
            });
        }
        Ok(())
    }
}

fn delete_if_unused(client: &dyn RuntimeClient, pool: &str, volume: &str) -> Result<()> {
    let unused = client
        .volume(pool, volume)?
        .is_some_and(|v| v.used_by.is_empty());
    if unused {
        client.delete_volume(pool, volume)?;
        tracing::debug!(pool = %pool, volume = %volume, "unused volume deleted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_normalize_slash_variants() {
        assert_eq!(normalize_target("data"), "/data");
        assert_eq!(normalize_target("/data/"), "/data");
        assert_eq!(normalize_target("//srv//data//"), "/srv/data");
        assert_eq!(normalize_target("\\srv\\data"), "/srv/data");
        assert_eq!(normalize_target("/"), "/");
    }

    #[test]
    fn device_name_is_stable_across_spellings() {
        let a = device_name("web", "/data");
        assert_eq!(a, device_name("web", "data/"));
        assert_eq!(a, device_name("web", "//data"));
        assert_ne!(a, device_name("db", "/data"));
        assert!(a.starts_with("brave_"));
        assert_eq!(a.len(), "brave_".len() + 20);
    }

    #[test]
    fn source_parsing() {
        let cwd = Path::new("/home/me");
        assert_eq!(
            MountSource::parse("/srv/data", cwd).expect("host"),
            MountSource::Host(PathBuf::from("/srv/data"))
        );
        assert_eq!(
            MountSource::parse("data", cwd).expect("relative"),
            MountSource::Host(PathBuf::from("/home/me/data"))
        );
        assert_eq!(
            MountSource::parse("db:/var/lib/db", cwd).expect("unit"),
            MountSource::Unit {
                unit: "db".into(),
                path: "/var/lib/db".into()
            }
        );
        assert!(MountSource::parse("a:b:c", cwd).is_err());
        assert!(MountSource::parse(":/x", cwd).is_err());
        assert!(MountSource::parse("", cwd).is_err());
    }
}
