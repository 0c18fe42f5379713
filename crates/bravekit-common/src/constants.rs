//! System-wide constants and on-disk layout of the data directory.

use std::path::{Path, PathBuf};

/// Name of the remote backed by the local backend host.
pub const LOCAL_REMOTE: &str = "local";

/// Prefix marking runtime devices owned by bravekit.
pub const DEVICE_PREFIX: &str = "brave_";

/// Version assigned to images that do not declare one.
pub const DEFAULT_IMAGE_VERSION: &str = "1.0";

/// Extension of image archives in the image store.
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Extension appended to an archive path for its detached hash file.
pub const HASH_EXTENSION: &str = ".sha256";

/// Network interface every unit is attached through.
pub const UNIT_NIC: &str = "eth0";

/// Directory inside the Multipass VM where host shares are staged.
pub const VM_VOLUMES_DIR: &str = "/home/ubuntu/volumes";

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "bravekit";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "brave";

/// Data directory name under the user's home.
const DATA_DIR_NAME: &str = ".bravekit";

/// Resolved locations of everything bravekit keeps on disk.
///
/// Constructed once by the binary and threaded through constructors; nothing
/// in the workspace reads the home directory on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Uses `root` as the data directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `$HOME/.bravekit` (or `%USERPROFILE%\.bravekit`).
    ///
    /// Returns `None` when neither variable is set.
    #[must_use]
    pub fn from_home() -> Option<Self> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| Self::new(PathBuf::from(home).join(DATA_DIR_NAME)))
    }

    /// Root of the data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding image archives and hash files.
    #[must_use]
    pub fn image_store(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Directory holding one JSON file per remote.
    #[must_use]
    pub fn remotes(&self) -> PathBuf {
        self.root.join("remotes")
    }

    /// Unit record store file.
    #[must_use]
    pub fn records(&self) -> PathBuf {
        self.root.join("units.json")
    }

    /// Host settings file.
    #[must_use]
    pub fn settings(&self) -> PathBuf {
        self.root.join("config.yml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted_in_data_dir() {
        let paths = Paths::new("/data");
        assert_eq!(paths.image_store(), PathBuf::from("/data/images"));
        assert_eq!(paths.remotes(), PathBuf::from("/data/remotes"));
        assert_eq!(paths.records(), PathBuf::from("/data/units.json"));
        assert_eq!(paths.settings(), PathBuf::from("/data/config.yml"));
    }
}
