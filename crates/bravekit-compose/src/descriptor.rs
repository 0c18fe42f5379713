//! Compose descriptors.
//!
//! ```yaml
//! services:
//!   base:
//!     bravefile: base/Bravefile
//!     base: true
//!   web:
//!     bravefile: web/Bravefile
//!     build: true
//!     depends_on: [db]
//!     ports: ["8080:80"]
//! ```
//!
//! Relative paths resolve against the descriptor's directory. Inline deploy
//! fields override the Bravefile's `service` section.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bravekit_common::bravefile::{BaseLocation, Bravefile, Service};
use bravekit_common::error::{BraveError, Result, io_at};
use serde::Deserialize;

/// One entry of a compose descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposeService {
    /// Bravefile path, relative to the descriptor.
    #[serde(default)]
    pub bravefile: String,
    /// Build the Bravefile's image before deploying.
    #[serde(default)]
    pub build: bool,
    /// Build-only image for other services; never deployed.
    #[serde(default)]
    pub base: bool,
    /// Build and deploy context, relative to the descriptor.
    #[serde(default)]
    pub context: String,
    /// Services that must be handled first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Deploy parameters, with Bravefile defaults merged in on load.
    #[serde(flatten)]
    pub service: Service,
    /// The loaded Bravefile.
    #[serde(skip)]
    pub build_file: Option<Bravefile>,
}

impl ComposeService {
    /// Base image built only to feed other builds.
    #[must_use]
    pub const fn is_base_only(&self) -> bool {
        self.base && !self.build
    }

    /// Bravefile to build, if this service has a build step.
    #[must_use]
    pub fn build_step(&self) -> Option<&Bravefile> {
        if self.build || self.base {
            self.build_file.as_ref()
        } else {
            None
        }
    }

    /// Image reference of the local base the Bravefile builds from.
    #[must_use]
    pub fn local_base(&self) -> Option<&str> {
        self.build_file
            .as_ref()
            .filter(|b| b.base.location == BaseLocation::Local && !b.base.image.is_empty())
            .map(|b| b.base.image.as_str())
    }
}

#[derive(Deserialize)]
struct RawCompose {
    #[serde(default)]
    services: BTreeMap<String, ComposeService>,
}

/// A loaded compose descriptor.
#[derive(Debug, Clone)]
pub struct ComposeFile {
    /// Directory all relative paths resolve against.
    pub dir: PathBuf,
    /// Services by name.
    pub services: BTreeMap<String, ComposeService>,
}

impl ComposeFile {
    /// Loads a descriptor and the Bravefiles it references.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(io_at(path))?;
        let absolute = std::path::absolute(path).map_err(io_at(path))?;
        let dir = absolute
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let file = Self::parse(&content, dir)?;
        tracing::debug!(path = %path.display(), services = file.services.len(), "loaded compose file");
        Ok(file)
    }

    /// Parses descriptor text whose relative paths resolve against `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid YAML or an unreadable Bravefile.
    pub fn parse(content: &str, dir: PathBuf) -> Result<Self> {
        let raw: RawCompose = serde_yaml::from_str(content)?;
        let mut services = raw.services;
        for (key, entry) in &mut services {
            if !entry.bravefile.is_empty() {
                let bravefile = Bravefile::load(&dir.join(&entry.bravefile))?;
                entry.service.merge_defaults(&bravefile.service);
                if entry.service.image.is_empty() {
                    entry.service.image.clone_from(&bravefile.image);
                }
                entry.build_file = Some(bravefile);
            }
            if entry.service.name.is_empty() {
                entry.service.name.clone_from(key);
            }
        }
        Ok(Self { dir, services })
    }

    /// Looks up a service.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] for unknown names.
    pub fn service(&self, name: &str) -> Result<&ComposeService> {
        self.services.get(name).ok_or_else(|| BraveError::NotFound {
            kind: "service",
            id: name.to_string(),
        })
    }

    /// Directory a service's image is built in.
    #[must_use]
    pub fn build_context(&self, entry: &ComposeService) -> PathBuf {
        if !entry.context.is_empty() {
            return self.dir.join(&entry.context);
        }
        self.bravefile_dir(entry)
    }

    /// Directory a service is deployed from.
    #[must_use]
    pub fn deploy_context(&self, entry: &ComposeService) -> PathBuf {
        if !entry.context.is_empty() {
            return self.dir.join(&entry.context);
        }
        if entry.bravefile.is_empty() {
            return self.dir.clone();
        }
        self.bravefile_dir(entry)
    }

    fn bravefile_dir(&self, entry: &ComposeService) -> PathBuf {
        let bravefile = self.dir.join(&entry.bravefile);
        bravefile
            .parent()
            .map_or_else(|| self.dir.clone(), Path::to_path_buf)
    }
}
