//! Bravefile and service descriptors.
//!
//! A Bravefile describes how to build an image (`base`, `system`, `copy`,
//! `run`) and, in its `service` section, how to deploy a unit from it. The
//! same [`Service`] type is embedded in compose descriptors.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BraveError, Result, io_at};
use crate::types::PortRule;
use crate::units::parse_bytes;

/// Where a build's base image comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseLocation {
    /// The local image store.
    #[default]
    Local,
    /// An image on a configured remote (`remote:alias`).
    Private,
    /// A public image server (`images:alpine/3.19`).
    Public,
}

/// Base image of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImage {
    /// Image reference.
    #[serde(default)]
    pub image: String,
    /// Origin of the image reference.
    #[serde(default)]
    pub location: BaseLocation,
}

/// Distribution packages installed during a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPackages {
    /// Packages installed with `apt`.
    #[serde(default)]
    pub apt: Vec<String>,
    /// Packages installed with `apk`.
    #[serde(default)]
    pub apk: Vec<String>,
}

/// A command run inside a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommand {
    /// Executable.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl RunCommand {
    /// Command line as an argument vector.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.command.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// A file or directory copied into a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyCommand {
    /// Source path, relative to the build or deploy context.
    pub source: String,
    /// Destination path inside the unit.
    pub target: String,
    /// Optional shell command run after the copy.
    #[serde(default)]
    pub action: String,
}

/// Steps run after a unit is up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDeploy {
    /// Commands to run.
    #[serde(default)]
    pub run: Vec<RunCommand>,
    /// Files to copy in before the commands run.
    #[serde(default)]
    pub copy: Vec<CopyCommand>,
}

impl PostDeploy {
    /// Whether there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.run.is_empty() && self.copy.is_empty()
    }
}

/// Resource limits of a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// RAM limit, e.g. `512MB`.
    #[serde(default, deserialize_with = "string_or_number")]
    pub ram: String,
    /// CPU count.
    #[serde(default, deserialize_with = "string_or_number")]
    pub cpu: String,
    /// Whether a GPU is passed through.
    #[serde(default, deserialize_with = "yes_no")]
    pub gpu: bool,
}

/// Deployment parameters of a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Unit name, optionally `remote:name`.
    #[serde(default)]
    pub name: String,
    /// Image reference, optionally `remote:identity`.
    #[serde(default)]
    pub image: String,
    /// Version given separately from the image (legacy Bravefiles).
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: String,
    /// Profile override.
    #[serde(default)]
    pub profile: String,
    /// Network override.
    #[serde(default)]
    pub network: String,
    /// Storage pool override.
    #[serde(default)]
    pub storage: String,
    /// Static IPv4 address.
    #[serde(default)]
    pub ip: String,
    /// Port rules `UNIT_PORT:HOST_PORT`.
    #[serde(default)]
    pub ports: Vec<String>,
    /// Resource limits.
    #[serde(default)]
    pub resources: Resources,
    /// Enables nesting so the unit can run its own container engine.
    #[serde(default, deserialize_with = "yes_no")]
    pub docker: bool,
    /// Post-deploy steps.
    #[serde(default)]
    pub postdeploy: PostDeploy,
}

impl Service {
    /// Whether the image reference uses the legacy `name-version` scheme.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        !self.version.is_empty()
    }

    /// CPU limit as a count; 0 when unset.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] unless the limit is a plain integer.
    pub fn cpu_count(&self) -> Result<u32> {
        if self.resources.cpu.is_empty() {
            return Ok(0);
        }
        self.resources.cpu.parse().map_err(|_| {
            BraveError::validation(format!(
                "service {:?} has invalid cpu count {:?}",
                self.name, self.resources.cpu
            ))
        })
    }

    /// Checks mandatory fields and the syntax of every optional one.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] describing the first problem.
    pub fn validate_deploy(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BraveError::validation("service name is required"));
        }
        if self.image.trim().is_empty() {
            return Err(BraveError::validation(format!(
                "service {:?} has no image",
                self.name
            )));
        }
        let _cpu = self.cpu_count()?;
        if !self.resources.ram.is_empty() {
            let _ram = parse_bytes(&self.resources.ram)?;
        }
        for rule in &self.ports {
            let _rule = PortRule::parse(rule)?;
        }
        Ok(())
    }

    /// Fills every empty field from `defaults`; flags are OR-ed.
    pub fn merge_defaults(&mut self, defaults: &Self) {
        fill(&mut self.name, &defaults.name);
        fill(&mut self.image, &defaults.image);
        fill(&mut self.version, &defaults.version);
        fill(&mut self.profile, &defaults.profile);
        fill(&mut self.network, &defaults.network);
        fill(&mut self.storage, &defaults.storage);
        fill(&mut self.ip, &defaults.ip);
        fill(&mut self.resources.ram, &defaults.resources.ram);
        fill(&mut self.resources.cpu, &defaults.resources.cpu);
        self.resources.gpu |= defaults.resources.gpu;
        self.docker |= defaults.docker;
        if self.ports.is_empty() {
            self.ports.clone_from(&defaults.ports);
        }
        if self.postdeploy.is_empty() {
            self.postdeploy = defaults.postdeploy.clone();
        }
    }
}

fn fill(target: &mut String, default: &str) {
    if target.is_empty() {
        default.clone_into(target);
    }
}

/// A build and deploy description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bravefile {
    /// Identity of the image produced by the build.
    #[serde(default)]
    pub image: String,
    /// Base image.
    #[serde(default)]
    pub base: BaseImage,
    /// Packages to install.
    #[serde(default)]
    pub system: SystemPackages,
    /// Files to copy.
    #[serde(default)]
    pub copy: Vec<CopyCommand>,
    /// Commands to run.
    #[serde(default)]
    pub run: Vec<RunCommand>,
    /// Deployment parameters.
    #[serde(default)]
    pub service: Service,
}

impl Bravefile {
    /// Loads a Bravefile from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(io_at(path))?;
        let bravefile: Self = serde_yaml::from_str(&content)?;
        tracing::debug!(path = %path.display(), image = %bravefile.image, "loaded Bravefile");
        Ok(bravefile)
    }

    /// A step-less Bravefile that pulls `remote:identity` into the local
    /// image store as `identity`.
    #[must_use]
    pub fn remote_import(remote: &str, identity: &str) -> Self {
        Self {
            image: identity.to_string(),
            base: BaseImage {
                image: format!("{remote}:{identity}"),
                location: BaseLocation::Private,
            },
            service: Service {
                image: identity.to_string(),
                ..Service::default()
            },
            ..Self::default()
        }
    }

    /// Whether the image reference uses the legacy scheme.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.service.is_legacy()
    }

    /// Checks the fields a build needs.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] describing the first problem.
    pub fn validate_build(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(BraveError::validation("Bravefile image is required"));
        }
        if self.base.image.trim().is_empty() {
            return Err(BraveError::validation(format!(
                "Bravefile for {:?} has no base image",
                self.image
            )));
        }
        for copy in &self.copy {
            if copy.source.is_empty() || copy.target.is_empty() {
                return Err(BraveError::validation(format!(
                    "Bravefile for {:?} has a copy step without source or target",
                    self.image
                )));
            }
        }
        Ok(())
    }
}

/// Accepts `yes`/`no`, `true`/`false` or a YAML bool.
fn yes_no<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.to_ascii_lowercase().as_str() {
            "yes" | "true" => Ok(true),
            "no" | "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected yes or no, got {other:?}"
            ))),
        },
    }
}

/// Accepts a YAML string or number and keeps its textual form.
fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Int(u64),
        Float(f64),
        Text(String),
    }
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(f) if f.fract() == 0.0 => format!("{f:.1}"),
        Scalar::Float(f) => f.to_string(),
        Scalar::Text(s) => s,
    })
}
