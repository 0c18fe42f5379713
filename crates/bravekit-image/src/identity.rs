//! Image identity: textual forms, filenames, and remote prefixes.
//!
//! Two naming schemes coexist in image stores:
//!
//! | Scheme  | Text                   | Filename                     |
//! |---------|------------------------|------------------------------|
//! | current | `name[/version[/arch]]`| `name_version_arch.tar.gz`   |
//! | legacy  | `name-version`         | `name-version.tar.gz`        |
//!
//! Both parse into [`ImageIdentity`]; the canonical text is always the
//! current form.

use std::fmt;

use bravekit_common::constants::ARCHIVE_EXTENSION;
use bravekit_common::error::{BraveError, Result};

/// Naming scheme an identity was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// `name/version/arch` and `name_version_arch.tar.gz`.
    Current,
    /// `name-version` and `name-version.tar.gz`.
    Legacy,
}

/// Name, version and architecture of an image. Empty fields are unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIdentity {
    /// Image name.
    pub name: String,
    /// Version, empty when unspecified.
    pub version: String,
    /// Architecture, empty when unspecified.
    pub architecture: String,
}

impl ImageIdentity {
    /// Builds an identity from its parts.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            architecture: architecture.into(),
        }
    }

    /// Parses the current textual form `name[/version[/arch]]`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] for empty names, extra segments,
    /// or characters that cannot appear in a filename.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let mut parts = input.split('/');
        let name = parts.next().unwrap_or_default();
        let version = parts.next().unwrap_or_default();
        let architecture = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return Err(BraveError::validation(format!(
                "image {input:?} has too many segments, expected name/version/arch"
            )));
        }
        let identity = Self::new(name, version, architecture);
        identity.validate()?;
        Ok(identity)
    }

    /// Parses the legacy textual form `name-version`.
    ///
    /// The version is the part after the last `-` when it starts with a
    /// digit; otherwise the whole input is the name.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] for an empty name.
    pub fn parse_legacy(input: &str) -> Result<Self> {
        let input = input.trim();
        let (name, version) = match input.rsplit_once('-') {
            Some((name, version))
                if !name.is_empty() && version.starts_with(|c: char| c.is_ascii_digit()) =>
            {
                (name, version)
            }
            _ => (input, ""),
        };
        let identity = Self::new(name, version, "");
        identity.validate()?;
        Ok(identity)
    }

    /// Parses either scheme: text containing `/` or no `-` is current,
    /// anything else is tried as legacy.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] if neither scheme accepts the input.
    pub fn parse_any(input: &str) -> Result<(Self, Scheme)> {
        if input.contains('/') || !input.contains('-') {
            return Self::parse(input).map(|id| (id, Scheme::Current));
        }
        Self::parse_legacy(input).map(|id| (id, Scheme::Legacy))
    }

    /// Derives an identity from an archive filename in either scheme.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] if the name does not end in
    /// `.tar.gz` or has no name part.
    pub fn from_filename(file_name: &str) -> Result<(Self, Scheme)> {
        let Some(stem) = file_name.strip_suffix(ARCHIVE_EXTENSION) else {
            return Err(BraveError::validation(format!(
                "{file_name:?} is not an image archive, expected a {ARCHIVE_EXTENSION} file"
            )));
        };
        let mut parts = stem.splitn(3, '_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(version), Some(architecture)) => {
                let identity = Self::new(name, version, architecture);
                identity.validate()?;
                Ok((identity, Scheme::Current))
            }
            _ => Self::parse_legacy(stem).map(|id| (id, Scheme::Legacy)),
        }
    }

    /// The current-scheme archive basename `name_version_arch`.
    #[must_use]
    pub fn to_basename(&self) -> String {
        format!("{}_{}_{}", self.name, self.version, self.architecture)
    }

    /// The current-scheme archive filename.
    #[must_use]
    pub fn to_filename(&self) -> String {
        format!("{}{ARCHIVE_EXTENSION}", self.to_basename())
    }

    /// Whether version and architecture are both set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.version.is_empty() && !self.architecture.is_empty()
    }

    /// Fills unspecified version and architecture.
    #[must_use]
    pub fn with_defaults(mut self, version: &str, architecture: &str) -> Self {
        if self.version.is_empty() {
            self.version = version.to_string();
        }
        if self.architecture.is_empty() {
            self.architecture = architecture.to_string();
        }
        self
    }

    /// Whether `self`, read as a query, accepts `candidate`.
    ///
    /// Unspecified query fields match anything; a candidate without an
    /// architecture (legacy archives) matches any architecture.
    #[must_use]
    pub fn matches(&self, candidate: &Self) -> bool {
        self.name == candidate.name
            && (self.version.is_empty() || self.version == candidate.version)
            && (self.architecture.is_empty()
                || candidate.architecture.is_empty()
                || self.architecture == candidate.architecture)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BraveError::validation("image name must not be empty"));
        }
        for (field, value) in [("name", &self.name), ("version", &self.version)] {
            if value.contains(|c: char| c == '_' || c == ':' || c.is_whitespace()) {
                return Err(BraveError::validation(format!(
                    "image {field} {value:?} must not contain '_', ':' or whitespace"
                )));
            }
        }
        if self
            .architecture
            .contains(|c: char| c == ':' || c == '/' || c.is_whitespace())
        {
            return Err(BraveError::validation(format!(
                "image architecture {:?} is invalid",
                self.architecture
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.version.is_empty() || !self.architecture.is_empty() {
            write!(f, "/{}", self.version)?;
        }
        if !self.architecture.is_empty() {
            write!(f, "/{}", self.architecture)?;
        }
        Ok(())
    }
}

/// An image reference with an optional source remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Remote to pull from; `None` means the local image store.
    pub remote: Option<String>,
    /// Image identity.
    pub identity: ImageIdentity,
    /// Scheme the identity was written in.
    pub scheme: Scheme,
}

impl ImageRef {
    /// Parses `[remote:]identity` in either scheme.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] if the identity is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let (remote, rest) = match input.split_once(':') {
            Some((remote, rest)) if !remote.is_empty() => (Some(remote.to_string()), rest),
            Some((_, rest)) => (None, rest),
            None => (None, input),
        };
        let (identity, scheme) = ImageIdentity::parse_any(rest)?;
        Ok(Self {
            remote,
            identity,
            scheme,
        })
    }

    /// Whether the image comes from a remote rather than the local store.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(remote) = &self.remote {
            write!(f, "{remote}:")?;
        }
        write!(f, "{}", self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_current_form() {
        let id = ImageIdentity::parse("alpine/1.0/amd64").expect("parse");
        assert_eq!(id, ImageIdentity::new("alpine", "1.0", "amd64"));
        assert!(id.is_complete());
        assert_eq!(id.to_filename(), "alpine_1.0_amd64.tar.gz");
    }

    #[test]
    fn parse_partial_current_forms() {
        assert_eq!(
            ImageIdentity::parse("alpine").expect("parse"),
            ImageIdentity::new("alpine", "", "")
        );
        assert_eq!(
            ImageIdentity::parse("alpine/2.1").expect("parse"),
            ImageIdentity::new("alpine", "2.1", "")
        );
    }

    #[test]
    fn canonical_text_is_stable() {
        for text in ["alpine", "alpine/1.0", "alpine/1.0/amd64", "alpine//arm64"] {
            let id = ImageIdentity::parse(text).expect("parse");
            assert_eq!(id.to_string(), text);
            assert_eq!(ImageIdentity::parse(&id.to_string()).expect("reparse"), id);
        }
    }

    #[test]
    fn reject_malformed_current_forms() {
        assert!(ImageIdentity::parse("").is_err());
        assert!(ImageIdentity::parse("a/b/c/d").is_err());
        assert!(ImageIdentity::parse("my_image/1.0").is_err());
        assert!(ImageIdentity::parse("/1.0").is_err());
    }

    #[test]
    fn legacy_splits_on_last_dash_before_digit() {
        let id = ImageIdentity::parse_legacy("brave-base-alpine-edge-1.0").expect("parse");
        assert_eq!(id.name, "brave-base-alpine-edge");
        assert_eq!(id.version, "1.0");
        assert!(id.architecture.is_empty());

        let id = ImageIdentity::parse_legacy("alpine-edge").expect("parse");
        assert_eq!(id.name, "alpine-edge");
        assert!(id.version.is_empty());
    }

    #[test]
    fn legacy_reserializes_to_current_form() {
        let id = ImageIdentity::parse_legacy("nginx-1.2").expect("parse");
        let canonical = id.to_string();
        assert_eq!(canonical, "nginx/1.2");
        assert_eq!(ImageIdentity::parse(&canonical).expect("reparse"), id);
    }

    #[test]
    fn parse_any_picks_scheme() {
        assert_eq!(
            ImageIdentity::parse_any("alpine/1.0").expect("parse").1,
            Scheme::Current
        );
        assert_eq!(
            ImageIdentity::parse_any("alpine-1.0").expect("parse").1,
            Scheme::Legacy
        );
        assert_eq!(
            ImageIdentity::parse_any("alpine").expect("parse").1,
            Scheme::Current
        );
    }

    #[test]
    fn filename_in_both_schemes() {
        let (id, scheme) = ImageIdentity::from_filename("web_1.0_x86_64.tar.gz").expect("parse");
        assert_eq!(scheme, Scheme::Current);
        assert_eq!(id, ImageIdentity::new("web", "1.0", "x86_64"));

        let (id, scheme) = ImageIdentity::from_filename("web-server-2.0.tar.gz").expect("parse");
        assert_eq!(scheme, Scheme::Legacy);
        assert_eq!(id, ImageIdentity::new("web-server", "2.0", ""));

        assert!(ImageIdentity::from_filename("web.zip").is_err());
    }

    #[test]
    fn defaults_fill_only_missing_fields() {
        let id = ImageIdentity::new("web", "", "").with_defaults("1.0", "amd64");
        assert_eq!(id, ImageIdentity::new("web", "1.0", "amd64"));
        let id = ImageIdentity::new("web", "2.0", "arm64").with_defaults("1.0", "amd64");
        assert_eq!(id, ImageIdentity::new("web", "2.0", "arm64"));
    }

    #[test]
    fn query_matching() {
        let query = ImageIdentity::new("web", "", "");
        assert!(query.matches(&ImageIdentity::new("web", "1.0", "amd64")));
        assert!(!query.matches(&ImageIdentity::new("webby", "1.0", "amd64")));

        let query = ImageIdentity::new("web", "1.0", "amd64");
        assert!(query.matches(&ImageIdentity::new("web", "1.0", "")));
        assert!(!query.matches(&ImageIdentity::new("web", "1.0", "arm64")));
        assert!(!query.matches(&ImageIdentity::new("web", "2.0", "amd64")));
    }

    #[test]
    fn image_ref_with_and_without_remote() {
        let local = ImageRef::parse("alpine/1.0").expect("parse");
        assert!(!local.is_remote());
        assert_eq!(local.to_string(), "alpine/1.0");

        let remote = ImageRef::parse("prod:alpine/1.0/amd64").expect("parse");
        assert_eq!(remote.remote.as_deref(), Some("prod"));
        assert_eq!(remote.identity, ImageIdentity::new("alpine", "1.0", "amd64"));
        assert_eq!(remote.to_string(), "prod:alpine/1.0/amd64");

        let legacy = ImageRef::parse("prod:nginx-1.2").expect("parse");
        assert_eq!(legacy.scheme, Scheme::Legacy);
    }
}
