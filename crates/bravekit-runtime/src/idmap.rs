//! User id mapping for host shares.
//!
//! Servers newer than 3.0.3 accept a `raw.idmap` directive that maps the
//! invoking user into the unit so host shares stay writable. Older servers
//! get no mapping and shares are read-only inside the unit.

use std::cmp::Ordering;
use std::fmt;

use bravekit_common::error::{BraveError, Result};

/// Newest server version that does not support `raw.idmap`.
pub const IDMAP_THRESHOLD: ServerVersion = ServerVersion {
    major: 3,
    minor: 0,
    patch: 3,
};

/// A `major.minor[.patch]` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component, zero when absent.
    pub patch: u32,
}

impl ServerVersion {
    /// Parses `5.0.2`, `4.0` or `5.21.1 LTS`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] if the version is not numeric.
    pub fn parse(version: &str) -> Result<Self> {
        let invalid = || BraveError::validation(format!("invalid server version {version:?}"));
        let core = version.split_whitespace().next().ok_or_else(invalid)?;
        let mut parts = core.split('.').map(|p| p.parse::<u32>().map_err(|_| invalid()));
        let major = parts.next().ok_or_else(invalid)??;
        let minor = parts.next().ok_or_else(invalid)??;
        let patch = parts.next().transpose()?.unwrap_or(0);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }

    /// Whether the server accepts `raw.idmap`.
    #[must_use]
    pub fn supports_idmap(&self) -> bool {
        self.cmp(&IDMAP_THRESHOLD) == Ordering::Greater
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Numeric user and group ids of the invoking user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIds {
    /// User id.
    pub uid: String,
    /// Group id.
    pub gid: String,
}

impl UserIds {
    /// The `raw.idmap` value mapping these ids.
    #[must_use]
    pub fn directive(&self) -> String {
        format!("both {} {}", self.uid, self.gid)
    }
}

/// Reduces a Windows security identifier to its final `-` segment.
#[must_use]
pub fn last_id_segment(id: &str) -> &str {
    id.rsplit('-').next().unwrap_or(id)
}

/// Ids of the current user.
///
/// # Errors
///
/// Returns an error if the ids cannot be determined on this platform.
#[cfg(unix)]
pub fn current_user_ids() -> Result<UserIds> {
    Ok(UserIds {
        uid: nix::unistd::getuid().as_raw().to_string(),
        gid: nix::unistd::getgid().as_raw().to_string(),
    })
}

/// Ids of the current user.
///
/// On Windows the user SID is read from `whoami /user` and, like the group,
/// reduced to its relative identifier.
///
/// # Errors
///
/// Returns an error if the ids cannot be determined on this platform.
#[cfg(not(unix))]
pub fn current_user_ids() -> Result<UserIds> {
    use crate::shell::{Shell, SystemShell, args};

    let out = SystemShell.run("whoami", &args(&["/user", "/fo", "csv", "/nh"]))?;
    let sid = out
        .trim()
        .rsplit(',')
        .next()
        .map(|s| s.trim_matches('"'))
        .filter(|s| s.starts_with("S-"))
        .ok_or_else(|| BraveError::Command {
            command: "whoami /user".into(),
            message: "no SID in output".into(),
        })?;
    let id = last_id_segment(sid).to_string();
    Ok(UserIds {
        uid: id.clone(),
        gid: id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_parse_with_optional_patch() {
        assert_eq!(
            ServerVersion::parse("5.0.2").expect("parse"),
            ServerVersion {
                major: 5,
                minor: 0,
                patch: 2
            }
        );
        assert_eq!(ServerVersion::parse("4.0").expect("parse").patch, 0);
        assert_eq!(ServerVersion::parse("5.21.1 LTS").expect("parse").minor, 21);
    }

    #[test]
    fn malformed_versions_are_rejected() {
        for bad in ["", "five", "5", "5.x", "1.2.3.4"] {
            assert!(ServerVersion::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn idmap_gate_is_strictly_above_3_0_3() {
        let supports = |v: &str| ServerVersion::parse(v).expect("parse").supports_idmap();
        assert!(!supports("3.0.3"));
        assert!(!supports("2.21"));
        assert!(supports("3.0.4"));
        assert!(supports("3.1"));
        assert!(supports("5.0.2"));
    }

    #[test]
    fn sid_is_reduced_to_last_segment() {
        assert_eq!(
            last_id_segment("S-1-5-21-3623811015-3361044348-30300820-1013"),
            "1013"
        );
        assert_eq!(last_id_segment("1000"), "1000");
    }

    #[test]
    fn directive_maps_both() {
        let ids = UserIds {
            uid: "1000".into(),
            gid: "1001".into(),
        };
        assert_eq!(ids.directive(), "both 1000 1001");
    }

    #[cfg(unix)]
    #[test]
    fn current_ids_are_numeric() {
        let ids = current_user_ids().expect("ids");
        assert!(ids.uid.parse::<u32>().is_ok());
        assert!(ids.gid.parse::<u32>().is_ok());
    }
}
