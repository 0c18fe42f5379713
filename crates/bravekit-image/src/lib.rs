//! # bravekit-image
//!
//! The local image store for bravekit.
//!
//! Handles:
//! - **Identity**: `name/version/arch` references, the legacy `name-version`
//!   scheme, and `remote:` prefixes.
//! - **Store**: content-addressed archives with detached hash files.
//! - **Archive**: validation of unified image tarballs.
//! - **Hashing**: SHA-256 content verification.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod hash;
pub mod identity;
pub mod store;
