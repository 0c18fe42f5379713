//! Runtime side of bravekit: the runtime client seam and its adapters, the
//! backend abstraction, remotes, unit records, pre-flight checks, mounts,
//! deployment and image builds, all reached through [`host::BraveHost`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod build;
pub mod checks;
pub mod client;
pub mod deploy;
pub mod host;
pub mod idmap;
pub mod mounts;
pub mod records;
pub mod remote;
pub mod shell;
