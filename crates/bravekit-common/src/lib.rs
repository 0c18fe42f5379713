//! # bravekit-common
//!
//! Shared types, error definitions, settings, and constants used across the
//! entire bravekit workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the primitives the image store, runtime, and
//! compose crates build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bravefile;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod error;
pub mod types;
pub mod units;
