//! # bravekit-compose
//!
//! Multi-service deployment from a compose descriptor.
//!
//! Handles:
//! - **Descriptor**: loading the YAML descriptor and the Bravefiles it names.
//! - **Graph**: dependency graph construction and topological resolution.
//! - **Orchestrator**: pruning, ordered build and deploy.
//! - **Cleanup**: last-in first-out unwinding of what a failed run created.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cleanup;
pub mod descriptor;
pub mod graph;
pub mod orchestrator;
