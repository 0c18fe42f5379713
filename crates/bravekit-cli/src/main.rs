//! # brave
//!
//! Builds images, deploys units and manages mounts on LXD hosts, natively
//! or inside a Multipass VM.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use bravekit_common::cancel::{CancellationToken, install_interrupt_handler};
use bravekit_common::error::BraveError;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

/// Exit status for errors that abort without cleanup.
const FATAL_EXIT: i32 = 2;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose, cli.global.log_json);

    let token = CancellationToken::new();
    install_interrupt_handler(&token)?;

    match commands::execute(cli, &token) {
        Err(e) if e.downcast_ref::<BraveError>().is_some_and(BraveError::is_fatal) => {
            tracing::error!(error = %format!("{e:#}"), "fatal error, aborting without cleanup");
            std::process::exit(FATAL_EXIT);
        }
        other => other,
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
