//! Ordered build and deploy of a compose file.
//!
//! Services are handled in dependency order. Every image built and unit
//! deployed registers a cleanup that runs if a later step fails; images of
//! base-only services are removed whatever the outcome. A fatal error
//! returns immediately without unwinding.

use std::path::Path;

use bravekit_common::bravefile::{Bravefile, Service};
use bravekit_common::cancel::CancellationToken;
use bravekit_common::constants::LOCAL_REMOTE;
use bravekit_common::error::{BraveError, Result};
use bravekit_common::types::parse_remote_name;
use bravekit_image::identity::ImageIdentity;
use bravekit_runtime::host::BraveHost;

use crate::cleanup::{CleanupAction, CleanupStack, When};
use crate::descriptor::ComposeFile;
use crate::graph::DependencyGraph;

/// Operations a compose run needs from the host.
pub trait ComposeDriver {
    /// Whether the local store holds `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn image_exists(&self, image: &str) -> Result<bool>;

    /// Builds a Bravefile and returns the stored identity.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::ImageExists`] if the image is already stored.
    fn build(&self, bravefile: &Bravefile, context: &Path, token: &CancellationToken) -> Result<String>;

    /// Deploys a unit.
    ///
    /// # Errors
    ///
    /// Returns the deployment failure.
    fn deploy(&self, service: &Service, context: &Path, token: &CancellationToken) -> Result<()>;

    /// Deletes a stored image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be deleted.
    fn delete_image(&self, image: &str) -> Result<()>;

    /// Deletes a unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit cannot be deleted.
    fn delete_unit(&self, name: &str) -> Result<()>;
}

impl ComposeDriver for BraveHost {
    fn image_exists(&self, image: &str) -> Result<bool> {
        let (remote, image) = parse_remote_name(image);
        if remote != LOCAL_REMOTE {
            return Ok(false);
        }
        let (identity, _) = ImageIdentity::parse_any(image)?;
        self.store().contains(&identity)
    }

    fn build(&self, bravefile: &Bravefile, context: &Path, token: &CancellationToken) -> Result<String> {
        self.build_image(bravefile, context, token)
            .map(|identity| identity.to_string())
    }

    fn deploy(&self, service: &Service, context: &Path, token: &CancellationToken) -> Result<()> {
        self.deploy_unit(service, context, token).map(|_| ())
    }

    fn delete_image(&self, image: &str) -> Result<()> {
        Self::delete_image(self, image)
    }

    fn delete_unit(&self, name: &str) -> Result<()> {
        Self::delete_unit(self, name)
    }
}

/// What a compose run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeReport {
    /// Base-only services dropped because nothing needed them.
    pub pruned: Vec<String>,
    /// Images built.
    pub built: Vec<String>,
    /// Services whose image already existed.
    pub skipped: Vec<String>,
    /// Units deployed.
    pub deployed: Vec<String>,
}

/// Service order after pruning, with the names pruned.
///
/// # Errors
///
/// Returns [`BraveError::Validation`] for a cycle or unknown dependency.
pub fn plan<D: ComposeDriver + ?Sized>(
    driver: &D,
    file: &ComposeFile,
) -> Result<(Vec<String>, Vec<String>)> {
    let graph = DependencyGraph::from_compose(file)?;
    let mut order = graph.resolve_order()?;
    let mut pruned = Vec::new();

    for (name, entry) in &file.services {
        if !entry.is_base_only() {
            continue;
        }
        let mut needed = false;
        for dependent in graph.dependents(name) {
            let Some(bravefile) = file.service(&dependent)?.build_step() else {
                continue;
            };
            if !driver.image_exists(&bravefile.image)? {
                needed = true;
                break;
            }
        }
        if !needed {
            tracing::info!(service = %name, "base image not needed, skipping");
            order.retain(|n| n != name);
            pruned.push(name.clone());
        }
    }
    Ok((order, pruned))
}

/// Builds and deploys every service of `file`.
///
/// # Errors
///
/// Returns the first failure after unwinding cleanups, or a fatal error
/// without unwinding.
pub fn run<D: ComposeDriver + ?Sized>(
    driver: &D,
    file: &ComposeFile,
    token: &CancellationToken,
) -> Result<ComposeReport> {
    let (order, pruned) = plan(driver, file)?;
    validate(file, &order)?;

    let mut report = ComposeReport {
        pruned,
        ..ComposeReport::default()
    };
    let mut cleanups = CleanupStack::new();
    let result = walk(driver, file, &order, token, &mut cleanups, &mut report);

    match &result {
        Err(e) if e.is_fatal() => {
            tracing::error!(error = %e, pending = cleanups.len(), "fatal error, leaving artefacts in place");
        }
        Err(e) => {
            tracing::warn!(error = %e, "compose failed, cleaning up");
            let _ = cleanups.unwind(driver, true);
        }
        Ok(()) => {
            let _ = cleanups.unwind(driver, false);
        }
    }
    result.map(|()| report)
}

fn validate(file: &ComposeFile, order: &[String]) -> Result<()> {
    for name in order {
        let entry = file.service(name)?;
        if let Some(bravefile) = entry.build_step() {
            bravefile.validate_build().map_err(|e| {
                BraveError::validation(format!("invalid Bravefile for service {name:?}: {e}"))
            })?;
        }
        if !entry.base {
            entry.service.validate_deploy().map_err(|e| {
                BraveError::validation(format!("service {name:?} cannot be deployed: {e}"))
            })?;
        }
    }
    Ok(())
}

fn walk<D: ComposeDriver + ?Sized>(
    driver: &D,
    file: &ComposeFile,
    order: &[String],
    token: &CancellationToken,
    cleanups: &mut CleanupStack,
    report: &mut ComposeReport,
) -> Result<()> {
    for name in order {
        token.check("compose")?;
        let entry = file.service(name)?;

        if let Some(bravefile) = entry.build_step() {
            let context = file.build_context(entry);
            match driver.build(bravefile, &context, token) {
                Ok(identity) => {
                    tracing::info!(service = %name, image = %identity, "image built");
                    if !entry.is_base_only() {
                        cleanups.push(CleanupAction::DeleteImage(identity.clone()), When::OnFailure);
                    }
                    report.built.push(identity);
                }
                Err(e) if e.is_image_exists() => {
                    tracing::info!(service = %name, image = %bravefile.image, "image already exists, skipping build");
                    report.skipped.push(name.clone());
                }
                Err(e) => return Err(e),
            }
            if entry.is_base_only() {
                cleanups.push(CleanupAction::DeleteImage(bravefile.image.clone()), When::Always);
            }
        }

        if !entry.base {
            let context = file.deploy_context(entry);
            driver.deploy(&entry.service, &context, token)?;
            cleanups.push(CleanupAction::DeleteUnit(entry.service.name.clone()), When::OnFailure);
            report.deployed.push(entry.service.name.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::*;

    /// Driver that records calls and fails on demand.
    #[derive(Default)]
    pub(crate) struct RecordingDriver {
        pub(crate) calls: RefCell<Vec<String>>,
        /// Images the store already holds.
        pub(crate) stored: Vec<String>,
        /// Units whose deployment fails.
        pub(crate) failing_deploys: Vec<String>,
        /// Units whose deployment fails fatally.
        pub(crate) fatal_deploys: Vec<String>,
        pub(crate) failing_cleanups: bool,
    }

    impl RecordingDriver {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }
    }

    impl ComposeDriver for RecordingDriver {
        fn image_exists(&self, image: &str) -> Result<bool> {
            Ok(self.stored.iter().any(|s| s == image))
        }

        fn build(&self, bravefile: &Bravefile, context: &Path, _token: &CancellationToken) -> Result<String> {
            self.record(format!("build {} in {}", bravefile.image, context.display()));
            if self.stored.contains(&bravefile.image) {
                return Err(BraveError::ImageExists {
                    name: bravefile.image.clone(),
                });
            }
            Ok(bravefile.image.clone())
        }

        fn deploy(&self, service: &Service, context: &Path, _token: &CancellationToken) -> Result<()> {
            self.record(format!("deploy {} in {}", service.name, context.display()));
            if self.fatal_deploys.contains(&service.name) {
                return Err(BraveError::MemoryExhausted {
                    requested: "64GB".into(),
                    available: "1GB".into(),
                    remote: "local".into(),
                });
            }
            if self.failing_deploys.contains(&service.name) {
                return Err(BraveError::remote("launch", &service.name, "boom"));
            }
            Ok(())
        }

        fn delete_image(&self, image: &str) -> Result<()> {
            self.record(format!("delete_image {image}"));
            if self.failing_cleanups {
                return Err(BraveError::validation("cleanup failure"));
            }
            Ok(())
        }

        fn delete_unit(&self, name: &str) -> Result<()> {
            self.record(format!("delete_unit {name}"));
            if self.failing_cleanups {
                return Err(BraveError::validation("cleanup failure"));
            }
            Ok(())
        }
    }
}
