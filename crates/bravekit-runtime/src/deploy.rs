//! Unit deployment.
//!
//! A deployment walks the [`DeployStage`]s in order. Every runtime call from
//! [`DeployStage::Launch`] on is settled against the cancellation token, and
//! a failure in that window deletes the half-built instance. A runtime-cached
//! image imported for the deployment is deleted in every outcome.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bravekit_common::bravefile::{Bravefile, Service};
use bravekit_common::cancel::CancellationToken;
use bravekit_common::constants::{LOCAL_REMOTE, UNIT_NIC};
use bravekit_common::error::{BraveError, Result};
use bravekit_common::types::{PortRule, UnitData, parse_remote_name};
use bravekit_image::identity::ImageIdentity;

use crate::checks::{check_memory, check_ports, check_storage};
use crate::client::{ImageSource, LaunchRequest, RuntimeClient, device};
use crate::host::{BraveHost, CachedImageGuard};
use crate::idmap::{ServerVersion, current_user_ids};
use crate::records::UnitRecord;
use crate::remote::Remote;

/// Steps of a deployment, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeployStage {
    /// Validate the service and parse its image reference.
    ParseParams,
    /// Split remote prefixes and load the deploy remote.
    ResolveRemotes,
    /// Pull a remote image into the local store.
    EnsureBaseImageLocal,
    /// Start the backend for local deployments.
    EnsureBackendRunning,
    /// Refuse to replace an existing instance.
    ValidateNameUnique,
    /// Find and verify the image archive.
    ResolveImageArchive,
    /// Storage, memory and port checks.
    PreflightChecks,
    /// Load the archive into the runtime's image cache.
    ImportImageIfAbsent,
    /// Create and start the instance.
    Launch,
    /// Attach the bridge NIC.
    AttachNetwork,
    /// Pin the NIC's IPv4 address.
    AssignStaticIp,
    /// Restart so the network settings apply.
    Bounce1,
    /// Pass a GPU through.
    AttachGpu,
    /// Apply limits, id mapping and feature flags.
    ApplyResourceConfig,
    /// Restart so the limits apply.
    Bounce2,
    /// Add one proxy device per port rule.
    AddPortRules,
    /// Copy files in and run commands.
    PostDeployHook,
    /// Write the unit record.
    PersistRecord,
    /// Finished.
    Done,
}

impl DeployStage {
    /// Stable name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseParams => "parse_params",
            Self::ResolveRemotes => "resolve_remotes",
            Self::EnsureBaseImageLocal => "ensure_base_image_local",
            Self::EnsureBackendRunning => "ensure_backend_running",
            Self::ValidateNameUnique => "validate_name_unique",
            Self::ResolveImageArchive => "resolve_image_archive",
            Self::PreflightChecks => "preflight_checks",
            Self::ImportImageIfAbsent => "import_image_if_absent",
            Self::Launch => "launch",
            Self::AttachNetwork => "attach_network",
            Self::AssignStaticIp => "assign_static_ip",
            Self::Bounce1 => "bounce_1",
            Self::AttachGpu => "attach_gpu",
            Self::ApplyResourceConfig => "apply_resource_config",
            Self::Bounce2 => "bounce_2",
            Self::AddPortRules => "add_port_rules",
            Self::PostDeployHook => "post_deploy_hook",
            Self::PersistRecord => "persist_record",
            Self::Done => "done",
        }
    }

    /// Whether a failure at this stage leaves an instance to delete.
    #[must_use]
    pub fn needs_rollback(self) -> bool {
        self >= Self::Launch && self < Self::PersistRecord
    }
}

impl std::fmt::Display for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deploy target with profile, network and storage resolved.
struct Target {
    remote: Remote,
    unit: String,
    profile: String,
    network: String,
    storage: String,
}

/// State carried across stages of one deployment.
struct Deployment<'a> {
    host: &'a BraveHost,
    token: &'a CancellationToken,
    stage: DeployStage,
    unit: String,
    client: Option<Arc<dyn RuntimeClient>>,
    cached_image: Option<CachedImageGuard>,
}

impl<'a> Deployment<'a> {
    fn new(host: &'a BraveHost, token: &'a CancellationToken, unit: &str) -> Self {
        Self {
            host,
            token,
            stage: DeployStage::ParseParams,
            unit: unit.to_string(),
            client: None,
            cached_image: None,
        }
    }

    fn enter(&mut self, stage: DeployStage) -> Result<()> {
        self.stage = stage;
        tracing::debug!(unit = %self.unit, stage = %stage, "deploy stage");
        if stage < DeployStage::PersistRecord {
            self.token.check(stage.as_str())?;
        }
        Ok(())
    }

    fn settle<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        self.token.settle(operation, result)
    }

    fn execute(&mut self, service: &Service, context: &Path) -> Result<UnitData> {
        self.enter(DeployStage::ParseParams)?;
        service.validate_deploy()?;
        let (image_remote, image_text) = parse_remote_name(&service.image);
        let mut identity = if service.is_legacy() {
            let mut identity = ImageIdentity::parse_legacy(image_text)?;
            if identity.version.is_empty() {
                identity.version.clone_from(&service.version);
            }
            identity
        } else {
            ImageIdentity::parse(image_text)?
        };
        let rules = service
            .ports
            .iter()
            .map(|rule| PortRule::parse(rule))
            .collect::<Result<Vec<_>>>()?;
        let cpu = service.cpu_count()?;

        self.enter(DeployStage::ResolveRemotes)?;
        let target = self.resolve_target(service)?;
        self.unit.clone_from(&target.unit);

        self.enter(DeployStage::EnsureBaseImageLocal)?;
        if image_remote == LOCAL_REMOTE {
            self.host.ensure_backend(LOCAL_REMOTE)?;
        } else {
            let import = Bravefile::remote_import(image_remote, &identity.to_string());
            match self.host.build_image(&import, context, self.token) {
                Ok(built) => tracing::info!(image = %built, remote = %image_remote, "remote image pulled"),
                Err(e) if e.is_image_exists() => {
                    tracing::info!(image = %identity, "image already exists locally, skipping remote import");
                }
                Err(e) => return Err(e),
            }
        }

        self.enter(DeployStage::EnsureBackendRunning)?;
        self.host.ensure_backend(&target.remote.name)?;
        let client = self.host.connector.connect(&target.remote)?;
        self.client = Some(Arc::clone(&client));

        self.enter(DeployStage::ValidateNameUnique)?;
        if client.instance(&target.unit)?.is_some() {
            return Err(BraveError::AlreadyExists {
                kind: "unit",
                id: format!("{}:{}", target.remote.name, target.unit),
            });
        }

        self.enter(DeployStage::ResolveImageArchive)?;
        let architecture = client.server_info()?.architecture()?.to_string();
        identity = identity.with_defaults("", &architecture);
        let archive = self.host.store.resolve(&identity)?;
        let size = self.host.store.size(&identity)?;
        let fingerprint = self.host.store.verify(&archive)?;

        self.enter(DeployStage::PreflightChecks)?;
        if !target.storage.is_empty() {
            check_storage(client.as_ref(), &target.storage, size)?;
        }
        if !service.resources.ram.is_empty() {
            check_memory(client.as_ref(), &service.resources.ram, &target.remote.name)?;
        }
        check_ports(&target.remote, &rules)?;

        self.enter(DeployStage::ImportImageIfAbsent)?;
        let source = if client.image_exists(&fingerprint)? {
            ImageSource::Cached(fingerprint)
        } else {
            let imported = client.import_image(&archive, &target.unit)?;
            self.cached_image = Some(CachedImageGuard::new(Arc::clone(&client), imported));
            self.token.check("import image")?;
            ImageSource::Cached(target.unit.clone())
        };

        self.enter(DeployStage::Launch)?;
        let request = LaunchRequest {
            name: target.unit.clone(),
            source,
            profile: target.profile.clone(),
            storage: target.storage.clone(),
        };
        self.settle("launch", client.launch(&request))?;
        tracing::info!(unit = %target.unit, remote = %target.remote.name, image = %identity, "unit launched");

        self.configure(client.as_ref(), service, &target, &rules, context)?;

        Ok(UnitData {
            cpu,
            ram: service.resources.ram.clone(),
            ip: service.ip.clone(),
            image: identity.to_string(),
        })
    }

    fn resolve_target(&self, service: &Service) -> Result<Target> {
        let (remote_name, unit) = parse_remote_name(&service.name);
        let remote = self.host.remote(remote_name)?;
        let pick = |own: &str, fallback: &str| {
            if own.is_empty() { fallback.to_string() } else { own.to_string() }
        };
        let mut profile = pick(&service.profile, &remote.profile);
        let mut network = pick(&service.network, &remote.network);
        let mut storage = pick(&service.storage, &remote.storage);
        if profile.is_empty() && network.is_empty() && storage.is_empty() {
            let settings = &self.host.settings;
            profile.clone_from(&settings.profile);
            network.clone_from(&settings.network.name);
            storage.clone_from(&settings.storage_pool.name);
        }
        Ok(Target {
            remote,
            unit: unit.to_string(),
            profile,
            network,
            storage,
        })
    }

    fn configure(
        &mut self,
        client: &dyn RuntimeClient,
        service: &Service,
        target: &Target,
        rules: &[PortRule],
        context: &Path,
    ) -> Result<()> {
        let unit = target.unit.as_str();

        self.enter(DeployStage::AttachNetwork)?;
        let mut nic = device(&[
            ("type", "nic"),
            ("nictype", "bridged"),
            ("parent", &target.network),
            ("name", UNIT_NIC),
        ]);
        if target.network.is_empty() {
            tracing::debug!(unit = %unit, "no network given, keeping profile NIC");
        } else {
            self.settle("attach network", client.add_device(unit, UNIT_NIC, &nic))?;
        }

        if !service.ip.is_empty() {
            self.enter(DeployStage::AssignStaticIp)?;
            let _ = nic.insert("ipv4.address".into(), service.ip.clone());
            let assigned = client.add_device(unit, UNIT_NIC, &nic);
            if let Err(e) = self.settle("assign static ip", assigned) {
                return Err(self.with_bridge_hint(client, unit, e));
            }
        }

        self.enter(DeployStage::Bounce1)?;
        self.bounce(client, unit)?;

        if service.resources.gpu {
            self.enter(DeployStage::AttachGpu)?;
            self.settle("attach gpu", client.add_device(unit, "gpu", &device(&[("type", "gpu")])))?;
        }

        self.enter(DeployStage::ApplyResourceConfig)?;
        let config = resource_config(client, service)?;
        self.settle("apply config", client.set_config(unit, &config))?;

        self.enter(DeployStage::Bounce2)?;
        self.bounce(client, unit)?;

        for rule in rules {
            self.enter(DeployStage::AddPortRules)?;
            let proxy = device(&[
                ("type", "proxy"),
                ("listen", &format!("tcp:0.0.0.0:{}", rule.host_port)),
                ("connect", &format!("tcp:127.0.0.1:{}", rule.unit_port)),
            ]);
            self.settle("add port rule", client.add_device(unit, &rule.device_name(), &proxy))?;
            tracing::debug!(unit = %unit, rule = %rule, "port rule added");
        }

        self.enter(DeployStage::PostDeployHook)?;
        for copy in &service.postdeploy.copy {
            let source = context.join(&copy.source);
            self.settle("copy file", client.push_file(unit, &source, &copy.target))?;
            if !copy.action.is_empty() {
                let argv = vec!["sh".to_string(), "-c".to_string(), copy.action.clone()];
                let output = client.exec(unit, &argv).and_then(|out| out.check(&argv));
                let _ = self.settle("run copy action", output)?;
            }
        }
        for run in &service.postdeploy.run {
            let argv = run.argv();
            let output = client.exec(unit, &argv).and_then(|out| out.check(&argv));
            let _ = self.settle("run command", output)?;
        }
        Ok(())
    }

    fn bounce(&self, client: &dyn RuntimeClient, unit: &str) -> Result<()> {
        self.settle("stop", client.stop(unit))?;
        self.settle("start", client.start(unit))
    }

    fn with_bridge_hint(&self, client: &dyn RuntimeClient, unit: &str, err: BraveError) -> BraveError {
        if err.is_cancelled() {
            return err;
        }
        let network = &self.host.settings.network.name;
        match client.network_address(network) {
            Ok(Some(address)) => BraveError::remote(
                "assign static ip",
                unit,
                format!("{err}; bridge {network} is available at {address}"),
            ),
            _ => err,
        }
    }

    fn rollback(&self, err: &BraveError) {
        if !self.stage.needs_rollback() || err.is_fatal() {
            return;
        }
        let Some(client) = &self.client else {
            return;
        };
        tracing::warn!(unit = %self.unit, stage = %self.stage, "deployment failed, deleting unit");
        if let Err(e) = client.delete_instance(&self.unit) {
            tracing::warn!(unit = %self.unit, error = %e, "rollback failed to delete unit");
        }
    }
}

/// Configuration payload for limits, id mapping and feature flags.
fn resource_config(client: &dyn RuntimeClient, service: &Service) -> Result<BTreeMap<String, String>> {
    let flag = |on: bool| if on { "true" } else { "false" }.to_string();
    let mut config = BTreeMap::new();
    if !service.resources.cpu.is_empty() {
        let _ = config.insert("limits.cpu".to_string(), service.resources.cpu.clone());
    }
    if !service.resources.ram.is_empty() {
        let _ = config.insert("limits.memory".to_string(), service.resources.ram.clone());
    }
    let _ = config.insert("security.nesting".to_string(), flag(service.docker));
    let _ = config.insert("nvidia.runtime".to_string(), flag(service.resources.gpu));

    let version = ServerVersion::parse(&client.server_info()?.version)?;
    if version.supports_idmap() {
        let _ = config.insert("raw.idmap".to_string(), current_user_ids()?.directive());
    } else {
        tracing::warn!(version = %version, "server too old for id mapping, shares will be read-only");
    }
    Ok(config)
}

impl BraveHost {
    /// Deploys `service`, resolving post-deploy copy sources against `context`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Deploy`] naming the unit and the failed stage.
    /// The instance is deleted for failures from launch through the
    /// post-deploy hook, except for fatal errors. A record that cannot be
    /// written surfaces as [`BraveError::RecordNotPersisted`] and leaves the
    /// unit running.
    pub fn deploy_unit(
        &self,
        service: &Service,
        context: &Path,
        token: &CancellationToken,
    ) -> Result<UnitRecord> {
        tracing::info!(unit = %service.name, image = %service.image, "deploying unit");
        let mut run = Deployment::new(self, token, &service.name);

        let outcome = run.execute(service, context).and_then(|data| {
            run.enter(DeployStage::PersistRecord)?;
            let record = UnitRecord::new(&run.unit, data);
            self.records
                .insert(&record)
                .map_err(|e| BraveError::RecordNotPersisted {
                    unit: run.unit.clone(),
                    message: e.to_string(),
                })?;
            Ok(record)
        });

        match outcome {
            Ok(record) => {
                run.stage = DeployStage::Done;
                tracing::info!(unit = %record.name, uid = %record.uid, "unit deployed");
                Ok(record)
            }
            Err(err) => {
                run.rollback(&err);
                Err(BraveError::Deploy {
                    unit: service.name.clone(),
                    stage: run.stage.as_str(),
                    source: Box::new(err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(DeployStage::ParseParams < DeployStage::Launch);
        assert!(DeployStage::AttachGpu < DeployStage::ApplyResourceConfig);
        assert!(DeployStage::Bounce2 < DeployStage::AddPortRules);
        assert!(DeployStage::PersistRecord < DeployStage::Done);
    }

    #[test]
    fn rollback_window_is_launch_through_hook() {
        assert!(!DeployStage::ImportImageIfAbsent.needs_rollback());
        assert!(DeployStage::Launch.needs_rollback());
        assert!(DeployStage::PostDeployHook.needs_rollback());
        assert!(!DeployStage::PersistRecord.needs_rollback());
    }

    #[test]
    fn resource_config_folds_flags_and_idmap() {
        let client = crate::client::memory::MemoryClient::new();
        let mut service = Service::default();
        service.resources.cpu = "2".into();
        service.resources.ram = "1GB".into();
        service.resources.gpu = true;
        service.docker = true;
        let config = resource_config(&client, &service).expect("config");
        assert_eq!(config["limits.cpu"], "2");
        assert_eq!(config["security.nesting"], "true");
        assert_eq!(config["nvidia.runtime"], "true");
        assert!(config["raw.idmap"].starts_with("both "));
    }

    #[test]
    fn old_servers_get_no_idmap() {
        let client = crate::client::memory::MemoryClient::new().with_server("3.0.3", "x86_64");
        let config = resource_config(&client, &Service::default()).expect("config");
        assert!(!config.contains_key("raw.idmap"));
        assert_eq!(config["security.nesting"], "false");
        assert!(!config.contains_key("limits.cpu"));
    }
}
