//! [`RuntimeClient`] backed by the `lxc` command-line client.
//!
//! Reads go through `lxc query` against the REST API so responses are JSON;
//! mutations use the regular subcommands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bravekit_common::constants::UNIT_NIC;
use bravekit_common::error::{BraveError, Result};
use serde_json::Value;

use super::{
    Capacity, Connector, Device, ExecOutput, ImageSource, Instance, LaunchRequest, RuntimeClient,
    ServerInfo, Volume,
};
use crate::remote::Remote;
use crate::shell::{Shell, args};

const LXC: &str = "lxc";

/// Client for one remote, addressed by its `lxc` remote name.
pub struct LxcClient {
    remote: String,
    shell: Arc<dyn Shell>,
}

impl LxcClient {
    /// Creates a client for the `lxc` remote `remote`.
    #[must_use]
    pub fn new(remote: impl Into<String>, shell: Arc<dyn Shell>) -> Self {
        Self {
            remote: remote.into(),
            shell,
        }
    }

    fn target(&self, name: &str) -> String {
        format!("{}:{name}", self.remote)
    }

    fn lxc(&self, operation: &'static str, subject: &str, argv: Vec<String>) -> Result<String> {
        self.shell
            .run(LXC, &argv)
            .map_err(|e| BraveError::remote(operation, subject, command_message(&e)))
    }

    /// `GET` an API path; `None` on 404.
    fn get(&self, operation: &'static str, subject: &str, path: &str) -> Result<Option<Value>> {
        let argv = args(&["query", "--wait", &format!("{}:{path}", self.remote)]);
        match self.shell.run(LXC, &argv) {
            Ok(out) => Ok(Some(serde_json::from_str(&out)?)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(BraveError::remote(operation, subject, command_message(&e))),
        }
    }

    fn require(&self, operation: &'static str, subject: &str, path: &str) -> Result<Value> {
        self.get(operation, subject, path)?
            .ok_or_else(|| BraveError::remote(operation, subject, "not found"))
    }
}

impl RuntimeClient for LxcClient {
    fn server_info(&self) -> Result<ServerInfo> {
        let body = self.require("query server", &self.remote, "/1.0")?;
        let env = &body["environment"];
        Ok(ServerInfo {
            version: env["server_version"].as_str().unwrap_or_default().to_string(),
            architectures: string_list(&env["architectures"]),
        })
    }

    fn memory(&self) -> Result<Capacity> {
        let body = self.require("query resources", &self.remote, "/1.0/resources")?;
        Ok(Capacity {
            total: body["memory"]["total"].as_u64().unwrap_or_default(),
            used: body["memory"]["used"].as_u64().unwrap_or_default(),
        })
    }

    fn storage_pool(&self, pool: &str) -> Result<Capacity> {
        let body = self.require(
            "query storage pool",
            pool,
            &format!("/1.0/storage-pools/{pool}/resources"),
        )?;
        Ok(Capacity {
            total: body["space"]["total"].as_u64().unwrap_or_default(),
            used: body["space"]["used"].as_u64().unwrap_or_default(),
        })
    }

    fn instance(&self, name: &str) -> Result<Option<Instance>> {
        let Some(body) = self.get("get instance", name, &format!("/1.0/instances/{name}"))? else {
            return Ok(None);
        };
        let mut instance = parse_instance(&body);
        if let Some(state) =
            self.get("get instance state", name, &format!("/1.0/instances/{name}/state"))?
        {
            instance.addresses = parse_addresses(&state);
        }
        Ok(Some(instance))
    }

    fn instances(&self, profile: Option<&str>) -> Result<Vec<Instance>> {
        let body = self.require("list instances", &self.remote, "/1.0/instances?recursion=2")?;
        let instances = body
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        let mut instance = parse_instance(item);
                        instance.addresses = parse_addresses(item);
                        instance
                    })
                    .filter(|i| profile.is_none_or(|p| i.profiles.iter().any(|q| q == p)))
                    .collect()
            })
            .unwrap_or_default();
        Ok(instances)
    }

    fn launch(&self, request: &LaunchRequest) -> Result<()> {
        let source = match &request.source {
            ImageSource::Cached(alias) => self.target(alias),
            ImageSource::Remote { .. } => request.source.to_string(),
        };
        let mut argv = args(&["init", &source, &self.target(&request.name)]);
        if !request.profile.is_empty() {
            argv.extend(args(&["--profile", &request.profile]));
        }
        if !request.storage.is_empty() {
            argv.extend(args(&["--storage", &request.storage]));
        }
        let _ = self.lxc("create instance", &request.name, argv)?;
        self.start(&request.name)
    }

    fn start(&self, name: &str) -> Result<()> {
        let _ = self.lxc("start instance", name, args(&["start", &self.target(name)]))?;
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        let _ = self.lxc("stop instance", name, args(&["stop", &self.target(name)]))?;
        Ok(())
    }

    fn delete_instance(&self, name: &str) -> Result<()> {
        let _ = self.lxc(
            "delete instance",
            name,
            args(&["delete", &self.target(name), "--force"]),
        )?;
        Ok(())
    }

    fn set_config(&self, name: &str, config: &BTreeMap<String, String>) -> Result<()> {
        let mut argv = args(&["config", "set", &self.target(name)]);
        argv.extend(config.iter().map(|(k, v)| format!("{k}={v}")));
        let _ = self.lxc("set config", name, argv)?;
        Ok(())
    }

    fn add_device(&self, name: &str, device_name: &str, device: &Device) -> Result<()> {
        let existing = self
            .instance(name)?
            .is_some_and(|i| i.devices.contains_key(device_name));
        if existing {
            let _ = self.remove_device(name, device_name)?;
        }
        let kind = device.get("type").map_or("none", String::as_str);
        let mut argv = args(&["config", "device", "add", &self.target(name), device_name, kind]);
        argv.extend(
            device
                .iter()
                .filter(|(k, _)| k.as_str() != "type")
                .map(|(k, v)| format!("{k}={v}")),
        );
        let _ = self.lxc("add device", name, argv)?;
        Ok(())
    }

    fn remove_device(&self, name: &str, device_name: &str) -> Result<Device> {
        let device = self
            .instance(name)?
            .and_then(|mut i| i.devices.remove(device_name))
            .ok_or_else(|| BraveError::NotFound {
                kind: "device",
                id: format!("{name}/{device_name}"),
            })?;
        let _ = self.lxc(
            "remove device",
            name,
            args(&["config", "device", "remove", &self.target(name), device_name]),
        )?;
        Ok(device)
    }

    fn image_exists(&self, fingerprint: &str) -> Result<bool> {
        Ok(self
            .get("get image", fingerprint, &format!("/1.0/images/{fingerprint}"))?
            .is_some())
    }

    fn import_image(&self, archive: &Path, alias: &str) -> Result<String> {
        let out = self.lxc(
            "import image",
            alias,
            args(&[
                "image",
                "import",
                &archive.display().to_string(),
                &format!("{}:", self.remote),
                "--alias",
                alias,
            ]),
        )?;
        match fingerprint_from(&out) {
            Some(fp) => Ok(fp),
            None => bravekit_image::hash::hash_file(archive),
        }
    }

    fn delete_image(&self, fingerprint: &str) -> Result<()> {
        let _ = self.lxc(
            "delete image",
            fingerprint,
            args(&["image", "delete", &self.target(fingerprint)]),
        )?;
        Ok(())
    }

    fn publish(&self, name: &str, alias: &str) -> Result<String> {
        let out = self.lxc(
            "publish instance",
            name,
            args(&[
                "publish",
                &self.target(name),
                &format!("{}:", self.remote),
                "--alias",
                alias,
                "--force",
            ]),
        )?;
        fingerprint_from(&out).ok_or_else(|| {
            BraveError::remote("publish instance", name, "no fingerprint in lxc output")
        })
    }

    fn export_image(&self, fingerprint: &str, dir: &Path, basename: &str) -> Result<PathBuf> {
        let target = dir.join(basename);
        let _ = self.lxc(
            "export image",
            fingerprint,
            args(&[
                "image",
                "export",
                &self.target(fingerprint),
                &target.display().to_string(),
            ]),
        )?;
        Ok(dir.join(format!("{basename}.tar.gz")))
    }

    fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput> {
        let mut argv = args(&["exec", &self.target(name), "--"]);
        argv.extend(command.iter().cloned());
        match self.shell.run(LXC, &argv) {
            Ok(stdout) => Ok(ExecOutput {
                stdout,
                ..ExecOutput::default()
            }),
            Err(BraveError::Command { message, .. }) => Ok(ExecOutput {
                stderr: message,
                exit_code: 1,
                ..ExecOutput::default()
            }),
            Err(e) => Err(BraveError::remote("exec", name, e)),
        }
    }

    fn push_file(&self, name: &str, source: &Path, target: &str) -> Result<()> {
        let mut argv = args(&["file", "push", "--create-dirs"]);
        if source.is_dir() {
            argv.push("--recursive".into());
        }
        argv.push(source.display().to_string());
        argv.push(format!("{}{target}", self.target(name)));
        let _ = self.lxc("push file", name, argv)?;
        Ok(())
    }

    fn create_volume(&self, pool: &str, volume: &str) -> Result<()> {
        let _ = self.lxc(
            "create volume",
            volume,
            args(&["storage", "volume", "create", &self.target(pool), volume]),
        )?;
        Ok(())
    }

    fn volume(&self, pool: &str, volume: &str) -> Result<Option<Volume>> {
        Ok(self
            .get(
                "get volume",
                volume,
                &format!("/1.0/storage-pools/{pool}/volumes/custom/{volume}"),
            )?
            .map(|body| Volume {
                name: volume.to_string(),
                used_by: string_list(&body["used_by"]),
            }))
    }

    fn delete_volume(&self, pool: &str, volume: &str) -> Result<()> {
        let _ = self.lxc(
            "delete volume",
            volume,
            args(&["storage", "volume", "delete", &self.target(pool), volume]),
        )?;
        Ok(())
    }

    fn network_address(&self, network: &str) -> Result<Option<String>> {
        Ok(self
            .get("get network", network, &format!("/1.0/networks/{network}"))?
            .and_then(|body| body["config"]["ipv4.address"].as_str().map(str::to_string)))
    }
}

/// [`Connector`] producing [`LxcClient`]s over a shared shell.
pub struct LxcConnector {
    shell: Arc<dyn Shell>,
}

impl LxcConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        Self { shell }
    }
}

impl Connector for LxcConnector {
    fn connect(&self, remote: &Remote) -> Result<Arc<dyn RuntimeClient>> {
        Ok(Arc::new(LxcClient::new(
            remote.client_name(),
            Arc::clone(&self.shell),
        )))
    }
}

fn parse_instance(body: &Value) -> Instance {
    let devices = body["devices"]
        .as_object()
        .map(|devices| {
            devices
                .iter()
                .map(|(name, device)| (name.clone(), string_map(device)))
                .collect()
        })
        .unwrap_or_default();
    Instance {
        name: body["name"].as_str().unwrap_or_default().to_string(),
        status: body["status"].as_str().unwrap_or_default().to_string(),
        profiles: string_list(&body["profiles"]),
        config: string_map(&body["config"]),
        devices,
        addresses: Vec::new(),
    }
}

/// Reads IPv4 addresses from a state document or a `recursion=2` listing.
fn parse_addresses(body: &Value) -> Vec<String> {
    let network = if body["state"].is_object() {
        &body["state"]["network"]
    } else {
        &body["network"]
    };
    network[UNIT_NIC]["addresses"]
        .as_array()
        .map(|addrs| {
            addrs
                .iter()
                .filter(|a| a["family"] == "inet")
                .filter_map(|a| a["address"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Extracts the fingerprint from `... with fingerprint: <hex>` output.
fn fingerprint_from(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.split_once("fingerprint:"))
        .map(|(_, fp)| fp.trim().to_string())
        .filter(|fp| !fp.is_empty())
}

fn is_not_found(error: &BraveError) -> bool {
    matches!(error, BraveError::Command { message, .. } if message.to_ascii_lowercase().contains("not found"))
}

fn command_message(error: &BraveError) -> String {
    match error {
        BraveError::Command { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::{Script, ScriptedShell};

    fn client(responses: Script) -> (LxcClient, Arc<ScriptedShell>) {
        let shell = Arc::new(ScriptedShell::new(responses));
        (LxcClient::new("brave", shell.clone()), shell)
    }

    #[test]
    fn server_info_reads_environment() {
        let (client, _) = client(vec![(
            "query --wait brave:/1.0",
            Ok(r#"{"environment":{"server_version":"5.0.2","architectures":["x86_64","i686"]}}"#),
        )]);
        let info = client.server_info().expect("info");
        assert_eq!(info.version, "5.0.2");
        assert_eq!(info.architecture().expect("arch"), "x86_64");
    }

    #[test]
    fn missing_instance_is_none() {
        let (client, _) = client(vec![("instances/web", Err("Error: Instance not found"))]);
        assert!(client.instance("web").expect("lookup").is_none());
    }

    #[test]
    fn other_query_failures_are_remote_errors() {
        let (client, _) = client(vec![("instances/web", Err("connection refused"))]);
        let err = client.instance("web").unwrap_err();
        assert!(err.to_string().contains("get instance"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn launch_inits_then_starts() {
        let (client, shell) = client(vec![]);
        client
            .launch(&LaunchRequest {
                name: "web".into(),
                source: ImageSource::Cached("web".into()),
                profile: "brave".into(),
                storage: "pool".into(),
            })
            .expect("launch");
        let calls = shell.calls();
        assert_eq!(
            calls[0],
            "lxc init brave:web brave:web --profile brave --storage pool"
        );
        assert_eq!(calls[1], "lxc start brave:web");
    }

    #[test]
    fn config_set_passes_all_pairs() {
        let (client, shell) = client(vec![]);
        let config = BTreeMap::from([
            ("limits.cpu".to_string(), "1".to_string()),
            ("limits.memory".to_string(), "512MB".to_string()),
        ]);
        client.set_config("web", &config).expect("config");
        assert_eq!(
            shell.calls()[0],
            "lxc config set brave:web limits.cpu=1 limits.memory=512MB"
        );
    }

    #[test]
    fn fingerprint_is_parsed_from_output() {
        assert_eq!(
            fingerprint_from("Image imported with fingerprint: abc123\n").as_deref(),
            Some("abc123")
        );
        assert_eq!(fingerprint_from("nothing here"), None);
    }

    #[test]
    fn addresses_come_from_unit_nic() {
        let state: Value = serde_json::from_str(
            r#"{"network":{"eth0":{"addresses":[
                {"family":"inet","address":"10.0.0.5"},
                {"family":"inet6","address":"fd42::1"}]}}}"#,
        )
        .unwrap();
        assert_eq!(parse_addresses(&state), vec!["10.0.0.5"]);
    }
}
