//! Runtime hosted inside a Multipass VM.
//!
//! The VM is driven entirely through the `multipass` CLI; commands inside the
//! guest go through `multipass exec <vm> --`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bravekit_common::config::HostSettings;
use bravekit_common::constants::{Paths, VM_VOLUMES_DIR};
use bravekit_common::error::{BraveError, Result};

use super::{Backend, HostInfo, ShareStaging, Usage, parse_meminfo, parse_storage_info};
use crate::shell::{Shell, args};

const MULTIPASS: &str = "multipass";
const GUEST_LXC: &str = "/snap/bin/lxc";
const GUEST_DATA_DIR: &str = "/home/ubuntu/.bravekit";
const DEFAULT_SETTLE: Duration = Duration::from_secs(10);

/// [`Backend`] for a runtime installed in a Multipass VM.
pub struct MultipassBackend {
    settings: HostSettings,
    paths: Paths,
    shell: Arc<dyn Shell>,
    settle: Duration,
}

impl MultipassBackend {
    /// Creates the backend for the VM named in `settings`.
    #[must_use]
    pub fn new(settings: HostSettings, paths: Paths, shell: Arc<dyn Shell>) -> Self {
        Self {
            settings,
            paths,
            shell,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Overrides the pause after launching the VM and installing packages.
    #[must_use]
    pub const fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn multipass(&self, argv: &[&str]) -> Result<String> {
        self.shell.run(MULTIPASS, &args(argv))
    }

    fn guest(&self, argv: &[&str]) -> Result<String> {
        let mut full = args(&["exec", &self.settings.name, "--"]);
        full.extend(args(argv));
        self.shell.run(MULTIPASS, &full)
    }

    fn guest_best_effort(&self, argv: &[&str]) {
        if let Err(e) = self.guest(argv) {
            tracing::warn!(vm = %self.settings.name, error = %e, "optional provisioning step failed, continuing");
        }
    }

    fn pause(&self) {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
    }

    fn preseed(settings: &HostSettings) -> String {
        let pool = &settings.storage_pool.name;
        let profile = &settings.profile;
        let bridge = &settings.network.bridge;
        format!(
            "cat <<EOF | sudo lxd init --preseed
pools:
- name: {pool}
  driver: zfs
networks:
- name: {profile}br0
  type: bridge
  config:
    ipv4.address: {bridge}/24
    ipv4.nat: true
    ipv6.address: none
profiles:
- name: {profile}
  devices:
    root:
      path: /
      pool: {pool}
      type: disk
    eth0:
      nictype: bridged
      parent: {profile}br0
      type: nic
EOF"
        )
    }

    fn disk_usage(&self) -> Result<Usage> {
        let command = format!(
            "{GUEST_LXC} storage info {} --bytes",
            self.settings.storage_pool.name
        );
        let out = self.guest(&["bash", "-c", &command])?;
        let (used, total) = parse_storage_info(&out).ok_or_else(|| BraveError::Command {
            command,
            message: "storage usage missing from output".into(),
        })?;
        Ok(Usage::from_bytes(used, total))
    }

    fn memory_usage(&self) -> Result<Usage> {
        let out = self.guest(&["cat", "/proc/meminfo"])?;
        let (total, available) = parse_meminfo(&out).ok_or_else(|| BraveError::Command {
            command: "cat /proc/meminfo".into(),
            message: "MemTotal or MemAvailable missing".into(),
        })?;
        Ok(Usage::from_bytes(total.saturating_sub(available), total))
    }
}

impl Backend for MultipassBackend {
    fn initialize(&self) -> Result<HostSettings> {
        let _ = self.shell.locate(MULTIPASS)?;
        let mut settings = self.settings.clone();
        let vm = settings.name.clone();
        let resources = &settings.backend.resources;
        tracing::info!(vm = %vm, os = %resources.os, "creating workspace");

        if cfg!(windows) {
            if let Err(e) = self.multipass(&["set", "local.privileged-mounts=Yes"]) {
                tracing::warn!(error = %e, "failed to enable privileged mounts, continuing");
            }
        }

        let _ = self.multipass(&[
            "launch",
            "--cpus",
            &resources.cpu,
            "--disk",
            &resources.hd,
            "--mem",
            &resources.ram,
            "--name",
            &resources.name,
            &resources.os,
        ])?;
        self.pause();

        let _ = self.guest(&["sudo", "snap", "install", "multipass-sshfs"])?;
        let data_dir = self.paths.root().display().to_string();
        let _ = self.multipass(&["mount", &data_dir, &format!("{vm}:{GUEST_DATA_DIR}")])?;
        let _ = self.guest(&["sudo", "apt", "update"])?;

        self.guest_best_effort(&["sudo", "apt", "remove", "-y", "lxd"]);
        self.guest_best_effort(&["sudo", "apt", "autoremove", "-y"]);
        self.guest_best_effort(&["sudo", "apt", "purge"]);

        let _ = self.guest(&["sudo", "snap", "install", "--stable", "lxd"])?;
        let _ = self.guest(&["sudo", "usermod", "-aG", "lxd", "ubuntu"])?;
        tracing::info!(vm = %vm, "installing required software");
        self.pause();

        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        settings.storage_pool.name = format!("{}-{stamp}", settings.storage_pool.name);
        settings.save(&self.paths.settings())?;

        let pool = settings.storage_pool.clone();
        let _ = self.guest(&[GUEST_LXC, "profile", "create", &settings.profile])?;
        let _ = self.guest(&[
            GUEST_LXC,
            "storage",
            "create",
            &pool.name,
            &pool.kind,
            &format!("size={}", pool.size),
        ])?;
        self.guest_best_effort(&[
            GUEST_LXC,
            "profile",
            "device",
            "add",
            &settings.profile,
            "root",
            "disk",
            "path=/",
            &format!("pool={}", pool.name),
        ]);
        let _ = self.guest(&["bash", "-c", &Self::preseed(&settings)])?;
        let _ = self.guest(&[GUEST_LXC, "config", "set", "core.https_address", "[::]:8443"])?;
        let _ = self.guest(&[GUEST_LXC, "config", "set", "core.trust_password", &settings.trust])?;

        settings.status = "active".into();
        settings.save(&self.paths.settings())?;
        tracing::info!(vm = %vm, pool = %pool.name, "workspace ready");
        Ok(settings)
    }

    fn info(&self) -> Result<HostInfo> {
        let _ = self.shell.locate(MULTIPASS)?;
        let out = self.multipass(&["info", &self.settings.name])?;
        let mut info = parse_vm_info(&out);
        if info.is_running() {
            info.disk = self.disk_usage()?;
            info.memory = self.memory_usage()?;
            info.cpu = self
                .guest(&["bash", "-c", "grep -c ^processor /proc/cpuinfo"])?
                .trim()
                .to_string();
        }
        Ok(info)
    }

    fn running(&self) -> Result<bool> {
        let out = self.multipass(&["info", &self.settings.name])?;
        Ok(parse_vm_info(&out).is_running())
    }

    fn start(&self) -> Result<()> {
        if self.running()? {
            return Ok(());
        }
        tracing::info!(vm = %self.settings.name, "starting workspace");
        let _ = self.multipass(&["start", &self.settings.name])?;
        Ok(())
    }
}

/// Reads `Key: value` lines of `multipass info`.
fn parse_vm_info(out: &str) -> HostInfo {
    let mut info = HostInfo::default();
    for line in out.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "Name" => info.name = value,
            "State" => info.state = value,
            "IPv4" => info.ipv4 = value,
            "Release" => info.release = value,
            "Load" => info.load = value,
            _ => {}
        }
    }
    info
}

/// Host paths reach units through a `multipass mount` into the VM.
pub struct MultipassShares {
    vm: String,
    shell: Arc<dyn Shell>,
}

impl MultipassShares {
    /// Creates share staging for the VM named `vm`.
    #[must_use]
    pub fn new(vm: &str, shell: Arc<dyn Shell>) -> Self {
        Self {
            vm: vm.to_string(),
            shell,
        }
    }
}

impl ShareStaging for MultipassShares {
    fn stage(&self, source: &Path, device: &str) -> Result<String> {
        let staged = format!("{VM_VOLUMES_DIR}/{device}");
        let _ = self.shell.run(
            MULTIPASS,
            &args(&[
                "mount",
                &source.display().to_string(),
                &format!("{}:{staged}", self.vm),
            ]),
        )?;
        tracing::debug!(source = %source.display(), staged = %staged, "host path mounted into VM");
        Ok(staged)
    }

    fn release(&self, staged: &str) -> Result<()> {
        if !staged.starts_with(VM_VOLUMES_DIR) {
            return Ok(());
        }
        let probe = format!("test -d {staged} && echo exists || true");
        let out = self
            .shell
            .run(MULTIPASS, &args(&["exec", &self.vm, "--", "bash", "-c", &probe]))?;
        if !out.contains("exists") {
            return Ok(());
        }
        let _ = self
            .shell
            .run(MULTIPASS, &args(&["umount", &format!("{}:{staged}", self.vm)]))?;
        if let Err(e) = self
            .shell
            .run(MULTIPASS, &args(&["exec", &self.vm, "--", "rmdir", staged]))
        {
            tracing::warn!(staged = %staged, error = %e, "failed to remove staging directory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::{Script, ScriptedShell};

    const RUNNING: &str = "Name:           brave\nState:          Running\nIPv4:           10.1.2.3\nRelease:        Ubuntu 22.04.3 LTS\nLoad:           0.10 0.05 0.01\n";

    fn backend(responses: Script) -> (MultipassBackend, Arc<ScriptedShell>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let shell = Arc::new(ScriptedShell::new(responses));
        let backend = MultipassBackend::new(
            HostSettings::default(),
            Paths::new(dir.path()),
            shell.clone(),
        )
        .with_settle_delay(Duration::ZERO);
        (backend, shell, dir)
    }

    #[test]
    fn initialize_runs_sequence_and_persists_active_settings() {
        let (backend, shell, dir) = backend(vec![]);
        let settings = backend.initialize().expect("initialize");

        assert_eq!(settings.status, "active");
        assert!(settings.storage_pool.name.starts_with("brave-"));
        let saved = HostSettings::load(&dir.path().join("config.yml")).expect("load");
        assert_eq!(saved, settings);

        let calls = shell.calls();
        let position = |needle: &str| {
            calls
                .iter()
                .position(|c| c.contains(needle))
                .unwrap_or_else(|| panic!("{needle} not run"))
        };
        assert!(calls[0].starts_with("multipass launch --cpus 2 --disk 50GB --mem 4GB"));
        assert!(position("multipass-sshfs") < position("apt update"));
        assert!(position("apt remove") < position("snap install --stable lxd"));
        assert!(position("profile create") < position("lxd init --preseed"));
        assert!(position("core.https_address") < position("core.trust_password"));
    }

    #[test]
    fn best_effort_failures_do_not_stop_initialization() {
        let (backend, _, _dir) = backend(vec![
            ("apt remove", Err("package lxd is not installed")),
            ("apt purge", Err("nothing to purge")),
            ("profile device add", Err("device already exists")),
        ]);
        assert!(backend.initialize().expect("initialize").is_active());
    }

    #[test]
    fn mandatory_failure_propagates_without_activating() {
        let (backend, shell, dir) = backend(vec![("snap install --stable lxd", Err("snap unavailable"))]);
        let err = backend.initialize().unwrap_err();
        assert!(err.to_string().contains("snap unavailable"));
        assert!(!shell.calls().iter().any(|c| c.contains("profile create")));
        let saved = HostSettings::load(&dir.path().join("config.yml")).expect("load");
        assert!(!saved.is_active());
    }

    #[test]
    fn preseed_names_pool_bridge_and_profile() {
        let script = MultipassBackend::preseed(&HostSettings::default());
        assert!(script.contains("- name: bravebr0"));
        assert!(script.contains("ipv4.address: 10.0.0.1/24"));
        assert!(script.contains("pool: brave"));
    }

    #[test]
    fn info_fills_usage_when_running() {
        let (backend, _, _dir) = backend(vec![
            ("multipass info", Ok(RUNNING)),
            ("storage info", Ok("  space used: \"2000000000\"\n  total space: \"50000000000\"\n")),
            ("/proc/meminfo", Ok("MemTotal: 4000000 kB\nMemAvailable: 1000000 kB\n")),
            ("grep -c", Ok("2\n")),
        ]);
        let info = backend.info().expect("info");
        assert_eq!(info.ipv4, "10.1.2.3");
        assert_eq!(info.disk.total, "50.0 GB");
        assert_eq!(info.memory.used, "3.1 GB");
        assert_eq!(info.cpu, "2");
    }

    #[test]
    fn info_of_stopped_vm_stays_unknown() {
        let (backend, shell, _dir) = backend(vec![("multipass info", Ok("Name: brave\nState: Stopped\n"))]);
        let info = backend.info().expect("info");
        assert_eq!(info.state, "Stopped");
        assert_eq!(info.cpu, super::super::UNKNOWN);
        assert_eq!(shell.calls().len(), 1);
    }

    #[test]
    fn start_leaves_running_vm_alone() {
        let (backend, shell, _dir) = backend(vec![("multipass info", Ok(RUNNING))]);
        backend.start().expect("start");
        assert!(!shell.calls().iter().any(|c| c.starts_with("multipass start")));
    }

    #[test]
    fn start_boots_stopped_vm() {
        let (backend, shell, _dir) = backend(vec![("multipass info", Ok("State: Stopped\n"))]);
        backend.start().expect("start");
        assert!(shell.calls().iter().any(|c| c == "multipass start brave"));
    }

    #[test]
    fn shares_mount_into_volume_dir_and_release() {
        let shell = Arc::new(ScriptedShell::new(vec![("test -d", Ok("exists\n"))]));
        let shares = MultipassShares::new("brave", shell.clone());
        let staged = shares.stage(Path::new("/home/me/data"), "brave_abc").expect("stage");
        assert_eq!(staged, "/home/ubuntu/volumes/brave_abc");
        shares.release(&staged).expect("release");

        let calls = shell.calls();
        assert_eq!(
            calls[0],
            "multipass mount /home/me/data brave:/home/ubuntu/volumes/brave_abc"
        );
        assert!(calls.contains(&"multipass umount brave:/home/ubuntu/volumes/brave_abc".to_string()));
    }

    #[test]
    fn release_ignores_paths_outside_volume_dir() {
        let shell = Arc::new(ScriptedShell::new(vec![]));
        let shares = MultipassShares::new("brave", shell.clone());
        shares.release("/srv/data").expect("release");
        assert!(shell.calls().is_empty());
    }
}
