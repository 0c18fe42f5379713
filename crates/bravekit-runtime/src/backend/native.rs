//! Runtime installed directly on this machine.

use std::path::Path;
use std::sync::Arc;

use bravekit_common::config::HostSettings;
use bravekit_common::error::{BraveError, Result, io_at};

use super::{Backend, HostInfo, ShareStaging, Usage, parse_meminfo, parse_storage_info};
use crate::shell::{Shell, args};

/// [`Backend`] for a runtime managed outside bravekit.
pub struct NativeBackend {
    settings: HostSettings,
    shell: Arc<dyn Shell>,
}

impl NativeBackend {
    /// Creates the backend.
    #[must_use]
    pub fn new(settings: HostSettings, shell: Arc<dyn Shell>) -> Self {
        Self { settings, shell }
    }
}

impl Backend for NativeBackend {
    fn initialize(&self) -> Result<HostSettings> {
        tracing::info!(host = %self.settings.name, "native runtime needs no provisioning");
        Ok(self.settings.clone())
    }

    fn info(&self) -> Result<HostInfo> {
        let mut info = HostInfo {
            name: self.settings.name.clone(),
            ..HostInfo::default()
        };
        if !self.running()? {
            info.state = "Stopped".into();
            return Ok(info);
        }
        info.state = "Running".into();

        let storage = self.shell.run(
            "lxc",
            &args(&["storage", "info", &self.settings.storage_pool.name, "--bytes"]),
        )?;
        if let Some((used, total)) = parse_storage_info(&storage) {
            info.disk = Usage::from_bytes(used, total);
        }

        let meminfo_path = Path::new("/proc/meminfo");
        if meminfo_path.exists() {
            let meminfo = std::fs::read_to_string(meminfo_path).map_err(io_at(meminfo_path))?;
            if let Some((total, available)) = parse_meminfo(&meminfo) {
                info.memory = Usage::from_bytes(total.saturating_sub(available), total);
            }
        }
        if let Ok(cpus) = std::thread::available_parallelism() {
            info.cpu = cpus.to_string();
        }
        Ok(info)
    }

    fn running(&self) -> Result<bool> {
        Ok(self.shell.run("lxc", &args(&["info"])).is_ok())
    }

    fn start(&self) -> Result<()> {
        if self.running()? {
            return Ok(());
        }
        Err(BraveError::Command {
            command: "lxc info".into(),
            message: "the runtime daemon is not reachable; start it with your service manager"
                .into(),
        })
    }
}

/// Host paths are mounted into units as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeShares;

impl ShareStaging for NativeShares {
    fn stage(&self, source: &Path, _device: &str) -> Result<String> {
        Ok(source.display().to_string())
    }

    fn release(&self, _staged: &str) -> Result<()> {
        Ok(())
    }
}
