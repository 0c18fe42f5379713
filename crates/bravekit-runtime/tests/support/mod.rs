//! Shared fixture: a host wired to an in-memory runtime.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bravekit_common::config::{BackendKind, HostSettings};
use bravekit_common::constants::{LOCAL_REMOTE, Paths};
use bravekit_common::error::Result;
use bravekit_runtime::backend::native::NativeShares;
use bravekit_runtime::backend::{Backend, HostInfo, Platform};
use bravekit_runtime::client::memory::{MemoryClient, MemoryConnector};
use bravekit_runtime::host::BraveHost;
use bravekit_runtime::records::JsonRecordStore;
use bravekit_runtime::shell::{Shell, SystemShell};
use tempfile::TempDir;

pub const POOL_BYTES: u64 = 100_000_000_000;

/// A backend that is always up.
pub struct IdleBackend;

impl Backend for IdleBackend {
    fn initialize(&self) -> Result<HostSettings> {
        Ok(HostSettings::default())
    }

    fn info(&self) -> Result<HostInfo> {
        Ok(HostInfo::default())
    }

    fn running(&self) -> Result<bool> {
        Ok(true)
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }
}

/// A VM backend reachable at a fixed address.
pub struct VmBackend {
    pub ipv4: String,
}

impl Backend for VmBackend {
    fn initialize(&self) -> Result<HostSettings> {
        let mut settings = HostSettings::default();
        settings.backend.kind = BackendKind::Multipass;
        Ok(settings)
    }

    fn info(&self) -> Result<HostInfo> {
        Ok(HostInfo {
            ipv4: self.ipv4.clone(),
            ..HostInfo::default()
        })
    }

    fn running(&self) -> Result<bool> {
        Ok(true)
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }
}

/// Records commands instead of running them.
#[derive(Default)]
pub struct RecordingShell {
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl Shell for RecordingShell {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        self.calls.lock().unwrap().push(call);
        Ok(String::new())
    }
}

/// An uninitialized host on a VM backend whose commands land in `shell`.
pub fn vm_host(root: &Path, ipv4: &str, shell: Arc<RecordingShell>) -> BraveHost {
    let paths = Paths::new(root.join("data"));
    let platform = Platform {
        backend: Box::new(VmBackend { ipv4: ipv4.into() }),
        shares: Box::new(NativeShares),
    };
    let records = JsonRecordStore::new(paths.records());
    BraveHost::new(
        HostSettings::default(),
        paths,
        platform,
        shell,
        Box::new(MemoryConnector::new().with_client(LOCAL_REMOTE, MemoryClient::new())),
        Box::new(records),
    )
    .expect("host")
}

pub struct Fixture {
    pub dir: TempDir,
    pub host: BraveHost,
    pub client: MemoryClient,
    pub connector: MemoryConnector,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_client(
            MemoryClient::new()
                .with_pool("brave", POOL_BYTES, 0)
                .with_network("bravebr0", "10.0.0.1/24"),
        )
    }

    pub fn with_client(client: MemoryClient) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(dir.path().join("data"));
        let mut settings = HostSettings::default();
        settings.backend.kind = BackendKind::Lxd;

        let connector = MemoryConnector::new().with_client(LOCAL_REMOTE, client.clone());
        let platform = Platform {
            backend: Box::new(IdleBackend),
            shares: Box::new(NativeShares),
        };
        let records = JsonRecordStore::new(paths.records());
        let host = BraveHost::new(
            settings,
            paths,
            platform,
            Arc::new(SystemShell),
            Box::new(connector.clone()),
            Box::new(records),
        )
        .expect("host");
        Self {
            dir,
            host,
            client,
            connector,
        }
    }

    /// Adds `file_name` to the local image store.
    pub fn store_image(&self, file_name: &str) {
        let archive = self.dir.path().join(file_name);
        write_image(&archive);
        let _ = self.host.store().import(&archive).expect("import image");
    }

    /// Scratch directory used as build and deploy context.
    pub fn context(&self) -> PathBuf {
        let context = self.dir.path().join("context");
        std::fs::create_dir_all(&context).expect("context dir");
        context
    }
}

/// Writes a minimal unified image tarball.
pub fn write_image(path: &Path) {
    let file = std::fs::File::create(path).expect("create archive");
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    let metadata = b"architecture: x86_64\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(metadata.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "metadata.yaml", &metadata[..])
        .expect("append metadata");
    let mut encoder = builder.into_inner().expect("finish tar");
    encoder.flush().expect("flush");
    let _ = encoder.finish().expect("finish gzip");
}
