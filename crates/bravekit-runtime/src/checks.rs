//! Pre-flight resource checks run before a unit is launched.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bravekit_common::error::{BraveError, Result};
use bravekit_common::types::PortRule;
use bravekit_common::units::{format_bytes_si, parse_bytes};

use crate::client::RuntimeClient;
use crate::remote::Remote;

const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Fails if `pool` has less than `required` bytes free.
///
/// # Errors
///
/// Returns [`BraveError::InsufficientStorage`], or the client's error if the
/// pool cannot be queried.
pub fn check_storage(client: &dyn RuntimeClient, pool: &str, required: u64) -> Result<()> {
    let available = client.storage_pool(pool)?.available();
    tracing::debug!(pool = %pool, required, available, "checking storage pool space");
    if required > available {
        return Err(BraveError::InsufficientStorage {
            pool: pool.to_string(),
            requested: required,
            available,
        });
    }
    Ok(())
}

/// Fails if `ram` exceeds the memory the host has available.
///
/// # Errors
///
/// Returns [`BraveError::MemoryExhausted`], which callers treat as fatal,
/// or a validation error for a malformed quantity.
pub fn check_memory(client: &dyn RuntimeClient, ram: &str, remote: &str) -> Result<()> {
    let requested = parse_bytes(ram)?;
    let available = client.memory()?.available();
    tracing::debug!(remote = %remote, requested, available, "checking host memory");
    if requested > available {
        return Err(BraveError::MemoryExhausted {
            requested: ram.to_string(),
            available: format_bytes_si(available),
            remote: remote.to_string(),
        });
    }
    Ok(())
}

/// Fails if any host port of `rules` already accepts connections on the
/// remote's address. Unix-socket remotes are skipped.
///
/// # Errors
///
/// Returns [`BraveError::PortInUse`] for the first open port and
/// [`BraveError::Validation`] if the remote URL carries no host.
pub fn check_ports(remote: &Remote, rules: &[PortRule]) -> Result<()> {
    if remote.is_unix() || rules.is_empty() {
        return Ok(());
    }
    let Some(host) = remote.host() else {
        return Err(BraveError::validation(format!(
            "remote {} has no address to check ports on",
            remote.name
        )));
    };
    for rule in rules {
        if port_open(host, rule.host_port) {
            return Err(BraveError::PortInUse {
                host: host.to_string(),
                port: rule.host_port,
            });
        }
    }
    Ok(())
}

fn port_open(host: &str, port: u16) -> bool {
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        tracing::debug!(host = %host, port, "could not resolve host for port probe");
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, PORT_PROBE_TIMEOUT).is_ok())
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;
    use crate::client::memory::MemoryClient;
    use crate::remote::Protocol;

    fn remote(url: &str) -> Remote {
        Remote {
            name: "prod".into(),
            url: url.into(),
            protocol: Protocol::Lxd,
            public: false,
            profile: String::new(),
            network: String::new(),
            storage: String::new(),
            alias: String::new(),
        }
    }

    #[test]
    fn storage_shortfall_is_recoverable() {
        let client = MemoryClient::new().with_pool("brave", 1_000, 900);
        check_storage(&client, "brave", 100).expect("fits");
        let err = check_storage(&client, "brave", 101).unwrap_err();
        assert!(matches!(err, BraveError::InsufficientStorage { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn memory_shortfall_is_fatal() {
        let client = MemoryClient::new().with_memory(1_000_000_000, 600_000_000);
        check_memory(&client, "256MB", "local").expect("fits");
        let err = check_memory(&client, "512MB", "local").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("512MB"));
    }

    #[test]
    fn bad_ram_quantity_is_validation() {
        let client = MemoryClient::new();
        assert!(matches!(
            check_memory(&client, "lots", "local"),
            Err(BraveError::Validation { .. })
        ));
    }

    #[test]
    fn open_port_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let rules = [PortRule {
            unit_port: 80,
            host_port: port,
        }];
        let err = check_ports(&remote("https://127.0.0.1:8443"), &rules).unwrap_err();
        assert!(matches!(err, BraveError::PortInUse { port: p, .. } if p == port));
    }

    #[test]
    fn closed_port_passes() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let rules = [PortRule {
            unit_port: 80,
            host_port: port,
        }];
        check_ports(&remote("https://127.0.0.1:8443"), &rules).expect("free");
    }

    #[test]
    fn unix_remotes_are_not_probed() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let rules = [PortRule {
            unit_port: 80,
            host_port: port,
        }];
        check_ports(&remote("unix:///var/snap/lxd/common/lxd/unix.socket"), &rules)
            .expect("skipped");
    }

    #[test]
    fn addressless_remote_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let rules = [PortRule {
            unit_port: 80,
            host_port: port,
        }];
        let err = check_ports(&remote(""), &rules).unwrap_err();
        assert!(matches!(err, BraveError::Validation { .. }));
        check_ports(&remote(""), &[]).expect("nothing to check");
    }
}
