//! Unified error types for the bravekit workspace.
//!
//! Errors fall into a handful of kinds that callers branch on:
//! validation failures are raised before any side effect, conflicts
//! (`AlreadyExists`, `ImageExists`) are recoverable and may be skipped by the
//! orchestration layer, remote failures carry the operation and target, and
//! `MemoryExhausted` is fatal for the whole process.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BraveError {
    /// Input failed validation before anything was touched.
    #[error("invalid input: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// The target of a create operation already exists.
    #[error("{kind} {id:?} already exists")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier of the conflicting resource.
        id: String,
    },

    /// An image with this identity is already present in the image store.
    #[error("image {name:?} already exists")]
    ImageExists {
        /// Canonical image identity.
        name: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An archive no longer matches its recorded content hash.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Hash recorded next to the archive.
        expected: String,
        /// Hash computed from the archive.
        actual: String,
    },

    /// A runtime-control protocol call failed.
    #[error("{operation} failed for {target:?}: {message}")]
    Remote {
        /// Operation that was attempted.
        operation: &'static str,
        /// Instance, image, pool or remote the operation targeted.
        target: String,
        /// Message reported by the runtime.
        message: String,
    },

    /// The storage pool cannot hold the requested image.
    #[error("storage pool {pool:?} has {available} bytes free, image needs {requested}")]
    InsufficientStorage {
        /// Storage pool name.
        pool: String,
        /// Bytes requested.
        requested: u64,
        /// Bytes available.
        available: u64,
    },

    /// A host port requested by a port rule is already bound.
    #[error("host port {port} is already in use on {host}")]
    PortInUse {
        /// Host address that was probed.
        host: String,
        /// Port found open.
        port: u16,
    },

    /// Requested RAM exceeds what the host can provide. Fatal.
    #[error("requested memory {requested} exceeds available memory {available} on remote {remote:?}")]
    MemoryExhausted {
        /// Human-readable requested quantity.
        requested: String,
        /// Human-readable available quantity.
        available: String,
        /// Remote that was checked.
        remote: String,
    },

    /// The operation was interrupted through the cancellation token.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// Step that observed the cancellation.
        operation: String,
    },

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed: {message}")]
    Command {
        /// Rendered command line.
        command: String,
        /// Captured stderr or spawn error.
        message: String,
    },

    /// The unit is running but its tracking record could not be written.
    #[error("unit {unit:?} deployed but its record was not persisted: {message}")]
    RecordNotPersisted {
        /// Unit name.
        unit: String,
        /// Underlying store failure.
        message: String,
    },

    /// A deployment stage failed.
    #[error("deploying unit {unit:?} failed at {stage}: {source}")]
    Deploy {
        /// Unit being deployed.
        unit: String,
        /// Stage name at the time of failure.
        stage: &'static str,
        /// Underlying failure.
        source: Box<BraveError>,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// YAML serialization or deserialization failed.
    #[error("YAML error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

impl BraveError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a remote/protocol error.
    pub fn remote(operation: &'static str, target: impl Into<String>, message: impl ToString) -> Self {
        Self::Remote {
            operation,
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Returns the innermost error, looking through deploy context wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Deploy { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this is a conflict the caller may choose to skip.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.root(),
            Self::AlreadyExists { .. } | Self::ImageExists { .. }
        )
    }

    /// Whether this is an "image already exists" conflict.
    #[must_use]
    pub fn is_image_exists(&self) -> bool {
        matches!(self.root(), Self::ImageExists { .. })
    }

    /// Whether the process must abort without unwinding cleanups.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), Self::MemoryExhausted { .. })
    }

    /// Whether the failure came from the cancellation token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled { .. })
    }
}

/// Builds a closure mapping an `io::Error` at `path` into [`BraveError::Io`].
pub fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> BraveError {
    let path = path.into();
    move |source| BraveError::Io { path, source }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BraveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_wrapper_exposes_root_kind() {
        let err = BraveError::Deploy {
            unit: "web".into(),
            stage: "launch",
            source: Box::new(BraveError::MemoryExhausted {
                requested: "8GB".into(),
                available: "1GB".into(),
                remote: "local".into(),
            }),
        };
        assert!(err.is_fatal());
        assert!(!err.is_conflict());
        assert!(err.to_string().contains("web"));
        assert!(err.to_string().contains("launch"));
    }

    #[test]
    fn image_exists_is_a_conflict() {
        let err = BraveError::ImageExists {
            name: "alpine/1.0/amd64".into(),
        };
        assert!(err.is_conflict());
        assert!(err.is_image_exists());
        assert!(!err.is_fatal());
    }

    #[test]
    fn remote_error_names_operation_and_target() {
        let err = BraveError::remote("start instance", "web", "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("start instance"));
        assert!(msg.contains("web"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn cancelled_is_detected_through_wrapper() {
        let err = BraveError::Deploy {
            unit: "db".into(),
            stage: "attach network",
            source: Box::new(BraveError::Cancelled {
                operation: "attach network".into(),
            }),
        };
        assert!(err.is_cancelled());
    }
}
