//! SHA-256 content verification.
//!
//! The hash of a unified image tarball is also its runtime fingerprint, so
//! the same digest addresses the image locally and on the remote.

use std::io::Read;
use std::path::Path;

use bravekit_common::error::{BraveError, Result, io_at};
use sha2::{Digest, Sha256};

const BUFFER_SIZE: usize = 64 * 1024;

/// Computes the lowercase hex SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(io_at(path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).map_err(io_at(path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Computes the lowercase hex SHA-256 digest of a byte slice.
#[must_use]
pub fn hash_bytes(input: &[u8]) -> String {
    format!("{:x}", Sha256::digest(input))
}

/// Computes the lowercase hex SHA-256 digest of a string.
#[must_use]
pub fn hash_str(input: &str) -> String {
    hash_bytes(input.as_bytes())
}

/// Validates that a file matches the expected SHA-256 hash.
///
/// # Errors
///
/// Returns [`BraveError::HashMismatch`] if the hashes do not match.
pub fn validate_hash(path: &Path, expected: &str) -> Result<()> {
    tracing::debug!(path = %path.display(), "validating SHA-256 hash");
    let actual = hash_file(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(BraveError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hash_file_matches_known_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").expect("write");
        assert_eq!(hash_file(&path).expect("hash"), HELLO_SHA256);
    }

    #[test]
    fn hash_str_matches_hash_file() {
        assert_eq!(hash_str("hello"), HELLO_SHA256);
    }

    #[test]
    fn validate_accepts_trailing_newline_in_expected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").expect("write");
        validate_hash(&path, &format!("{HELLO_SHA256}\n")).expect("valid");
    }

    #[test]
    fn validate_rejects_other_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello!").expect("write");
        let err = validate_hash(&path, HELLO_SHA256).unwrap_err();
        assert!(matches!(err, BraveError::HashMismatch { .. }));
    }

    #[test]
    fn hash_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            hash_file(&dir.path().join("missing")),
            Err(BraveError::Io { .. })
        ));
    }
}
