//! Unified image tarball inspection.
//!
//! A unified image is a single tarball holding `metadata.yaml` next to the
//! `rootfs/` tree. Both plain `.tar` and gzip-compressed archives are read.

use std::io::Read;
use std::path::{Component, Path};

use bravekit_common::error::{BraveError, Result, io_at};

/// Name of the metadata file every unified image carries at its root.
pub const METADATA_FILE: &str = "metadata.yaml";

/// Shape of a validated archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Number of entries in the tarball.
    pub entries: usize,
    /// Size of the archive file in bytes.
    pub size_bytes: u64,
}

/// Checks that `path` is a readable unified image tarball.
///
/// # Errors
///
/// Returns [`BraveError::Validation`] if the archive cannot be read or has
/// no `metadata.yaml` at its root.
pub fn validate_archive(path: &Path) -> Result<ArchiveSummary> {
    tracing::debug!(archive = %path.display(), "validating image archive");

    let file = std::fs::File::open(path).map_err(io_at(path))?;
    let size_bytes = file.metadata().map_err(io_at(path))?.len();

    let (entries, has_metadata) = if is_gzip_archive(path) {
        scan(flate2::read::GzDecoder::new(file), path)?
    } else {
        scan(file, path)?
    };

    if !has_metadata {
        return Err(BraveError::validation(format!(
            "{} is not a unified image: {METADATA_FILE} missing",
            path.display()
        )));
    }
    Ok(ArchiveSummary {
        entries,
        size_bytes,
    })
}

fn scan<R: Read>(reader: R, path: &Path) -> Result<(usize, bool)> {
    let unreadable =
        |e: std::io::Error| BraveError::validation(format!("{}: {e}", path.display()));
    let mut archive = tar::Archive::new(reader);
    let mut entries = 0;
    let mut has_metadata = false;
    for entry in archive.entries().map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        entries += 1;
        let entry_path = entry.path().map_err(unreadable)?;
        let mut parts = entry_path
            .components()
            .filter(|c| !matches!(c, Component::CurDir));
        if parts.next().is_some_and(|c| c.as_os_str() == METADATA_FILE) && parts.next().is_none()
        {
            has_metadata = true;
        }
    }
    Ok((entries, has_metadata))
}

/// Determines whether the archive is gzip-compressed based on extension.
fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).expect("failed to create tar.gz");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, *data)
                .expect("failed to append data");
        }
        let encoder = builder.into_inner().expect("failed to finish encoder");
        let _ = encoder.finish().expect("failed to finish gzip");
    }

    #[test]
    fn unified_image_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alpine_1.0_amd64.tar.gz");
        write_tar_gz(
            &path,
            &[
                ("metadata.yaml", b"architecture: x86_64\n"),
                ("rootfs/etc/hostname", b"alpine\n"),
            ],
        );
        let summary = validate_archive(&path).expect("valid");
        assert_eq!(summary.entries, 2);
        assert!(summary.size_bytes > 0);
    }

    #[test]
    fn dot_prefixed_metadata_is_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.tar.gz");
        write_tar_gz(&path, &[("./metadata.yaml", b"{}\n")]);
        assert!(validate_archive(&path).is_ok());
    }

    #[test]
    fn nested_metadata_does_not_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.tar.gz");
        write_tar_gz(&path, &[("rootfs/metadata.yaml", b"{}\n")]);
        assert!(matches!(
            validate_archive(&path),
            Err(BraveError::Validation { .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.tar.gz");
        std::fs::write(&path, b"definitely not gzip").expect("write");
        assert!(validate_archive(&path).is_err());
    }

    #[test]
    fn is_gzip_archive_detects_extensions() {
        assert!(is_gzip_archive(Path::new("layer.tar.gz")));
        assert!(is_gzip_archive(Path::new("layer.tgz")));
        assert!(!is_gzip_archive(Path::new("layer.tar")));
    }
}
