//! Local image store.
//!
//! A flat directory of `<identity>.tar.gz` archives, each with a detached
//! `<identity>.tar.gz.sha256` file holding the archive's hex digest. An
//! identity maps to at most one archive.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bravekit_common::constants::HASH_EXTENSION;
use bravekit_common::error::{BraveError, Result, io_at};
use bravekit_common::units::format_age;
use chrono::{DateTime, Utc};

use crate::archive::validate_archive;
use crate::hash::hash_file;
use crate::identity::{ImageIdentity, Scheme};

/// An archive present in the store.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    /// Identity parsed from the filename.
    pub identity: ImageIdentity,
    /// Scheme the filename uses.
    pub scheme: Scheme,
    /// Archive path.
    pub path: PathBuf,
    /// Archive size in bytes.
    pub size_bytes: u64,
    /// Last modification time of the archive.
    pub modified: DateTime<Utc>,
    /// Recorded hash, empty when the hash file is missing.
    pub hash: String,
}

impl ImageEntry {
    /// Age bucket relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> String {
        format_age(self.modified, now)
    }
}

struct Candidate {
    identity: ImageIdentity,
    scheme: Scheme,
    path: PathBuf,
    modified: SystemTime,
}

/// Directory-backed image store.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Opens the store rooted at `root`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(io_at(root))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finds the archive for `query`.
    ///
    /// An exact identity match wins; otherwise the most recently modified
    /// archive whose identity the query accepts, legacy files included.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if no archive matches.
    pub fn resolve(&self, query: &ImageIdentity) -> Result<PathBuf> {
        let mut matching: Vec<Candidate> = self
            .candidates()?
            .into_iter()
            .filter(|c| query.matches(&c.identity))
            .collect();

        if let Some(pos) = matching.iter().position(|c| c.identity == *query) {
            return Ok(matching.swap_remove(pos).path);
        }
        matching
            .into_iter()
            .max_by_key(|c| c.modified)
            .map(|c| {
                tracing::debug!(
                    query = %query,
                    found = %c.identity,
                    legacy = c.scheme == Scheme::Legacy,
                    "resolved image by best match"
                );
                c.path
            })
            .ok_or_else(|| BraveError::NotFound {
                kind: "image",
                id: query.to_string(),
            })
    }

    /// Whether an archive matches `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn contains(&self, query: &ImageIdentity) -> Result<bool> {
        match self.resolve(query) {
            Ok(_) => Ok(true),
            Err(BraveError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Imports an archive, deriving its identity from the filename.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::ImageExists`] before copying anything if the
    /// identity is present, or a validation error for a bad archive.
    pub fn import(&self, source: &Path) -> Result<ImageIdentity> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BraveError::validation(format!("{} has no file name", source.display()))
            })?;
        let (identity, _) = ImageIdentity::from_filename(file_name)?;
        self.copy_in(&identity, source, file_name)?;
        Ok(identity)
    }

    /// Imports an archive under an explicit, complete identity.
    ///
    /// # Errors
    ///
    /// Same as [`ImageStore::import`]; also rejects incomplete identities.
    pub fn import_as(&self, identity: &ImageIdentity, source: &Path) -> Result<PathBuf> {
        if !identity.is_complete() {
            return Err(BraveError::validation(format!(
                "image {identity} needs a version and architecture to be stored"
            )));
        }
        self.copy_in(identity, source, &identity.to_filename())
    }

    fn copy_in(&self, identity: &ImageIdentity, source: &Path, file_name: &str) -> Result<PathBuf> {
        if self.contains(identity)? {
            return Err(BraveError::ImageExists {
                name: identity.to_string(),
            });
        }
        let _ = validate_archive(source)?;

        let target = self.root.join(file_name);
        let _ = std::fs::copy(source, &target).map_err(io_at(&target))?;
        let hash_path = hash_path(&target);
        let written = hash_file(&target)
            .and_then(|hash| std::fs::write(&hash_path, hash).map_err(io_at(&hash_path)));
        if let Err(e) = written {
            if let Err(cleanup) = std::fs::remove_file(&target) {
                tracing::warn!(path = %target.display(), error = %cleanup, "failed to remove unhashed archive");
            }
            return Err(e);
        }

        tracing::info!(image = %identity, path = %target.display(), "image imported");
        Ok(target)
    }

    /// Removes the archive and its hash file.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] unless both files exist.
    pub fn delete(&self, query: &ImageIdentity) -> Result<()> {
        let archive = self.resolve(query)?;
        let hash = hash_path(&archive);
        if !hash.exists() {
            return Err(BraveError::NotFound {
                kind: "image hash file",
                id: hash.display().to_string(),
            });
        }
        std::fs::remove_file(&hash).map_err(io_at(&hash))?;
        std::fs::remove_file(&archive).map_err(io_at(&archive))?;
        tracing::info!(image = %query, "image deleted");
        Ok(())
    }

    /// Lists every archive in the store, ordered by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        let mut entries = Vec::new();
        for candidate in self.candidates()? {
            let size_bytes = std::fs::metadata(&candidate.path)
                .map_err(io_at(&candidate.path))?
                .len();
            let hash = std::fs::read_to_string(hash_path(&candidate.path))
                .map(|h| h.trim().to_string())
                .unwrap_or_default();
            entries.push(ImageEntry {
                identity: candidate.identity,
                scheme: candidate.scheme,
                path: candidate.path,
                size_bytes,
                modified: DateTime::<Utc>::from(candidate.modified),
                hash,
            });
        }
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(entries)
    }

    /// Archive size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if no archive matches.
    pub fn size(&self, query: &ImageIdentity) -> Result<u64> {
        let path = self.resolve(query)?;
        Ok(std::fs::metadata(&path).map_err(io_at(&path))?.len())
    }

    /// Recorded hash, computed from the archive if the hash file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if no archive matches.
    pub fn hash(&self, query: &ImageIdentity) -> Result<String> {
        let path = self.resolve(query)?;
        match std::fs::read_to_string(hash_path(&path)) {
            Ok(hash) => Ok(hash.trim().to_string()),
            Err(_) => hash_file(&path),
        }
    }

    /// Hashes the archive at `path` and checks it against its hash file.
    ///
    /// Returns the computed digest, which is also the runtime fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::HashMismatch`] if the recorded digest differs.
    pub fn verify(&self, path: &Path) -> Result<String> {
        let actual = hash_file(path)?;
        if let Ok(recorded) = std::fs::read_to_string(hash_path(path)) {
            let recorded = recorded.trim();
            if !recorded.eq_ignore_ascii_case(&actual) {
                return Err(BraveError::HashMismatch {
                    resource: path.display().to_string(),
                    expected: recorded.to_string(),
                    actual,
                });
            }
        }
        Ok(actual)
    }

    /// Copies the archive into `out_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::AlreadyExists`] if the destination file exists.
    pub fn export(&self, query: &ImageIdentity, out_dir: &Path) -> Result<PathBuf> {
        let source = self.resolve(query)?;
        let Some(file_name) = source.file_name() else {
            return Err(BraveError::validation("image archive has no file name"));
        };
        let target = out_dir.join(file_name);
        if target.exists() {
            return Err(BraveError::AlreadyExists {
                kind: "file",
                id: target.display().to_string(),
            });
        }
        let _ = std::fs::copy(&source, &target).map_err(io_at(&target))?;
        tracing::info!(image = %query, target = %target.display(), "image exported");
        Ok(target)
    }

    fn candidates(&self) -> Result<Vec<Candidate>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_at(&self.root))? {
            let entry = entry.map_err(io_at(&self.root))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok((identity, scheme)) = ImageIdentity::from_filename(file_name) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(io_at(&path))?;
            out.push(Candidate {
                identity,
                scheme,
                path,
                modified,
            });
        }
        Ok(out)
    }
}

fn hash_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(HASH_EXTENSION);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn write_image(path: &Path, marker: &str) {
        let file = std::fs::File::create(path).expect("create");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in [("metadata.yaml", "architecture: x86_64\n"), ("rootfs/id", marker)] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, data.as_bytes())
                .expect("append");
        }
        let encoder = builder.into_inner().expect("finish tar");
        let _ = encoder.finish().expect("finish gzip");
    }

    fn store_with_source(file_name: &str) -> (tempfile::TempDir, ImageStore, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(&dir.path().join("images")).expect("open");
        let source_dir = dir.path().join("incoming");
        std::fs::create_dir_all(&source_dir).expect("mkdir");
        let source = source_dir.join(file_name);
        write_image(&source, file_name);
        (dir, store, source)
    }

    #[test]
    fn import_derives_identity_and_writes_hash() {
        let (_dir, store, source) = store_with_source("web_1.0_amd64.tar.gz");
        let identity = store.import(&source).expect("import");
        assert_eq!(identity, ImageIdentity::new("web", "1.0", "amd64"));

        let archive = store.resolve(&identity).expect("resolve");
        assert_eq!(
            store.hash(&identity).expect("hash"),
            hash_file(&archive).expect("digest")
        );
        assert_eq!(store.verify(&archive).expect("verify"), store.hash(&identity).expect("hash"));
    }

    #[test]
    fn second_import_conflicts() {
        let (_dir, store, source) = store_with_source("web_1.0_amd64.tar.gz");
        let _ = store.import(&source).expect("first import");
        let err = store.import(&source).unwrap_err();
        assert!(err.is_image_exists());
    }

    #[test]
    fn invalid_archive_is_not_copied() {
        let (dir, store, _) = store_with_source("web_1.0_amd64.tar.gz");
        let bogus = dir.path().join("bad_1.0_amd64.tar.gz");
        std::fs::write(&bogus, b"nope").expect("write");
        assert!(store.import(&bogus).is_err());
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn unwritable_hash_removes_copied_archive() {
        let (_dir, store, source) = store_with_source("web_1.0_amd64.tar.gz");
        let blocker = store.root().join("web_1.0_amd64.tar.gz.sha256");
        std::fs::create_dir(&blocker).expect("mkdir");

        let err = store.import(&source).unwrap_err();
        assert!(matches!(err, BraveError::Io { .. }));
        assert!(!store.root().join("web_1.0_amd64.tar.gz").exists());
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn resolve_prefers_exact_then_newest() {
        let (dir, store, source) = store_with_source("web_1.0_amd64.tar.gz");
        let _ = store.import(&source).expect("import");
        std::thread::sleep(Duration::from_millis(20));
        let newer = dir.path().join("web_2.0_amd64.tar.gz");
        write_image(&newer, "newer");
        let _ = store.import(&newer).expect("import newer");

        let exact = store
            .resolve(&ImageIdentity::new("web", "1.0", "amd64"))
            .expect("resolve");
        assert!(exact.ends_with("web_1.0_amd64.tar.gz"));

        let best = store
            .resolve(&ImageIdentity::new("web", "", ""))
            .expect("resolve");
        assert!(best.ends_with("web_2.0_amd64.tar.gz"));
    }

    #[test]
    fn resolve_finds_legacy_archives() {
        let (_dir, store, source) = store_with_source("web-1.0.tar.gz");
        let identity = store.import(&source).expect("import");
        assert_eq!(identity, ImageIdentity::new("web", "1.0", ""));

        let found = store
            .resolve(&ImageIdentity::new("web", "1.0", "amd64"))
            .expect("resolve");
        assert!(found.ends_with("web-1.0.tar.gz"));
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let (_dir, store, _) = store_with_source("web_1.0_amd64.tar.gz");
        assert!(matches!(
            store.resolve(&ImageIdentity::new("db", "", "")),
            Err(BraveError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_requires_hash_file() {
        let (_dir, store, source) = store_with_source("web_1.0_amd64.tar.gz");
        let identity = store.import(&source).expect("import");
        let archive = store.resolve(&identity).expect("resolve");
        std::fs::remove_file(hash_path(&archive)).expect("remove hash");

        assert!(matches!(
            store.delete(&identity),
            Err(BraveError::NotFound { .. })
        ));
        assert!(archive.exists());
    }

    #[test]
    fn delete_removes_both_files() {
        let (_dir, store, source) = store_with_source("web_1.0_amd64.tar.gz");
        let identity = store.import(&source).expect("import");
        let archive = store.resolve(&identity).expect("resolve");
        store.delete(&identity).expect("delete");
        assert!(!archive.exists());
        assert!(!hash_path(&archive).exists());
    }

    #[test]
    fn list_reports_size_hash_and_age() {
        let (_dir, store, source) = store_with_source("web_1.0_amd64.tar.gz");
        let _ = store.import(&source).expect("import");
        let entries = store.list().expect("list");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].size_bytes > 0);
        assert_eq!(entries[0].hash.len(), 64);
        assert_eq!(entries[0].age(Utc::now()), "just now");
    }

    #[test]
    fn export_refuses_to_overwrite() {
        let (dir, store, source) = store_with_source("web_1.0_amd64.tar.gz");
        let identity = store.import(&source).expect("import");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).expect("mkdir");

        let exported = store.export(&identity, &out).expect("export");
        assert!(exported.exists());
        assert!(matches!(
            store.export(&identity, &out),
            Err(BraveError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn import_as_requires_complete_identity() {
        let (_dir, store, source) = store_with_source("scratch.tar.gz");
        assert!(store
            .import_as(&ImageIdentity::new("web", "", ""), &source)
            .is_err());
        let path = store
            .import_as(&ImageIdentity::new("web", "1.0", "arm64"), &source)
            .expect("import_as");
        assert!(path.ends_with("web_1.0_arm64.tar.gz"));
    }
}
