//! Cold-storage archival of a dataset directory.
//!
//! The packer freezes the whole dataset tree (manifest, index, all chunk
//! files) into one deflate-compressed zip with a root-level
//! `_pack_meta.json`, optionally wrapped in AES-256-GCM. The unpacker
//! reverses the process and locates the dataset root inside whatever layout
//! the archive carried.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::model::SnapshotManifest;
use crate::pack::crypto::EncryptionProvider;
use crate::snapshot::MANIFEST_FILE;

/// Root-level metadata entry inside every archive.
pub const PACK_META_FILE: &str = "_pack_meta.json";

/// Filename suffix for encrypted archives.
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// Metadata embedded in the archive at pack time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackMeta {
    pub dataset_name: String,
    pub packed_at: DateTime<Utc>,
    pub encrypted: bool,
}

/// Freezes a dataset directory into an archive.
pub struct SnapshotPacker {
    encryption: Box<dyn EncryptionProvider>,
}

impl SnapshotPacker {
    /// Create a packer with the given encryption capability.
    #[must_use]
    pub fn new(encryption: Box<dyn EncryptionProvider>) -> Self {
        Self { encryption }
    }

    /// Pack `dataset_dir` into an archive at `output_path`.
    ///
    /// The archive is assembled in memory and written once, so no plaintext
    /// intermediate ever touches disk when encryption is on. With
    /// encryption the final file gets an `.enc` suffix appended to
    /// `output_path`. Returns the path actually written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatasetNotFound`] if `dataset_dir` has no manifest,
    /// or an I/O, zip, or encryption error.
    pub fn pack(&self, dataset_dir: &Path, output_path: &Path) -> Result<PathBuf> {
        let manifest = SnapshotManifest::load(&dataset_dir.join(MANIFEST_FILE))?;
        let encrypted = self.encryption.is_enabled();
        let meta = PackMeta {
            dataset_name: manifest.dataset_name.clone(),
            packed_at: Utc::now(),
            encrypted,
        };

        let buf = Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(buf);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file(PACK_META_FILE, options)?;
        zip.write_all(serde_json::to_string_pretty(&meta)?.as_bytes())?;

        let mut files = Vec::new();
        collect_files(dataset_dir, &mut files)?;
        files.sort();
        for path in &files {
            let entry_name = entry_name(&manifest.dataset_name, dataset_dir, path)?;
            debug!(entry = %entry_name, "Adding archive entry");
            zip.start_file(&entry_name, options)?;
            zip.write_all(&std::fs::read(path)?)?;
        }

        let mut bytes = zip.finish()?.into_inner();
        let final_path = if encrypted {
            bytes = self.encryption.encrypt(&bytes)?;
            let mut name = output_path.as_os_str().to_os_string();
            name.push(ENCRYPTED_SUFFIX);
            PathBuf::from(name)
        } else {
            output_path.to_path_buf()
        };
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&final_path, &bytes)?;

        info!(
            dataset = %meta.dataset_name,
            archive = %final_path.display(),
            files = files.len(),
            encrypted,
            "Packed dataset"
        );
        Ok(final_path)
    }
}

/// Restores a dataset directory from an archive.
pub struct SnapshotUnpacker {
    encryption: Box<dyn EncryptionProvider>,
}

impl SnapshotUnpacker {
    /// Create an unpacker with the given encryption capability.
    #[must_use]
    pub fn new(encryption: Box<dyn EncryptionProvider>) -> Self {
        Self { encryption }
    }

    /// Unpack `archive_path` into `output_dir` and return the dataset root.
    ///
    /// An `.enc` suffix triggers decryption first, which requires the same
    /// key material the archive was packed with. The dataset root is the
    /// directory (at any depth) containing `manifest.json`; if the archive
    /// holds none, `output_dir` itself is returned with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionDisabled`] for an `.enc` archive without
    /// a configured key, [`Error::Decryption`] for a wrong key or tampered
    /// archive, [`Error::InvalidArchive`] for entries escaping the output
    /// directory, or an I/O or zip error.
    pub fn unpack(&self, archive_path: &Path, output_dir: &Path) -> Result<PathBuf> {
        let mut bytes = std::fs::read(archive_path)?;
        if archive_path.extension().is_some_and(|e| e == "enc") {
            bytes = self.encryption.decrypt(&bytes)?;
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        std::fs::create_dir_all(output_dir)?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let Some(rel) = entry.enclosed_name() else {
                return Err(Error::InvalidArchive(format!(
                    "entry escapes the output directory: {}",
                    entry.name()
                )));
            };
            let target = output_dir.join(rel);
            if entry.is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&target)?;
            std::io::copy(&mut entry, &mut out)?;
        }

        let dataset_dir = match find_dataset_root(output_dir) {
            Some(dir) => dir,
            None => {
                warn!(
                    output = %output_dir.display(),
                    "No manifest.json found in archive, returning output directory"
                );
                output_dir.to_path_buf()
            }
        };
        info!(
            archive = %archive_path.display(),
            dataset_dir = %dataset_dir.display(),
            "Unpacked dataset"
        );
        Ok(dataset_dir)
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Archive entry name: dataset name plus the slash-separated relative path.
fn entry_name(dataset_name: &str, dataset_dir: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(dataset_dir).map_err(|_| {
        Error::Other(format!("file outside dataset directory: {}", path.display()))
    })?;
    let mut name = dataset_name.to_string();
    for component in rel.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(name)
}

/// Breadth-first search for the shallowest directory holding a manifest.
fn find_dataset_root(output_dir: &Path) -> Option<PathBuf> {
    let mut queue = vec![output_dir.to_path_buf()];
    let mut next = Vec::new();
    while !queue.is_empty() {
        for dir in queue.drain(..) {
            if dir.join(MANIFEST_FILE).is_file() {
                return Some(dir);
            }
            if let Ok(entries) = std::fs::read_dir(&dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        next.push(path);
                    }
                }
            }
        }
        std::mem::swap(&mut queue, &mut next);
    }
    None
}
