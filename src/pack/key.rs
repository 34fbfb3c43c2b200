//! Encryption key sourcing.
//!
//! The caller selects where key material comes from; nothing is
//! auto-detected. File keys are read as raw bytes with trailing whitespace
//! trimmed, so a key file ending in a newline works.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{EncryptionPolicy, KeySourceKind};
use crate::pack::crypto::{AesGcmEncryption, DisabledEncryption, EncryptionProvider};

/// Where archive key material comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// An environment variable holding the key material.
    Env(String),
    /// A file holding the key material.
    File(PathBuf),
    /// An interactive prompt on stderr/stdin.
    Prompt,
}

impl KeySource {
    /// Build a source from a dataset's encryption policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a file source without a path, which
    /// manifest validation also rejects.
    pub fn from_policy(policy: &EncryptionPolicy) -> Result<Self> {
        match policy.key_source {
            KeySourceKind::Env => Ok(Self::Env(policy.key_env_var.clone())),
            KeySourceKind::File => policy
                .key_file_path
                .as_ref()
                .map(|p| Self::File(PathBuf::from(p)))
                .ok_or_else(|| {
                    Error::Config(
                        "encryption key_source is 'file' but key_file_path is not set"
                            .to_string(),
                    )
                }),
            KeySourceKind::Prompt => Ok(Self::Prompt),
        }
    }

    /// Fetch the key material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionKeyMissing`] when the variable is unset,
    /// the file is empty, or the prompt yields nothing, and an I/O error if
    /// the file or terminal cannot be read.
    pub fn resolve(&self) -> Result<Vec<u8>> {
        let material = match self {
            Self::Env(var) => std::env::var(var)
                .map_err(|_| Error::EncryptionKeyMissing(var.clone()))?
                .into_bytes(),
            Self::File(path) => {
                debug!(path = %path.display(), "Reading encryption key file");
                let mut bytes = std::fs::read(path)?;
                while bytes.last().is_some_and(u8::is_ascii_whitespace) {
                    bytes.pop();
                }
                bytes
            }
            Self::Prompt => prompt_for_key()?,
        };
        if material.is_empty() {
            return Err(Error::EncryptionKeyMissing(self.describe()));
        }
        Ok(material)
    }

    fn describe(&self) -> String {
        match self {
            Self::Env(var) => format!("environment variable {var}"),
            Self::File(path) => format!("key file {}", path.display()),
            Self::Prompt => "interactive prompt".to_string(),
        }
    }
}

/// Build the encryption provider a policy calls for.
///
/// Disabled policy → [`DisabledEncryption`]; enabled → key material is
/// resolved eagerly so a missing key fails here, before any archive I/O.
///
/// # Errors
///
/// Returns an error if the key cannot be resolved.
pub fn provider_for(policy: &EncryptionPolicy) -> Result<Box<dyn EncryptionProvider>> {
    if !policy.enabled {
        return Ok(Box::new(DisabledEncryption));
    }
    let material = KeySource::from_policy(policy)?.resolve()?;
    Ok(Box::new(AesGcmEncryption::new(&material)))
}

fn prompt_for_key() -> Result<Vec<u8>> {
    let mut stderr = std::io::stderr();
    write!(stderr, "Encryption key: ")?;
    stderr.flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_env_source_resolves() {
        std::env::set_var("SNAPMIRROR_TEST_KEY", "hunter2");
        let material = KeySource::Env("SNAPMIRROR_TEST_KEY".to_string())
            .resolve()
            .unwrap();
        assert_eq!(material, b"hunter2");
        std::env::remove_var("SNAPMIRROR_TEST_KEY");
    }

    #[test]
    fn test_env_source_missing_fails() {
        let result = KeySource::Env("SNAPMIRROR_TEST_KEY_UNSET".to_string()).resolve();
        assert!(matches!(result, Err(Error::EncryptionKeyMissing(_))));
    }

    #[test]
    fn test_file_source_trims_trailing_newline() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("key");
        std::fs::write(&path, "file-key-material\n").unwrap();
        let material = KeySource::File(path).resolve().unwrap();
        assert_eq!(material, b"file-key-material");
    }

    #[test]
    fn test_empty_file_is_missing_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("key");
        std::fs::write(&path, "\n").unwrap();
        assert!(matches!(
            KeySource::File(path).resolve(),
            Err(Error::EncryptionKeyMissing(_))
        ));
    }

    #[test]
    fn test_from_policy() {
        let mut policy = EncryptionPolicy::default();
        assert_eq!(
            KeySource::from_policy(&policy).unwrap(),
            KeySource::Env("SNAPSHOT_ENCRYPTION_KEY".to_string())
        );

        policy.key_source = KeySourceKind::File;
        assert!(matches!(
            KeySource::from_policy(&policy),
            Err(Error::Config(_))
        ));
        policy.key_file_path = Some("/tmp/key".to_string());
        assert_eq!(
            KeySource::from_policy(&policy).unwrap(),
            KeySource::File(PathBuf::from("/tmp/key"))
        );
    }

    #[test]
    fn test_provider_for_disabled_policy() {
        let policy = EncryptionPolicy::default();
        let provider = provider_for(&policy).unwrap();
        assert!(!provider.is_enabled());
    }

    #[test]
    fn test_provider_for_enabled_policy_without_key_fails_early() {
        let mut policy = EncryptionPolicy::default();
        policy.enabled = true;
        policy.key_env_var = "SNAPMIRROR_TEST_NO_SUCH_KEY".to_string();
        assert!(matches!(
            provider_for(&policy),
            Err(Error::EncryptionKeyMissing(_))
        ));
    }
}
