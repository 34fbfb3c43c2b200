//! Dataset manifest.
//!
//! One `manifest.json` per dataset directory. The manifest scopes the
//! dataset (exchange/source/entity), names the SQL target, and records the
//! default sync and encryption policies. The writer bumps `version` on
//! every close.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::snapshot::file::atomic_write;
use crate::sync::{ConflictStrategy, SyncDirection};

/// Where mirrored records land in the relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlTarget {
    /// Target schema, if the mirror backend has one.
    pub schema: Option<String>,
    /// Target table name.
    pub table: String,
    /// Column holding the natural key.
    pub natural_key_column: String,
    /// Column holding the content hash (unique).
    pub hash_column: String,
}

impl Default for SqlTarget {
    fn default() -> Self {
        Self {
            schema: None,
            table: "exchange_records".to_string(),
            natural_key_column: "natural_key".to_string(),
            hash_column: "content_sha256".to_string(),
        }
    }
}

/// Default sync behavior for the dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Direction used when the caller does not specify one.
    pub direction_default: SyncDirection,
    /// Conflict strategy used when the caller does not specify one.
    pub conflict_strategy: ConflictStrategy,
}

/// Redaction configuration carried with the dataset.
///
/// Redaction itself is applied by the connectors that produce records; the
/// manifest only records the policy so packs are self-describing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactionPolicy {
    pub enabled: bool,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub headers_to_redact: Vec<String>,
}

/// Where the archive encryption key comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySourceKind {
    #[default]
    Env,
    File,
    Prompt,
}

/// Encryption configuration for cold-storage packing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionPolicy {
    pub enabled: bool,
    /// Cipher name, informational. Only AES-256-GCM is implemented.
    pub algorithm: String,
    pub key_source: KeySourceKind,
    /// Environment variable consulted when `key_source` is `env`.
    pub key_env_var: String,
    /// Key file consulted when `key_source` is `file`.
    pub key_file_path: Option<String>,
}

impl Default for EncryptionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: "AES-256-GCM".to_string(),
            key_source: KeySourceKind::Env,
            key_env_var: crate::pack::DEFAULT_KEY_ENV_VAR.to_string(),
            key_file_path: None,
        }
    }
}

/// Per-dataset manifest, persisted as `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub dataset_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,

    /// Scoping: which records belong in this dataset. `None` means
    /// unscoped on that axis.
    #[serde(default)]
    pub exchange_type: Option<String>,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,

    #[serde(default)]
    pub sql_target: SqlTarget,
    #[serde(default)]
    pub sync_policy: SyncPolicy,
    #[serde(default)]
    pub redaction_policy: RedactionPolicy,
    #[serde(default)]
    pub encryption_policy: EncryptionPolicy,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonically bumped on every writer close.
    pub version: u64,
}

impl SnapshotManifest {
    /// Create a manifest with default policies.
    #[must_use]
    pub fn new(dataset_name: &str) -> Self {
        let now = Utc::now();
        Self {
            dataset_name: dataset_name.to_string(),
            description: None,
            owner: None,
            exchange_type: None,
            source_system: None,
            entity_type: None,
            sql_target: SqlTarget::default(),
            sync_policy: SyncPolicy::default(),
            redaction_policy: RedactionPolicy::default(),
            encryption_policy: EncryptionPolicy::default(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Set the scoping triple.
    #[must_use]
    pub fn with_scope(
        mut self,
        exchange_type: Option<&str>,
        source_system: Option<&str>,
        entity_type: Option<&str>,
    ) -> Self {
        self.exchange_type = exchange_type.map(ToString::to_string);
        self.source_system = source_system.map(ToString::to_string);
        self.entity_type = entity_type.map(ToString::to_string);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Set the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    /// Bump the version and refresh `updated_at`. Called on writer close.
    pub fn bump(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Load a manifest from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatasetNotFound`] if the file does not exist, or a
    /// JSON error if it cannot be parsed. There is no implicit dataset
    /// creation on read.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::DatasetNotFound {
                path: path.parent().unwrap_or(path).to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Persist the manifest atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(path, &content)?;
        Ok(())
    }

    /// Check policy consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for contradictory policies, e.g. file-based
    /// key sourcing without a key file path.
    pub fn validate(&self) -> Result<()> {
        if self.dataset_name.trim().is_empty() {
            return Err(Error::Config("dataset_name must not be empty".to_string()));
        }
        let enc = &self.encryption_policy;
        if enc.enabled && enc.key_source == KeySourceKind::File && enc.key_file_path.is_none() {
            return Err(Error::Config(
                "encryption key_source is 'file' but key_file_path is not set".to_string(),
            ));
        }
        Ok(())
    }
}
