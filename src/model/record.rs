//! The exchange record envelope.
//!
//! An [`ExchangeRecord`] is the atomic unit of exchange: one fetched or
//! derived interaction with an external system. Records are created once by
//! a collaborator and immutable thereafter; a new observation of the same
//! entity with different content is a new record, never an in-place update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::content_hash;

/// One fetched/derived interaction with an external or internal system.
///
/// The record's identity is `content_sha256`, computed over
/// `{exchange_type, source_system, entity_type, natural_key, request,
/// response}` — two records with identical hash are duplicates regardless of
/// `exchange_id` or `observed_at_utc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// Globally unique identifier, assigned at creation, never reused.
    pub exchange_id: String,

    /// Classification of the interaction (e.g., "fetch", "derive").
    pub exchange_type: String,

    /// System the record came from (e.g., "wikipedia", "crossref").
    pub source_system: String,

    /// Kind of entity observed (e.g., "page", "article").
    pub entity_type: String,

    /// Stable business identifier of the real-world entity, when one exists
    /// (page id, DOI, ...). Groups hash-distinct versions of one entity.
    pub natural_key: Option<String>,

    /// Request payload, opaque to the core beyond canonicalization.
    pub request: Value,

    /// Response payload, opaque to the core beyond canonicalization.
    pub response: Value,

    /// When the observation was made. Excluded from the content hash.
    pub observed_at_utc: DateTime<Utc>,

    /// Content-addressed identity. Derived, immutable once computed.
    pub content_sha256: String,

    /// Where the record came from (connector name, job id, ...).
    #[serde(default)]
    pub provenance: Value,

    /// Free-form labels. Non-identity-bearing.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Names of redaction rules that were applied before storage.
    #[serde(default)]
    pub redactions_applied: Vec<String>,

    /// Envelope schema version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// External reference to an offloaded response body, if any.
    #[serde(default)]
    pub response_ref: Option<String>,
}

const fn default_schema_version() -> u32 {
    1
}

impl ExchangeRecord {
    /// Create a new record, assigning `exchange_id`, `observed_at_utc`, and
    /// the derived `content_sha256`.
    #[must_use]
    pub fn new(
        exchange_type: &str,
        source_system: &str,
        entity_type: &str,
        natural_key: Option<&str>,
        request: Value,
        response: Value,
    ) -> Self {
        let hash = content_hash(
            exchange_type,
            source_system,
            entity_type,
            natural_key,
            &request,
            &response,
        );
        Self {
            exchange_id: uuid::Uuid::new_v4().to_string(),
            exchange_type: exchange_type.to_string(),
            source_system: source_system.to_string(),
            entity_type: entity_type.to_string(),
            natural_key: natural_key.map(ToString::to_string),
            request,
            response,
            observed_at_utc: Utc::now(),
            content_sha256: hash,
            provenance: Value::Null,
            tags: Vec::new(),
            redactions_applied: Vec::new(),
            schema_version: default_schema_version(),
            response_ref: None,
        }
    }

    /// Recompute the content hash from the current identity fields.
    ///
    /// Matches `content_sha256` for any record produced by this crate.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        content_hash(
            &self.exchange_type,
            &self.source_system,
            &self.entity_type,
            self.natural_key.as_deref(),
            &self.request,
            &self.response,
        )
    }

    /// The secondary index key grouping hash-distinct versions of one
    /// natural entity: `source_system|entity_type|natural_key`.
    ///
    /// Records without a natural key get an empty final segment.
    #[must_use]
    pub fn hash_input_key(&self) -> String {
        hash_input_key(
            &self.source_system,
            &self.entity_type,
            self.natural_key.as_deref(),
        )
    }

    /// Set the natural key. Identity-bearing, so the hash is recomputed.
    #[must_use]
    pub fn with_natural_key(mut self, key: &str) -> Self {
        self.natural_key = Some(key.to_string());
        self.content_sha256 = self.compute_hash();
        self
    }

    /// Set tags. Non-identity-bearing.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set provenance metadata. Non-identity-bearing.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Value) -> Self {
        self.provenance = provenance;
        self
    }

    /// Override the observation timestamp. Non-identity-bearing.
    #[must_use]
    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at_utc = observed_at;
        self
    }
}

/// Build the secondary index key from its parts.
#[must_use]
pub fn hash_input_key(source_system: &str, entity_type: &str, natural_key: Option<&str>) -> String {
    format!(
        "{source_system}|{entity_type}|{}",
        natural_key.unwrap_or("")
    )
}
