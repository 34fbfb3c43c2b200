//! Data types: the exchange record envelope and the dataset manifest.

mod manifest;
mod record;

pub use manifest::{
    EncryptionPolicy, KeySourceKind, RedactionPolicy, SnapshotManifest, SqlTarget, SyncPolicy,
};
pub use record::{hash_input_key, ExchangeRecord};
