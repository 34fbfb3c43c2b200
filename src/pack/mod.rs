//! Cold-storage archival: zip packing with optional authenticated
//! encryption, and pluggable key sourcing.

mod archive;
mod crypto;
mod key;

pub use archive::{PackMeta, SnapshotPacker, SnapshotUnpacker, ENCRYPTED_SUFFIX, PACK_META_FILE};
pub use crypto::{AesGcmEncryption, DisabledEncryption, EncryptionProvider, NONCE_SIZE, TAG_SIZE};
pub use key::{provider_for, KeySource};

/// Environment variable consulted for key material by default.
pub const DEFAULT_KEY_ENV_VAR: &str = "SNAPSHOT_ENCRYPTION_KEY";
