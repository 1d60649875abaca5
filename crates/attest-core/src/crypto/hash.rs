//! SHA-256 content hashing for evidence nodes.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of a SHA-256 hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Type alias for a 32-byte hash.
pub type Hash = [u8; HASH_SIZE];

/// Errors that can occur during integrity verification.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// The stored hash doesn't match the recomputed value.
    #[error("evidence node {node_id} failed integrity check: expected {expected}, got {actual}")]
    HashMismatch {
        /// The node whose hash failed verification.
        node_id: String,
        /// The stored hash (hex-encoded).
        expected: String,
        /// The recomputed hash (hex-encoded).
        actual: String,
    },
}

/// Hasher for evidence node content.
///
/// The hash is a cheap tamper indicator computed over the node's own
/// fields in a canonical, length-prefixed layout so that field boundaries
/// cannot be confused (`"ab" + "c"` never hashes like `"a" + "bc"`).
pub struct IntegrityHasher;

impl IntegrityHasher {
    /// Hashes an evidence node's fields.
    #[must_use]
    pub fn hash_node(
        entity_type: &str,
        entity_id: &str,
        actor_type: &str,
        actor_id: &str,
        location_id: Option<&str>,
        created_at_ns: u64,
    ) -> Hash {
        let mut hasher = Sha256::new();
        for field in [entity_type, entity_id, actor_type, actor_id] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        match location_id {
            Some(location) => {
                hasher.update([1u8]);
                hasher.update((location.len() as u64).to_le_bytes());
                hasher.update(location.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(created_at_ns.to_le_bytes());
        hasher.finalize().into()
    }

    /// Verifies a node's stored hash against its fields.
    ///
    /// # Errors
    ///
    /// Returns `HashMismatch` if the recomputed hash differs from the
    /// stored one, meaning the row was tampered with outside the store's
    /// append path.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_node(
        node_id: &str,
        entity_type: &str,
        entity_id: &str,
        actor_type: &str,
        actor_id: &str,
        location_id: Option<&str>,
        created_at_ns: u64,
        stored: &Hash,
    ) -> Result<(), IntegrityError> {
        let computed = Self::hash_node(
            entity_type,
            entity_id,
            actor_type,
            actor_id,
            location_id,
            created_at_ns,
        );
        if computed != *stored {
            return Err(IntegrityError::HashMismatch {
                node_id: node_id.to_string(),
                expected: hex::encode(stored),
                actual: hex::encode(computed),
            });
        }
        Ok(())
    }
}
