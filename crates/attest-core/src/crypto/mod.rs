//! Hashing primitives for evidence integrity.

mod hash;

pub use hash::{HASH_SIZE, Hash, IntegrityError, IntegrityHasher};
