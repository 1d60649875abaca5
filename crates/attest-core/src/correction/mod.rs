//! Correction chains over certification versions.
//!
//! A certification is never edited in place. A correction creates a new
//! version carrying the amended fields and links the old version forward
//! to it (`corrected_by_id`), freezing the old version permanently. The
//! result is a simple path of versions — never a tree, never a cycle —
//! whose head is the single version with `is_corrected == false`.
//!
//! The chain is represented purely through the stored successor pointer
//! plus a predecessor lookup query; walks are explicit loops over row IDs
//! with a visited set, never an in-memory linked structure that could be
//! mutated outside the transaction boundary.

mod engine;
mod version;

#[cfg(test)]
mod tests;

pub use engine::{CorrectionEngine, CorrectionError, CorrectionOutcome};
pub use version::{Certification, CertificationStatus, CorrectionFields};
