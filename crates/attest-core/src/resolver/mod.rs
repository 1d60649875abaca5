//! Point-in-time reconstruction over committed correction chains.
//!
//! Read-only: the resolver consumes chain data the correction engine
//! committed and never writes. For a fixed dataset, resolution with the
//! same `(entity, date)` pair returns identical results on every call,
//! indefinitely — corrections only ever append new versions with new
//! creation timestamps, so a later correction cannot change what an
//! earlier query would have returned for dates before it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::correction::{Certification, CorrectionEngine, CorrectionError};
use crate::store::datetime_to_ns;

#[cfg(test)]
mod tests;

/// Errors that can occur during point-in-time resolution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// Chain resolution failed (unknown version, or corrupted linkage).
    #[error(transparent)]
    Chain(#[from] CorrectionError),
}

/// The answer to "what was true at this instant".
///
/// "Did not exist yet" is a distinct, typed answer: callers must be able
/// to tell "existed, here is the version current at that date" apart from
/// "the target date precedes the chain entirely".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsOfResolution {
    /// The chain's root was created after the target date.
    DidNotExist,

    /// The version that was current at the target date.
    Version(Certification),
}

impl AsOfResolution {
    /// The resolved version, if one existed at the target date.
    #[must_use]
    pub fn version(&self) -> Option<&Certification> {
        match self {
            Self::DidNotExist => None,
            Self::Version(v) => Some(v),
        }
    }
}

/// Deterministic resolver for "what was true at a past instant".
#[derive(Clone)]
pub struct PointInTimeResolver {
    engine: CorrectionEngine,
}

impl PointInTimeResolver {
    /// Creates a resolver over the given correction engine.
    #[must_use]
    pub const fn new(engine: CorrectionEngine) -> Self {
        Self { engine }
    }

    /// Resolves the version of a certification that was current at
    /// `target`.
    ///
    /// Computes the full chain, then scans oldest to newest, keeping the
    /// last version whose creation time is at or before the target date.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is unknown or the chain's linkage
    /// is corrupted.
    pub fn as_of(
        &self,
        any_version_id: &str,
        target: DateTime<Utc>,
    ) -> Result<AsOfResolution, ResolveError> {
        let chain = self.engine.chain(any_version_id)?;
        Ok(resolve_chain(&chain, target))
    }

    /// Resolves every certification an employee held at `target`.
    ///
    /// Enumerates the subject's versions, groups them into distinct
    /// chains via chain-root deduplication (each chain contributes at
    /// most once), resolves each chain, and omits chains that did not
    /// yet exist at the target date.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the subject's chains is corrupted.
    pub fn as_of_for_subject(
        &self,
        subject_id: &str,
        target: DateTime<Utc>,
    ) -> Result<Vec<Certification>, ResolveError> {
        let ids = self.engine.subject_version_ids(subject_id)?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut resolved = Vec::new();

        for id in ids {
            if seen.contains(&id) {
                continue;
            }
            let chain = self.engine.chain(&id)?;
            for version in &chain {
                seen.insert(version.id.clone());
            }
            if let AsOfResolution::Version(version) = resolve_chain(&chain, target) {
                resolved.push(version);
            }
        }

        Ok(resolved)
    }
}

fn resolve_chain(chain: &[Certification], target: DateTime<Utc>) -> AsOfResolution {
    let target_ns = datetime_to_ns(target);
    chain
        .iter()
        .take_while(|v| v.created_at_ns <= target_ns)
        .last()
        .map_or(AsOfResolution::DidNotExist, |v| {
            AsOfResolution::Version(v.clone())
        })
}
