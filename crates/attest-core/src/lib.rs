//! Tamper-evident compliance history core.
//!
//! This crate records regulated compliance facts (certifications) about
//! employees and can prove, years later, exactly what was true at any past
//! instant. No committed record is ever altered or deleted.
//!
//! # Architecture
//!
//! - [`store`]: `SQLite`-backed store; the evidence tables are locked
//!   append-only by database triggers, not just by convention.
//! - [`evidence`]: creates an evidence node plus at least one ledger entry
//!   as a single atomic unit — the unit of "something happened and was
//!   recorded".
//! - [`correction`]: amends a certification without destroying its prior
//!   state, linking versions into a forward-pointing correction chain.
//! - [`resolver`]: deterministic point-in-time reconstruction over
//!   committed chain data. Read-only.
//! - [`token`]: short-lived HMAC-signed verification tokens whose scan
//!   events become part of the immutable record. Fail-closed: a scan whose
//!   evidence write cannot be committed is reported as failed, never as
//!   passed.
//! - [`config`]: file-based configuration with fail-closed validation.
//!
//! # Example
//!
//! ```rust,no_run
//! use attest_core::correction::{Certification, CertificationStatus, CorrectionEngine, CorrectionFields};
//! use attest_core::evidence::{ActorRef, ActorType};
//! use attest_core::store::Store;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("/var/lib/attest/attest.db")?;
//! let engine = CorrectionEngine::new(store);
//!
//! let actor = ActorRef::new(ActorType::User, "auditor-7");
//! let cert = engine.create(Certification::new(
//!     "employee-42",
//!     "forklift-operator",
//!     "State Board",
//!     None,
//!     None,
//!     CertificationStatus::Valid,
//!     actor.clone(),
//! ))?;
//!
//! let outcome = engine.correct(
//!     &cert.id,
//!     "wrong expiration date",
//!     &actor,
//!     CorrectionFields::default(),
//! )?;
//! assert_eq!(outcome.original.corrected_by_id.as_deref(), Some(outcome.corrected.id.as_str()));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod correction;
pub mod crypto;
pub mod evidence;
pub mod resolver;
pub mod store;
pub mod token;

pub use config::{ConfigError, CoreConfig};
pub use correction::{
    Certification, CertificationStatus, CorrectionEngine, CorrectionError, CorrectionFields,
    CorrectionOutcome,
};
pub use evidence::{
    ActorRef, ActorType, EvidenceError, EvidenceNode, EvidenceReceipt, EvidenceWriter, LedgerEntry,
};
pub use resolver::{AsOfResolution, PointInTimeResolver, ResolveError};
pub use store::{Store, StoreStats};
pub use token::{
    IssuedToken, ScanEvent, TokenError, TokenPayload, TokenSecret, TokenService,
    VerificationFailure, VerificationOutcome,
};
