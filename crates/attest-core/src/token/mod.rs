//! Short-lived signed verification tokens and their mandatory evidence
//! side effect.
//!
//! A token binds an entity to a point of verification. It is
//! self-contained: the payload (entity, issue and expiry instants) is
//! signed with a keyed MAC, so validation needs no server-side session
//! state. Every scan attempt that reaches signature/expiry validation
//! produces exactly one evidence node + ledger entry — the scan record is
//! the legal proof that verification occurred.
//!
//! Fail-closed contract: [`TokenService::verify`] cannot report the
//! entity's compliance status without holding a committed
//! [`crate::evidence::EvidenceReceipt`]. If the evidence write fails, the
//! caller sees a failure, never a status.

mod service;
mod wire;


pub use service::{
    IssuedToken, ScanEvent, TokenError, TokenService, VerificationFailure, VerificationOutcome,
};
pub use wire::{TokenPayload, TokenSecret};
