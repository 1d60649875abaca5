//! Evidence nodes and the append-only ledger behind every mutation.
//!
//! An [`EvidenceNode`] records that "an event happened, attributed to an
//! actor, about something". Each node owns one or more [`LedgerEntry`]
//! facts. Both record kinds are immutable once committed; the store's
//! triggers reject any update or delete.
//!
//! The [`EvidenceWriter`] creates a node together with its first ledger
//! entry in a single transaction, so a node is never observable without at
//! least one entry. The [`EvidenceReceipt`] it returns is proof of a
//! committed write: it cannot be constructed outside this crate, which is
//! what lets the verification service's fail-closed result type demand one.

mod record;
mod writer;

#[cfg(test)]
mod tests;

pub use record::{ActorRef, ActorType, EvidenceNode, EvidenceReceipt, LedgerEntry};
pub use writer::{EvidenceError, EvidenceWriter};

pub(crate) use writer::record_with;
