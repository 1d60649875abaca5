//! Evidence record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, IntegrityError, IntegrityHasher};
use crate::store::ns_to_datetime;

/// Kind of actor an event is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    /// A back-office user (auditor, compliance officer).
    User,
    /// The employee the record is about.
    Employee,
    /// The system itself (scheduled jobs, scan endpoints).
    System,
}

impl ActorType {
    /// Storage representation of the actor type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Employee => "employee",
            Self::System => "system",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "employee" => Some(Self::Employee),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// An actor reference: who an event is attributed to.
///
/// Supplied by the authorization layer; this crate trusts it as given and
/// performs no authentication of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    /// The kind of actor.
    pub actor_type: ActorType,

    /// The actor's identifier in the collaborating system.
    pub actor_id: String,
}

impl ActorRef {
    /// Creates an actor reference.
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
        }
    }
}

/// Immutable record that an event happened.
///
/// Created exactly once per recorded event; never updated, never deleted.
/// Referenced by one or more ledger entries.
#[derive(Debug, Clone)]
pub struct EvidenceNode {
    /// Node identifier (UUID).
    pub id: String,

    /// Kind of entity the event is about (e.g. `"Certification"`).
    pub entity_type: String,

    /// Identifier of the entity the event is about.
    pub entity_id: String,

    /// Who the event is attributed to.
    pub actor: ActorRef,

    /// Optional location the event happened at.
    pub location_id: Option<String>,

    /// Server-assigned creation time, nanoseconds since the Unix epoch.
    pub created_at_ns: u64,

    /// Content hash over this node's own fields; cheap tamper indicator.
    pub integrity_hash: Hash,
}

impl EvidenceNode {
    /// Server-assigned creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        ns_to_datetime(self.created_at_ns)
    }

    /// Recomputes the integrity hash and compares it to the stored one.
    ///
    /// # Errors
    ///
    /// Returns `HashMismatch` if the row was tampered with outside the
    /// store's append path.
    pub fn verify_integrity(&self) -> Result<(), IntegrityError> {
        IntegrityHasher::verify_node(
            &self.id,
            &self.entity_type,
            &self.entity_id,
            self.actor.actor_type.as_str(),
            &self.actor.actor_id,
            self.location_id.as_deref(),
            self.created_at_ns,
            &self.integrity_hash,
        )
    }
}

/// One fact appended to an evidence node's history.
///
/// Append-only: a node may accumulate entries over time but no entry is
/// ever mutated or removed. Ordering within a node is by creation time,
/// ties broken by insertion order.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Entry identifier (assigned by the store on append).
    pub id: u64,

    /// The owning evidence node.
    pub evidence_node_id: String,

    /// Event type tag (e.g. `"certification_corrected"`, `"QR_SCAN"`).
    pub event_type: String,

    /// Event-specific structured payload, opaque to the ledger itself.
    pub payload: serde_json::Value,

    /// Append time, nanoseconds since the Unix epoch.
    pub created_at_ns: u64,
}

impl LedgerEntry {
    /// Append time of this entry.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        ns_to_datetime(self.created_at_ns)
    }
}

/// Proof that an evidence write was committed.
///
/// Only this crate can construct a receipt, and it only does so after the
/// transaction inserting the node and its first ledger entry has
/// committed. Holding one is the precondition for reporting any
/// verification result.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct EvidenceReceipt {
    /// The committed evidence node.
    pub node_id: String,

    /// The committed first ledger entry.
    pub entry_id: u64,

    /// When the write was recorded, nanoseconds since the Unix epoch.
    pub recorded_at_ns: u64,
}

impl EvidenceReceipt {
    pub(crate) const fn new(node_id: String, entry_id: u64, recorded_at_ns: u64) -> Self {
        Self {
            node_id,
            entry_id,
            recorded_at_ns,
        }
    }

    /// When the write was recorded.
    #[must_use]
    pub fn recorded_at(&self) -> DateTime<Utc> {
        ns_to_datetime(self.recorded_at_ns)
    }
}
