//! The evidence writer: node + first ledger entry as one atomic unit.

#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::record::{ActorRef, ActorType, EvidenceNode, EvidenceReceipt, LedgerEntry};
use crate::crypto::IntegrityHasher;
use crate::store::{Store, now_ns};

/// Errors that can occur during evidence operations.
///
/// Any variant reaching the caller of a domain operation means the
/// operation as a whole failed: the ledger could not durably record the
/// event, and failure must be reported rather than an unrecorded success.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EvidenceError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Evidence node not found.
    #[error("evidence node not found: {node_id}")]
    NodeNotFound {
        /// The node ID that was not found.
        node_id: String,
    },
}

/// Writer for evidence nodes and ledger entries.
///
/// [`EvidenceWriter::record`] is the unit of "something happened and was
/// recorded": it creates the node and its first entry in one transaction.
/// If an append fails after a node was created, the node is left as-is
/// rather than retried with mutated content; the calling operation must
/// treat the overall action as failed and may record the failure as a new
/// node (failure is itself evidence, not silence).
#[derive(Clone)]
pub struct EvidenceWriter {
    store: Store,
}

impl EvidenceWriter {
    /// Creates a writer over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records an event: one evidence node plus its first ledger entry,
    /// committed atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be committed. No partial state
    /// is left behind: the node and the first entry land together or not
    /// at all.
    pub fn record(
        &self,
        entity_type: &str,
        entity_id: &str,
        actor: &ActorRef,
        location_id: Option<&str>,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<EvidenceReceipt, EvidenceError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let (node, entry_id) = record_with(
            &tx,
            entity_type,
            entity_id,
            actor,
            location_id,
            event_type,
            payload,
            now_ns(),
        )?;

        tx.commit()?;

        debug!(
            node_id = %node.id,
            entity_type,
            entity_id,
            event_type,
            "evidence recorded"
        );

        Ok(EvidenceReceipt::new(node.id, entry_id, node.created_at_ns))
    }

    /// Appends a further ledger entry to an existing evidence node.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node does not exist, or a database
    /// error if the append cannot be committed.
    pub fn append_entry(
        &self,
        node_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<LedgerEntry, EvidenceError> {
        let conn = self.store.conn();

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM evidence_nodes WHERE id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(EvidenceError::NodeNotFound {
                node_id: node_id.to_string(),
            });
        }

        let created_at_ns = now_ns();
        let entry_id = insert_entry(&conn, node_id, event_type, payload, created_at_ns)?;

        Ok(LedgerEntry {
            id: entry_id,
            evidence_node_id: node_id.to_string(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
            created_at_ns,
        })
    }

    /// Reads a single evidence node.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if no node exists with that ID.
    pub fn node(&self, node_id: &str) -> Result<EvidenceNode, EvidenceError> {
        let conn = self.store.conn();

        conn.query_row(
            "SELECT id, entity_type, entity_id, actor_type, actor_id, location_id, created_at_ns, integrity_hash
             FROM evidence_nodes
             WHERE id = ?1",
            params![node_id],
            map_node,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => EvidenceError::NodeNotFound {
                node_id: node_id.to_string(),
            },
            other => EvidenceError::Database(other),
        })
    }

    /// Reads the ledger entries for a node, in append order.
    ///
    /// Ordering is by creation time, ties broken by insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entries(&self, node_id: &str) -> Result<Vec<LedgerEntry>, EvidenceError> {
        let conn = self.store.conn();

        let mut stmt = conn.prepare(
            "SELECT id, evidence_node_id, event_type, payload, created_at_ns
             FROM ledger_entries
             WHERE evidence_node_id = ?1
             ORDER BY created_at_ns ASC, id ASC",
        )?;

        let entries = stmt
            .query_map(params![node_id], map_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Reads all evidence nodes about an entity, oldest first.
    ///
    /// This is the raw read surface the export collaborator consumes; it
    /// selects and formats, never mutates.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn nodes_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<EvidenceNode>, EvidenceError> {
        let conn = self.store.conn();

        let mut stmt = conn.prepare(
            "SELECT id, entity_type, entity_id, actor_type, actor_id, location_id, created_at_ns, integrity_hash
             FROM evidence_nodes
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY created_at_ns ASC, rowid ASC",
        )?;

        let nodes = stmt
            .query_map(params![entity_type, entity_id], map_node)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(nodes)
    }
}

/// Inserts an evidence node plus its first ledger entry on the given
/// connection (or open transaction).
///
/// Shared by the writer, the correction engine and the token service so
/// that each domain operation can fold the evidence append into its own
/// transaction.
#[allow(clippy::too_many_arguments)]
pub(crate) fn record_with(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    actor: &ActorRef,
    location_id: Option<&str>,
    event_type: &str,
    payload: &serde_json::Value,
    created_at_ns: u64,
) -> Result<(EvidenceNode, u64), rusqlite::Error> {
    let node = EvidenceNode {
        id: Uuid::new_v4().to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        actor: actor.clone(),
        location_id: location_id.map(ToString::to_string),
        created_at_ns,
        integrity_hash: IntegrityHasher::hash_node(
            entity_type,
            entity_id,
            actor.actor_type.as_str(),
            &actor.actor_id,
            location_id,
            created_at_ns,
        ),
    };

    conn.execute(
        "INSERT INTO evidence_nodes (id, entity_type, entity_id, actor_type, actor_id, location_id, created_at_ns, integrity_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            node.id,
            node.entity_type,
            node.entity_id,
            node.actor.actor_type.as_str(),
            node.actor.actor_id,
            node.location_id,
            node.created_at_ns,
            node.integrity_hash.as_slice(),
        ],
    )?;

    let entry_id = insert_entry(conn, &node.id, event_type, payload, created_at_ns)?;

    Ok((node, entry_id))
}

fn insert_entry(
    conn: &Connection,
    node_id: &str,
    event_type: &str,
    payload: &serde_json::Value,
    created_at_ns: u64,
) -> Result<u64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO ledger_entries (evidence_node_id, event_type, payload, created_at_ns)
         VALUES (?1, ?2, ?3, ?4)",
        params![node_id, event_type, payload.to_string(), created_at_ns],
    )?;

    Ok(conn.last_insert_rowid() as u64)
}

fn map_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvidenceNode> {
    let actor_type_raw: String = row.get(3)?;
    let actor_type = ActorType::parse(&actor_type_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown actor type: {actor_type_raw}").into(),
        )
    })?;

    let hash_raw: Vec<u8> = row.get(7)?;
    let integrity_hash = hash_raw.try_into().map_err(|raw: Vec<u8>| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Blob,
            format!("integrity hash has {} bytes, expected 32", raw.len()).into(),
        )
    })?;

    Ok(EvidenceNode {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        actor: ActorRef {
            actor_type,
            actor_id: row.get(4)?,
        },
        location_id: row.get(5)?,
        created_at_ns: row.get::<_, i64>(6)? as u64,
        integrity_hash,
    })
}

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let payload_raw: String = row.get(3)?;
    let payload = serde_json::from_str(&payload_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
    })?;

    Ok(LedgerEntry {
        id: row.get::<_, i64>(0)? as u64,
        evidence_node_id: row.get(1)?,
        event_type: row.get(2)?,
        payload,
        created_at_ns: row.get::<_, i64>(4)? as u64,
    })
}
