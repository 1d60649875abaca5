//! The correction chain engine.

#![allow(clippy::cast_sign_loss)]

use std::collections::HashSet;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use super::version::{Certification, CertificationStatus, CorrectionFields};
use crate::evidence::{ActorRef, ActorType, record_with};
use crate::store::{Store, now_ns};

/// Errors that can occur during correction chain operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CorrectionError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Version not found.
    #[error("certification version not found: {version_id}")]
    NotFound {
        /// The version ID that was not found.
        version_id: String,
    },

    /// The version has already been corrected.
    ///
    /// To amend a corrected record, correct the chain's current head
    /// instead. Concurrent correction race losers receive this as well.
    #[error("certification version already corrected: {version_id}")]
    AlreadyCorrected {
        /// The version that already has a successor.
        version_id: String,
    },

    /// A chain walk re-encountered a version it had already visited.
    ///
    /// Cycles indicate corrupted linkage. The walk halts with this error;
    /// it never silently truncates.
    #[error("correction chain cycle detected at version {version_id}")]
    CycleDetected {
        /// The version that was encountered twice.
        version_id: String,
    },

    /// Chain linkage is inconsistent (dangling or contradictory pointers).
    #[error("correction chain broken at version {version_id}: {detail}")]
    BrokenChain {
        /// The version at which the inconsistency was observed.
        version_id: String,
        /// What was wrong.
        detail: String,
    },

    /// The ledger could not durably record the correction event.
    ///
    /// The enclosing transaction is rolled back: a correction that cannot
    /// be evidenced does not happen.
    #[error("evidence write failed: {0}")]
    EvidenceWrite(#[source] rusqlite::Error),
}

/// The original and corrected versions produced by a correction.
#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    /// The superseded version, now frozen with its linkage fields set.
    pub original: Certification,

    /// The new current version.
    pub corrected: Certification,
}

/// Engine for creating and resolving correction chains.
#[derive(Clone)]
pub struct CorrectionEngine {
    store: Store,
}

impl CorrectionEngine {
    /// Creates an engine over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records a manually entered certification.
    ///
    /// Persists the version and a `certification_created` evidence event
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the version or its evidence cannot be
    /// committed.
    pub fn create(&self, cert: Certification) -> Result<Certification, CorrectionError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        insert_version(&tx, &cert)?;

        let payload = json!({
            "subject_id": cert.subject_id,
            "certification_type": cert.certification_type,
            "status": cert.status.as_str(),
        });
        record_with(
            &tx,
            "Certification",
            &cert.id,
            &cert.created_by,
            None,
            "certification_created",
            &payload,
            now_ns(),
        )
        .map_err(CorrectionError::EvidenceWrite)?;

        tx.commit()?;

        info!(version_id = %cert.id, subject_id = %cert.subject_id, "certification created");
        Ok(cert)
    }

    /// Corrects a certification version.
    ///
    /// Creates a successor version carrying `fields` overlaid on the
    /// original, links the original forward to it, and records a
    /// `certification_corrected` evidence event — all in one `IMMEDIATE`
    /// transaction. A concurrent second correction of the same version
    /// sees [`CorrectionError::AlreadyCorrected`], never a silent fork.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `original_id` does not exist.
    /// - `AlreadyCorrected` if the version already has a successor
    ///   (including losing a concurrent race).
    /// - `EvidenceWrite` if the correction event cannot be recorded; the
    ///   whole correction rolls back.
    pub fn correct(
        &self,
        original_id: &str,
        reason: &str,
        actor: &ActorRef,
        fields: CorrectionFields,
    ) -> Result<CorrectionOutcome, CorrectionError> {
        self.correct_at_ns(original_id, reason, actor, fields, now_ns())
    }

    pub(crate) fn correct_at_ns(
        &self,
        original_id: &str,
        reason: &str,
        actor: &ActorRef,
        fields: CorrectionFields,
        at_ns: u64,
    ) -> Result<CorrectionOutcome, CorrectionError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let original =
            read_version(&tx, original_id)?.ok_or_else(|| CorrectionError::NotFound {
                version_id: original_id.to_string(),
            })?;

        if original.is_corrected {
            warn!(version_id = %original_id, "correction rejected: version already corrected");
            return Err(CorrectionError::AlreadyCorrected {
                version_id: original_id.to_string(),
            });
        }

        let field_changes = field_changes(&original, &fields);
        let corrected = apply_fields(&original, fields, actor, at_ns);
        insert_version(&tx, &corrected)?;

        // The guard clause makes the losing writer of a concurrent race
        // fail here even if both loaded the original before either wrote.
        let updated = tx.execute(
            "UPDATE certifications
             SET is_corrected = 1,
                 corrected_by_id = ?1,
                 correction_reason = ?2,
                 corrected_at_ns = ?3,
                 corrected_by_actor_type = ?4,
                 corrected_by_actor_id = ?5
             WHERE id = ?6 AND is_corrected = 0",
            params![
                corrected.id,
                reason,
                at_ns,
                actor.actor_type.as_str(),
                actor.actor_id,
                original_id,
            ],
        )?;
        if updated == 0 {
            warn!(version_id = %original_id, "correction rejected: lost concurrent race");
            return Err(CorrectionError::AlreadyCorrected {
                version_id: original_id.to_string(),
            });
        }

        let payload = json!({
            "original_id": original_id,
            "corrected_id": corrected.id,
            "reason": reason,
            "field_changes": field_changes,
        });
        record_with(
            &tx,
            "Certification",
            &corrected.id,
            actor,
            None,
            "certification_corrected",
            &payload,
            at_ns,
        )
        .map_err(|e| {
            error!(
                original_id,
                corrected_id = %corrected.id,
                error = %e,
                "evidence write failed; rolling back correction"
            );
            CorrectionError::EvidenceWrite(e)
        })?;

        tx.commit()?;

        info!(
            original_id,
            corrected_id = %corrected.id,
            reason,
            "certification corrected"
        );

        let mut original = original;
        original.is_corrected = true;
        original.corrected_by_id = Some(corrected.id.clone());
        original.correction_reason = Some(reason.to_string());
        original.corrected_at_ns = Some(at_ns);
        original.corrected_by = Some(actor.clone());

        Ok(CorrectionOutcome {
            original,
            corrected,
        })
    }

    /// Reads a single version.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no version exists with that ID.
    pub fn version(&self, version_id: &str) -> Result<Certification, CorrectionError> {
        let conn = self.store.conn();
        read_version(&conn, version_id)?.ok_or_else(|| CorrectionError::NotFound {
            version_id: version_id.to_string(),
        })
    }

    /// Resolves the full correction chain containing a version,
    /// oldest first.
    ///
    /// Walks backward via predecessor lookup to the chain's root, then
    /// forward via `corrected_by_id` to the head (the single version with
    /// `is_corrected == false`). Both walks maintain a visited set; a
    /// re-encountered version halts with [`CorrectionError::CycleDetected`]
    /// rather than truncating.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `any_version_id` does not exist.
    /// - `CycleDetected` / `BrokenChain` on corrupted linkage.
    pub fn chain(&self, any_version_id: &str) -> Result<Vec<Certification>, CorrectionError> {
        // One lock for the whole walk: the chain cannot be observed
        // half-migrated.
        let conn = self.store.conn();
        chain_on(&conn, any_version_id)
    }

    /// Resolves the chain's current head.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::chain`].
    pub fn current(&self, any_version_id: &str) -> Result<Certification, CorrectionError> {
        let mut chain = self.chain(any_version_id)?;
        chain.pop().ok_or_else(|| CorrectionError::NotFound {
            version_id: any_version_id.to_string(),
        })
    }

    /// IDs of every version belonging to a subject, oldest first.
    pub(crate) fn subject_version_ids(
        &self,
        subject_id: &str,
    ) -> Result<Vec<String>, CorrectionError> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM certifications
             WHERE subject_id = ?1
             ORDER BY created_at_ns ASC, rowid ASC",
        )?;
        let ids = stmt
            .query_map(params![subject_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

/// Chain resolution on an already-locked connection.
pub(crate) fn chain_on(
    conn: &Connection,
    any_version_id: &str,
) -> Result<Vec<Certification>, CorrectionError> {
    let start = read_version(conn, any_version_id)?.ok_or_else(|| CorrectionError::NotFound {
        version_id: any_version_id.to_string(),
    })?;

    // Backward to the root.
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.id.clone());
    let mut root = start;
    while let Some(prev) = predecessor_of(conn, &root.id)? {
        if !visited.insert(prev.id.clone()) {
            error!(version_id = %prev.id, "cycle detected during backward chain walk");
            return Err(CorrectionError::CycleDetected {
                version_id: prev.id,
            });
        }
        root = prev;
    }

    // Forward from the root to the head.
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root.id.clone());
    let mut chain = vec![root];

    loop {
        // Chain is never empty: it starts with the root.
        let tail = &chain[chain.len() - 1];

        match (tail.is_corrected, tail.corrected_by_id.clone()) {
            (false, None) => break,
            (false, Some(next_id)) => {
                error!(version_id = %tail.id, "uncorrected version carries a successor pointer");
                return Err(CorrectionError::BrokenChain {
                    version_id: tail.id.clone(),
                    detail: format!("is_corrected is false but corrected_by_id = {next_id}"),
                });
            }
            (true, None) => {
                error!(version_id = %tail.id, "corrected version lacks a successor pointer");
                return Err(CorrectionError::BrokenChain {
                    version_id: tail.id.clone(),
                    detail: "is_corrected is true but corrected_by_id is null".to_string(),
                });
            }
            (true, Some(next_id)) => {
                if !visited.insert(next_id.clone()) {
                    error!(version_id = %next_id, "cycle detected during forward chain walk");
                    return Err(CorrectionError::CycleDetected {
                        version_id: next_id,
                    });
                }
                let tail_id = tail.id.clone();
                let next =
                    read_version(conn, &next_id)?.ok_or_else(|| CorrectionError::BrokenChain {
                        version_id: tail_id,
                        detail: format!("successor {next_id} does not exist"),
                    })?;
                chain.push(next);
            }
        }
    }

    Ok(chain)
}

fn apply_fields(
    original: &Certification,
    fields: CorrectionFields,
    actor: &ActorRef,
    at_ns: u64,
) -> Certification {
    Certification {
        id: uuid::Uuid::new_v4().to_string(),
        subject_id: original.subject_id.clone(),
        certification_type: fields
            .certification_type
            .unwrap_or_else(|| original.certification_type.clone()),
        issuing_authority: fields
            .issuing_authority
            .unwrap_or_else(|| original.issuing_authority.clone()),
        issued_on: fields.issued_on.or(original.issued_on),
        expires_on: fields.expires_on.or(original.expires_on),
        status: fields.status.unwrap_or(original.status),
        created_at_ns: at_ns,
        created_by: actor.clone(),
        is_corrected: false,
        corrected_by_id: None,
        correction_reason: None,
        corrected_at_ns: None,
        corrected_by: None,
    }
}

fn field_changes(original: &Certification, fields: &CorrectionFields) -> serde_json::Value {
    let mut changes = serde_json::Map::new();

    if let Some(new) = &fields.certification_type {
        if *new != original.certification_type {
            changes.insert(
                "certification_type".to_string(),
                json!({ "from": original.certification_type, "to": new }),
            );
        }
    }
    if let Some(new) = &fields.issuing_authority {
        if *new != original.issuing_authority {
            changes.insert(
                "issuing_authority".to_string(),
                json!({ "from": original.issuing_authority, "to": new }),
            );
        }
    }
    if let Some(new) = fields.issued_on {
        if Some(new) != original.issued_on {
            changes.insert(
                "issued_on".to_string(),
                json!({ "from": original.issued_on, "to": new }),
            );
        }
    }
    if let Some(new) = fields.expires_on {
        if Some(new) != original.expires_on {
            changes.insert(
                "expires_on".to_string(),
                json!({ "from": original.expires_on, "to": new }),
            );
        }
    }
    if let Some(new) = fields.status {
        if new != original.status {
            changes.insert(
                "status".to_string(),
                json!({ "from": original.status.as_str(), "to": new.as_str() }),
            );
        }
    }

    serde_json::Value::Object(changes)
}

fn insert_version(conn: &Connection, cert: &Certification) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO certifications (
            id, subject_id, certification_type, issuing_authority,
            issued_on, expires_on, status, created_at_ns,
            created_by_actor_type, created_by_actor_id,
            is_corrected, corrected_by_id, correction_reason,
            corrected_at_ns, corrected_by_actor_type, corrected_by_actor_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            cert.id,
            cert.subject_id,
            cert.certification_type,
            cert.issuing_authority,
            cert.issued_on.map(|d| d.to_string()),
            cert.expires_on.map(|d| d.to_string()),
            cert.status.as_str(),
            cert.created_at_ns,
            cert.created_by.actor_type.as_str(),
            cert.created_by.actor_id,
            cert.is_corrected,
            cert.corrected_by_id,
            cert.correction_reason,
            cert.corrected_at_ns,
            cert.corrected_by.as_ref().map(|a| a.actor_type.as_str()),
            cert.corrected_by.as_ref().map(|a| a.actor_id.clone()),
        ],
    )?;
    Ok(())
}

const VERSION_COLUMNS: &str = "id, subject_id, certification_type, issuing_authority, \
     issued_on, expires_on, status, created_at_ns, \
     created_by_actor_type, created_by_actor_id, \
     is_corrected, corrected_by_id, correction_reason, \
     corrected_at_ns, corrected_by_actor_type, corrected_by_actor_id";

pub(crate) fn read_version(
    conn: &Connection,
    version_id: &str,
) -> Result<Option<Certification>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM certifications WHERE id = ?1"),
        params![version_id],
        map_version,
    )
    .optional()
}

fn predecessor_of(
    conn: &Connection,
    version_id: &str,
) -> Result<Option<Certification>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM certifications WHERE corrected_by_id = ?1"),
        params![version_id],
        map_version,
    )
    .optional()
}

fn map_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<Certification> {
    let parse_actor_type = |idx: usize, raw: &str| {
        ActorType::parse(raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                format!("unknown actor type: {raw}").into(),
            )
        })
    };
    let parse_date = |idx: usize, raw: Option<String>| {
        raw.map(|s| {
            s.parse::<chrono::NaiveDate>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        })
        .transpose()
    };

    let status_raw: String = row.get(6)?;
    let status = CertificationStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown certification status: {status_raw}").into(),
        )
    })?;

    let created_by_type_raw: String = row.get(8)?;
    let created_by = ActorRef {
        actor_type: parse_actor_type(8, &created_by_type_raw)?,
        actor_id: row.get(9)?,
    };

    let corrected_by_type_raw: Option<String> = row.get(14)?;
    let corrected_by_id_raw: Option<String> = row.get(15)?;
    let corrected_by = match (corrected_by_type_raw, corrected_by_id_raw) {
        (Some(t), Some(id)) => Some(ActorRef {
            actor_type: parse_actor_type(14, &t)?,
            actor_id: id,
        }),
        _ => None,
    };

    Ok(Certification {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        certification_type: row.get(2)?,
        issuing_authority: row.get(3)?,
        issued_on: parse_date(4, row.get(4)?)?,
        expires_on: parse_date(5, row.get(5)?)?,
        status,
        created_at_ns: row.get::<_, i64>(7)? as u64,
        created_by,
        is_corrected: row.get(10)?,
        corrected_by_id: row.get(11)?,
        correction_reason: row.get(12)?,
        corrected_at_ns: row.get::<_, Option<i64>>(13)?.map(|n| n as u64),
        corrected_by,
    })
}
