//! The verification token service.

#![allow(clippy::cast_sign_loss)]

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::wire::{self, TokenPayload, TokenSecret};
use crate::correction::{CertificationStatus, CorrectionEngine, CorrectionError};
use crate::evidence::{ActorRef, EvidenceReceipt, record_with};
use crate::store::{Store, datetime_to_ns, ns_to_datetime};

/// Entity attribution for scans whose signature did not verify: the
/// payload is unauthenticated, so its claimed entity must not enter the
/// ledger as fact.
const UNAUTHENTICATED_ENTITY: &str = "unauthenticated";

/// Errors that can occur during token operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The token string could not be decoded.
    #[error("malformed token: {reason}")]
    Malformed {
        /// What was wrong with the encoding.
        reason: String,
    },

    /// The signature does not match the payload.
    #[error("bad token signature")]
    BadSignature,

    /// The token is past its expiry instant.
    #[error("token expired at {expired_at} (unix seconds)")]
    Expired {
        /// Expiry instant, unix seconds.
        expired_at: i64,
    },

    /// The token was revoked before expiry.
    #[error("token revoked: {token_id}")]
    Revoked {
        /// The revoked token.
        token_id: String,
    },

    /// Token not found.
    #[error("token not found: {token_id}")]
    NotFound {
        /// The token ID that was not found.
        token_id: String,
    },

    /// An unexpired, unrevoked token already exists for the entity.
    ///
    /// No token is re-issued for the same purpose while one is still
    /// active.
    #[error("active token already exists for entity {entity_id}: {token_id}")]
    ActiveTokenExists {
        /// The outstanding token.
        token_id: String,
        /// The entity it is bound to.
        entity_id: String,
    },

    /// The configured secret is too short to sign with.
    #[error("token secret too short: {len} bytes, minimum {min}")]
    SecretTooShort {
        /// Actual secret length.
        len: usize,
        /// Minimum accepted length.
        min: usize,
    },

    /// The bound entity could not be resolved.
    #[error(transparent)]
    Entity(#[from] CorrectionError),
}

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Token identifier (UUID).
    pub token_id: String,

    /// The encoded wire token: `base64url(payload)|hex(mac)`.
    pub token: String,

    /// The certification version the token is bound to.
    pub entity_id: String,

    /// Issue instant.
    pub issued_at: DateTime<Utc>,

    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// A recorded scan attempt.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    /// Scan identifier (assigned by the store).
    pub id: u64,

    /// The token that was presented, when its ID was trustworthy.
    pub token_id: Option<String>,

    /// The entity the scan was recorded against.
    pub entity_id: String,

    /// Scan instant, nanoseconds since the Unix epoch.
    pub scanned_at_ns: u64,

    /// The scan result tag (`"ok"`, `"not_compliant"`, `"expired"`, …).
    pub result: String,

    /// The entity's status at the moment of scan, copied, not referenced
    /// live.
    pub status_at_scan: Option<String>,

    /// Where the scan happened.
    pub location_id: Option<String>,
}

impl ScanEvent {
    /// Scan instant.
    #[must_use]
    pub fn scanned_at(&self) -> DateTime<Utc> {
        ns_to_datetime(self.scanned_at_ns)
    }
}

/// Why a verification reported failure.
///
/// Distinguished for the caller's logs; the user-visible answer is the
/// same for all of them: "verification failed", with no compliance status
/// attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerificationFailure {
    /// The token string could not be decoded.
    Malformed,
    /// The signature did not verify.
    BadSignature,
    /// The token was past expiry.
    Expired,
    /// The token was revoked.
    Revoked,
    /// The bound entity does not exist.
    UnknownEntity,
    /// Chain resolution or another internal step failed.
    Internal,
    /// The mandatory evidence write could not be committed.
    EvidenceUnavailable,
}

/// Result of a verification scan.
///
/// `Verified` carries an [`EvidenceReceipt`], which only this crate can
/// construct and only after the scan's evidence write committed. There is
/// no code path that reports a compliance status without that durable
/// record.
#[derive(Debug)]
pub enum VerificationOutcome {
    /// The token validated and the entity's status was recorded at the
    /// moment of scan.
    Verified {
        /// Whether the entity was compliant (status `VALID`).
        compliant: bool,

        /// The entity's status at the moment of scan.
        status_at_scan: CertificationStatus,

        /// Proof the scan record was committed.
        receipt: EvidenceReceipt,
    },

    /// Verification failed. No compliance status is reported.
    Failed {
        /// Why, for the caller's own logs.
        reason: VerificationFailure,
    },
}

/// Issues, validates and verifies tokens; every verification attempt that
/// reaches signature/expiry validation leaves a scan record in the ledger.
#[derive(Clone)]
pub struct TokenService {
    store: Store,
    engine: CorrectionEngine,
    secret: TokenSecret,
}

impl TokenService {
    /// Creates a service over the given store with the given signing
    /// secret.
    #[must_use]
    pub fn new(store: Store, secret: TokenSecret) -> Self {
        let engine = CorrectionEngine::new(store.clone());
        Self {
            store,
            engine,
            secret,
        }
    }

    /// Issues a token bound to a certification version.
    ///
    /// # Errors
    ///
    /// - `Entity` if the bound entity does not resolve.
    /// - `ActiveTokenExists` if an unexpired, unrevoked token is already
    ///   outstanding for the entity.
    pub fn issue(&self, entity_id: &str, ttl_seconds: u64) -> Result<IssuedToken, TokenError> {
        self.issue_at(entity_id, ttl_seconds, Utc::now())
    }

    /// Issues a token with an explicit issue instant.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::issue`].
    pub fn issue_at(
        &self,
        entity_id: &str,
        ttl_seconds: u64,
        at: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let current = self.engine.current(entity_id)?;

        let at_ns = datetime_to_ns(at);
        let issued_at = at.timestamp();
        // Saturate so an absurd caller-supplied TTL clamps to "far future"
        // instead of wrapping into the past.
        let expires_at =
            issued_at.saturating_add(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
        // Clamped to i64::MAX so the stored value survives the signed
        // column round trip.
        let expires_at_ns = at_ns
            .saturating_add(ttl_seconds.saturating_mul(1_000_000_000))
            .min(i64::MAX as u64);

        let payload = TokenPayload {
            token_id: Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            subject_id: current.subject_id,
            certification_type: current.certification_type,
            issued_at,
            expires_at,
        };
        let token = wire::encode(&payload, &self.secret);
        let token_hash = Sha256::digest(token.as_bytes());

        let mut conn = self.store.conn();
        // IMMEDIATE so the guard-check and insert serialize against a
        // concurrent issuer on another connection: the loser re-runs the
        // check after the winner commits and sees the winner's row.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outstanding: Option<String> = tx
            .query_row(
                "SELECT id FROM verification_tokens
                 WHERE entity_id = ?1 AND status = 'active' AND expires_at_ns > ?2
                 LIMIT 1",
                params![entity_id, at_ns],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(token_id) = outstanding {
            warn!(token_id = %token_id, entity_id, "issuance rejected: active token exists");
            return Err(TokenError::ActiveTokenExists {
                token_id,
                entity_id: entity_id.to_string(),
            });
        }

        tx.execute(
            "INSERT INTO verification_tokens (id, entity_id, token_hash, status, created_at_ns, expires_at_ns)
             VALUES (?1, ?2, ?3, 'active', ?4, ?5)",
            params![
                payload.token_id,
                entity_id,
                token_hash.as_slice(),
                at_ns,
                expires_at_ns,
            ],
        )?;

        tx.commit()?;

        info!(token_id = %payload.token_id, entity_id, ttl_seconds, "verification token issued");

        Ok(IssuedToken {
            token_id: payload.token_id,
            token,
            entity_id: entity_id.to_string(),
            issued_at: at,
            expires_at: ns_to_datetime(expires_at_ns),
        })
    }

    /// Validates a token against the current clock.
    ///
    /// # Errors
    ///
    /// `Malformed`, `BadSignature`, `Expired` or `Revoked`; distinguished
    /// reasons, same fail-closed outcome for the scanner.
    pub fn validate(&self, token: &str) -> Result<TokenPayload, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Validates a token as of an explicit instant.
    ///
    /// Self-contained apart from the revocation list: the signature and
    /// expiry checks consult only the token itself and the shared secret.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::validate`].
    pub fn validate_at(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<TokenPayload, TokenError> {
        let payload = wire::decode(token, &self.secret)?;

        if at.timestamp() > payload.expires_at {
            return Err(TokenError::Expired {
                expired_at: payload.expires_at,
            });
        }

        let conn = self.store.conn();
        let revoked: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM token_revocations WHERE token_id = ?1 LIMIT 1",
                params![payload.token_id],
                |row| row.get(0),
            )
            .optional()?;
        if revoked.is_some() {
            return Err(TokenError::Revoked {
                token_id: payload.token_id,
            });
        }

        Ok(payload)
    }

    /// Verifies a token and records the scan.
    ///
    /// Every attempt that reaches signature/expiry validation produces
    /// exactly one evidence node + ledger entry (`QR_SCAN`) and one scan
    /// event, committed before any result is reported. If that write
    /// cannot be committed, the result is `Failed` — regardless of the
    /// entity's true status.
    pub fn verify(
        &self,
        token: &str,
        scanner: &ActorRef,
        location_id: Option<&str>,
    ) -> VerificationOutcome {
        self.verify_at(token, scanner, location_id, Utc::now())
    }

    /// Verifies as of an explicit instant.
    pub fn verify_at(
        &self,
        token: &str,
        scanner: &ActorRef,
        location_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> VerificationOutcome {
        let at_ns = datetime_to_ns(at);

        let payload = match self.validate_at(token, at) {
            Ok(payload) => payload,
            Err(TokenError::Malformed { reason }) => {
                // Never reached signature validation; no evidence is owed.
                warn!(reason = %reason, "scan rejected: malformed token");
                return VerificationOutcome::Failed {
                    reason: VerificationFailure::Malformed,
                };
            }
            Err(TokenError::BadSignature) => {
                // The payload is unauthenticated: record the attempt
                // without trusting its claimed entity.
                return self.fail_with_evidence(
                    None,
                    "VerificationToken",
                    UNAUTHENTICATED_ENTITY,
                    scanner,
                    location_id,
                    "bad_signature",
                    VerificationFailure::BadSignature,
                    at_ns,
                );
            }
            Err(TokenError::Expired { .. }) => {
                let binding = self.entity_of(token);
                return self.fail_with_evidence(
                    binding.as_ref().map(|(t, _)| t.as_str()),
                    "Certification",
                    binding.as_ref().map_or(UNAUTHENTICATED_ENTITY, |(_, e)| e.as_str()),
                    scanner,
                    location_id,
                    "expired",
                    VerificationFailure::Expired,
                    at_ns,
                );
            }
            Err(TokenError::Revoked { token_id }) => {
                let binding = self.entity_of(token);
                return self.fail_with_evidence(
                    Some(token_id.as_str()),
                    "Certification",
                    binding.as_ref().map_or(UNAUTHENTICATED_ENTITY, |(_, e)| e.as_str()),
                    scanner,
                    location_id,
                    "revoked",
                    VerificationFailure::Revoked,
                    at_ns,
                );
            }
            Err(e) => {
                error!(error = %e, "scan validation failed unexpectedly");
                return VerificationOutcome::Failed {
                    reason: VerificationFailure::Internal,
                };
            }
        };

        let current = match self.engine.current(&payload.entity_id) {
            Ok(current) => current,
            Err(CorrectionError::NotFound { .. }) => {
                return self.fail_with_evidence(
                    Some(&payload.token_id),
                    "Certification",
                    &payload.entity_id,
                    scanner,
                    location_id,
                    "unknown_entity",
                    VerificationFailure::UnknownEntity,
                    at_ns,
                );
            }
            Err(e) => {
                error!(entity_id = %payload.entity_id, error = %e, "scan failed: chain resolution error");
                return self.fail_with_evidence(
                    Some(&payload.token_id),
                    "Certification",
                    &payload.entity_id,
                    scanner,
                    location_id,
                    "internal_error",
                    VerificationFailure::Internal,
                    at_ns,
                );
            }
        };

        let status_at_scan = current.status;
        let compliant = status_at_scan == CertificationStatus::Valid;
        let result = if compliant { "ok" } else { "not_compliant" };

        match self.record_scan(
            Some(&payload.token_id),
            "Certification",
            &payload.entity_id,
            scanner,
            location_id,
            result,
            Some(status_at_scan),
            at_ns,
        ) {
            Ok(receipt) => {
                info!(
                    token_id = %payload.token_id,
                    entity_id = %payload.entity_id,
                    result,
                    "scan recorded"
                );
                VerificationOutcome::Verified {
                    compliant,
                    status_at_scan,
                    receipt,
                }
            }
            Err(e) => {
                // Fail-closed: without a durable scan record there is no
                // legal proof the verification occurred, so no status may
                // be reported.
                error!(
                    token_id = %payload.token_id,
                    entity_id = %payload.entity_id,
                    error = %e,
                    "evidence write failed; reporting verification as failed"
                );
                VerificationOutcome::Failed {
                    reason: VerificationFailure::EvidenceUnavailable,
                }
            }
        }
    }

    /// Revokes a token before its expiry.
    ///
    /// Appends a revocation record and a `token_revoked` evidence event;
    /// nothing is deleted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown token, or a database error if the
    /// revocation cannot be committed.
    pub fn revoke(
        &self,
        token_id: &str,
        reason: Option<&str>,
        actor: &ActorRef,
    ) -> Result<(), TokenError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT entity_id FROM verification_tokens WHERE id = ?1",
                params![token_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(entity_id) = exists else {
            return Err(TokenError::NotFound {
                token_id: token_id.to_string(),
            });
        };

        let at_ns = crate::store::now_ns();
        tx.execute(
            "INSERT INTO token_revocations (token_id, revoked_at_ns, reason)
             VALUES (?1, ?2, ?3)",
            params![token_id, at_ns, reason],
        )?;
        tx.execute(
            "UPDATE verification_tokens SET status = 'revoked' WHERE id = ?1",
            params![token_id],
        )?;

        let payload = json!({
            "token_id": token_id,
            "entity_id": entity_id,
            "reason": reason,
        });
        record_with(
            &tx,
            "VerificationToken",
            token_id,
            actor,
            None,
            "token_revoked",
            &payload,
            at_ns,
        )?;

        tx.commit()?;

        info!(token_id, "verification token revoked");
        Ok(())
    }

    /// Reads the scan events recorded against an entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn scans_for_entity(&self, entity_id: &str) -> Result<Vec<ScanEvent>, TokenError> {
        let conn = self.store.conn();

        let mut stmt = conn.prepare(
            "SELECT id, token_id, entity_id, scanned_at_ns, result, status_at_scan, location_id
             FROM scan_events
             WHERE entity_id = ?1
             ORDER BY scanned_at_ns ASC, id ASC",
        )?;

        let scans = stmt
            .query_map(params![entity_id], |row| {
                Ok(ScanEvent {
                    id: row.get::<_, i64>(0)? as u64,
                    token_id: row.get(1)?,
                    entity_id: row.get(2)?,
                    scanned_at_ns: row.get::<_, i64>(3)? as u64,
                    result: row.get(4)?,
                    status_at_scan: row.get(5)?,
                    location_id: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(scans)
    }

    /// Best-effort, unauthenticated read of a token's binding for failure
    /// attribution. Only used after the MAC verified (expired/revoked
    /// paths), where the payload is trustworthy.
    fn entity_of(&self, token: &str) -> Option<(String, String)> {
        wire::decode(token, &self.secret)
            .ok()
            .map(|p| (p.token_id, p.entity_id))
    }

    /// Records a failed scan, then reports failure. If even the failure
    /// record cannot be committed, the reported reason becomes
    /// `EvidenceUnavailable`.
    #[allow(clippy::too_many_arguments)]
    fn fail_with_evidence(
        &self,
        token_id: Option<&str>,
        entity_type: &str,
        entity_id: &str,
        scanner: &ActorRef,
        location_id: Option<&str>,
        result: &str,
        reason: VerificationFailure,
        at_ns: u64,
    ) -> VerificationOutcome {
        match self.record_scan(
            token_id,
            entity_type,
            entity_id,
            scanner,
            location_id,
            result,
            None,
            at_ns,
        ) {
            Ok(_) => {
                warn!(entity_id, result, "scan rejected");
                VerificationOutcome::Failed { reason }
            }
            Err(e) => {
                error!(entity_id, result, error = %e, "evidence write failed for rejected scan");
                VerificationOutcome::Failed {
                    reason: VerificationFailure::EvidenceUnavailable,
                }
            }
        }
    }

    /// One transaction: evidence node + `QR_SCAN` ledger entry + scan
    /// event row. The receipt exists only if all three committed.
    #[allow(clippy::too_many_arguments)]
    fn record_scan(
        &self,
        token_id: Option<&str>,
        entity_type: &str,
        entity_id: &str,
        scanner: &ActorRef,
        location_id: Option<&str>,
        result: &str,
        status_at_scan: Option<CertificationStatus>,
        at_ns: u64,
    ) -> Result<EvidenceReceipt, rusqlite::Error> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let payload = json!({
            "token_id": token_id,
            "result": result,
            "status_at_scan": status_at_scan.map(|s| s.as_str()),
            "scanned_at_ns": at_ns,
            "location_id": location_id,
        });
        let (node, entry_id) = record_with(
            &tx,
            entity_type,
            entity_id,
            scanner,
            location_id,
            "QR_SCAN",
            &payload,
            at_ns,
        )?;

        tx.execute(
            "INSERT INTO scan_events (token_id, entity_id, scanned_at_ns, result, status_at_scan, location_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                token_id,
                entity_id,
                at_ns,
                result,
                status_at_scan.map(|s| s.as_str()),
                location_id,
            ],
        )?;

        tx.commit()?;

        Ok(EvidenceReceipt::new(node.id, entry_id, at_ns))
    }
}
