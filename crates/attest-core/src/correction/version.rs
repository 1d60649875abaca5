//! Certification version records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evidence::ActorRef;
use crate::store::{datetime_to_ns, now_ns, ns_to_datetime};

/// Compliance status of a certification version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertificationStatus {
    /// In force.
    Valid,
    /// Past its expiration date.
    Expired,
    /// Withdrawn by the issuing authority.
    Revoked,
    /// Entered but not yet confirmed.
    Pending,
}

impl CertificationStatus {
    /// Storage representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
            Self::Pending => "PENDING",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "VALID" => Some(Self::Valid),
            "EXPIRED" => Some(Self::Expired),
            "REVOKED" => Some(Self::Revoked),
            "PENDING" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// One version of a regulated compliance fact.
///
/// Once a version is corrected (`is_corrected == true`), its substantive
/// fields are permanently frozen; only the correction-linking fields were
/// set, exactly once, and they never change again. Superseded versions
/// remain queryable forever via the chain — deletion never happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certification {
    /// Version identifier (UUID). Each correction creates a new ID.
    pub id: String,

    /// The employee this certification belongs to.
    pub subject_id: String,

    /// Kind of certification (e.g. `"forklift-operator"`).
    pub certification_type: String,

    /// The authority that issued the certification.
    pub issuing_authority: String,

    /// Date the certification was issued.
    pub issued_on: Option<NaiveDate>,

    /// Date the certification expires.
    pub expires_on: Option<NaiveDate>,

    /// Compliance status of this version.
    pub status: CertificationStatus,

    /// Server-assigned creation time of this version, nanoseconds since
    /// the Unix epoch.
    pub created_at_ns: u64,

    /// Who created this version (manual entry or correction).
    pub created_by: ActorRef,

    /// Whether this version has been superseded by a correction.
    pub is_corrected: bool,

    /// Forward pointer to the successor version, if corrected.
    pub corrected_by_id: Option<String>,

    /// Why the correction was made, if corrected.
    pub correction_reason: Option<String>,

    /// When the correction was made, if corrected.
    pub corrected_at_ns: Option<u64>,

    /// Who made the correction, if corrected.
    pub corrected_by: Option<ActorRef>,
}

impl Certification {
    /// Creates a new uncorrected version with the current timestamp.
    #[must_use]
    pub fn new(
        subject_id: impl Into<String>,
        certification_type: impl Into<String>,
        issuing_authority: impl Into<String>,
        issued_on: Option<NaiveDate>,
        expires_on: Option<NaiveDate>,
        status: CertificationStatus,
        created_by: ActorRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            certification_type: certification_type.into(),
            issuing_authority: issuing_authority.into(),
            issued_on,
            expires_on,
            status,
            created_at_ns: now_ns(),
            created_by,
            is_corrected: false,
            corrected_by_id: None,
            correction_reason: None,
            corrected_at_ns: None,
            corrected_by: None,
        }
    }

    /// Sets an explicit creation time (builder pattern).
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at_ns = datetime_to_ns(created_at);
        self
    }

    /// Server-assigned creation time of this version.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        ns_to_datetime(self.created_at_ns)
    }

    /// When the correction was made, if corrected.
    #[must_use]
    pub fn corrected_at(&self) -> Option<DateTime<Utc>> {
        self.corrected_at_ns.map(ns_to_datetime)
    }
}

/// Field overlays for a correction.
///
/// `None` keeps the original version's value; `Some` replaces it on the
/// successor version. The subject is deliberately absent: a correction
/// amends a fact about the same employee, it never reassigns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionFields {
    /// Replacement certification type.
    pub certification_type: Option<String>,

    /// Replacement issuing authority.
    pub issuing_authority: Option<String>,

    /// Replacement issue date.
    pub issued_on: Option<NaiveDate>,

    /// Replacement expiration date.
    pub expires_on: Option<NaiveDate>,

    /// Replacement status.
    pub status: Option<CertificationStatus>,
}
