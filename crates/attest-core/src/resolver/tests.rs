//! Tests for the point-in-time resolver.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use super::*;
use crate::correction::{Certification, CertificationStatus, CorrectionFields};
use crate::evidence::{ActorRef, ActorType};
use crate::store::Store;

fn auditor() -> ActorRef {
    ActorRef::new(ActorType::User, "auditor-7")
}

fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn resolver() -> (CorrectionEngine, PointInTimeResolver) {
    let store = Store::in_memory().expect("failed to create in-memory store");
    let engine = CorrectionEngine::new(store);
    let resolver = PointInTimeResolver::new(engine.clone());
    (engine, resolver)
}

/// Builds the worked example: created 2024-01-01 expiring 2025-01-01,
/// corrected 2024-06-01 to expire 2025-02-01.
fn worked_example(engine: &CorrectionEngine) -> (Certification, Certification) {
    let original = engine
        .create(
            Certification::new(
                "employee-42",
                "forklift-operator",
                "State Board",
                NaiveDate::from_ymd_opt(2024, 1, 1),
                NaiveDate::from_ymd_opt(2025, 1, 1),
                CertificationStatus::Valid,
                auditor(),
            )
            .with_created_at(ts(2024, 1, 1)),
        )
        .expect("failed to create");

    let outcome = engine
        .correct_at_ns(
            &original.id,
            "wrong expiration date",
            &auditor(),
            CorrectionFields {
                expires_on: NaiveDate::from_ymd_opt(2025, 2, 1),
                ..CorrectionFields::default()
            },
            crate::store::datetime_to_ns(ts(2024, 6, 1)),
        )
        .expect("failed to correct");

    (outcome.original, outcome.corrected)
}

#[test]
fn test_as_of_returns_version_current_at_target() {
    let (engine, resolver) = resolver();
    let (original, corrected) = worked_example(&engine);

    let before_correction = resolver
        .as_of(&original.id, ts(2024, 3, 1))
        .expect("failed to resolve");
    assert_eq!(
        before_correction.version().map(|v| v.id.as_str()),
        Some(original.id.as_str())
    );
    assert_eq!(
        before_correction.version().and_then(|v| v.expires_on),
        NaiveDate::from_ymd_opt(2025, 1, 1)
    );

    let after_correction = resolver
        .as_of(&original.id, ts(2024, 7, 1))
        .expect("failed to resolve");
    assert_eq!(
        after_correction.version().map(|v| v.id.as_str()),
        Some(corrected.id.as_str())
    );
    assert_eq!(
        after_correction.version().and_then(|v| v.expires_on),
        NaiveDate::from_ymd_opt(2025, 2, 1)
    );
}

#[test]
fn test_as_of_before_root_is_did_not_exist() {
    let (engine, resolver) = resolver();
    let (original, _) = worked_example(&engine);

    let resolution = resolver
        .as_of(&original.id, ts(2023, 12, 1))
        .expect("failed to resolve");
    assert_eq!(resolution, AsOfResolution::DidNotExist);
}

#[test]
fn test_as_of_at_exact_creation_instant_returns_that_version() {
    let (engine, resolver) = resolver();
    let (original, corrected) = worked_example(&engine);

    let at_creation = resolver
        .as_of(&original.id, ts(2024, 1, 1))
        .expect("failed to resolve");
    assert_eq!(
        at_creation.version().map(|v| v.id.as_str()),
        Some(original.id.as_str())
    );

    let at_correction = resolver
        .as_of(&original.id, ts(2024, 6, 1))
        .expect("failed to resolve");
    assert_eq!(
        at_correction.version().map(|v| v.id.as_str()),
        Some(corrected.id.as_str())
    );
}

#[test]
fn test_as_of_resolves_from_any_version_of_the_chain() {
    let (engine, resolver) = resolver();
    let (original, corrected) = worked_example(&engine);

    let via_original = resolver
        .as_of(&original.id, ts(2024, 3, 1))
        .expect("failed to resolve");
    let via_corrected = resolver
        .as_of(&corrected.id, ts(2024, 3, 1))
        .expect("failed to resolve");
    assert_eq!(via_original, via_corrected);
}

#[test]
fn test_as_of_is_idempotent() {
    let (engine, resolver) = resolver();
    let (original, _) = worked_example(&engine);

    let first = resolver
        .as_of(&original.id, ts(2024, 7, 1))
        .expect("failed to resolve");
    let second = resolver
        .as_of(&original.id, ts(2024, 7, 1))
        .expect("failed to resolve");
    assert_eq!(first, second);
}

#[test]
fn test_later_corrections_do_not_change_earlier_answers() {
    let (engine, resolver) = resolver();
    let (original, corrected) = worked_example(&engine);

    let before = resolver
        .as_of(&original.id, ts(2024, 3, 1))
        .expect("failed to resolve");

    // A later correction appends a new version with a new timestamp; the
    // answer for an earlier date is unchanged.
    engine
        .correct_at_ns(
            &corrected.id,
            "issuing authority renamed",
            &auditor(),
            CorrectionFields {
                issuing_authority: Some("State Board (renamed)".to_string()),
                ..CorrectionFields::default()
            },
            crate::store::datetime_to_ns(ts(2024, 9, 1)),
        )
        .expect("failed to correct");

    let after = resolver
        .as_of(&original.id, ts(2024, 3, 1))
        .expect("failed to resolve");
    assert_eq!(before, after);
}

#[test]
fn test_as_of_for_subject_groups_chains_and_omits_nonexistent() {
    let (engine, resolver) = resolver();

    // Chain A: created January, corrected June (two versions, one chain).
    let (_, corrected_a) = worked_example(&engine);

    // Chain B: a second, independent certification created in May.
    let cert_b = engine
        .create(
            Certification::new(
                "employee-42",
                "first-aid",
                "Red Cross",
                None,
                None,
                CertificationStatus::Valid,
                auditor(),
            )
            .with_created_at(ts(2024, 5, 1)),
        )
        .expect("failed to create");

    // Chain C: created in November; does not exist yet at the probe date.
    engine
        .create(
            Certification::new(
                "employee-42",
                "crane-operator",
                "State Board",
                None,
                None,
                CertificationStatus::Pending,
                auditor(),
            )
            .with_created_at(ts(2024, 11, 1)),
        )
        .expect("failed to create");

    let held = resolver
        .as_of_for_subject("employee-42", ts(2024, 7, 1))
        .expect("failed to resolve");

    // Each chain contributes at most once; chain C is omitted.
    assert_eq!(held.len(), 2);
    let ids: Vec<&str> = held.iter().map(|v| v.id.as_str()).collect();
    assert!(ids.contains(&corrected_a.id.as_str()));
    assert!(ids.contains(&cert_b.id.as_str()));
}

#[test]
fn test_as_of_for_subject_unknown_subject_is_empty() {
    let (_, resolver) = resolver();
    let held = resolver
        .as_of_for_subject("nobody", ts(2024, 7, 1))
        .expect("failed to resolve");
    assert!(held.is_empty());
}

proptest! {
    /// For any chain length and probe date, resolution is deterministic
    /// and picks the last version created at or before the probe.
    #[test]
    fn prop_as_of_deterministic_and_ordered(len in 1usize..6, probe_day in -2i64..10) {
        let (engine, resolver) = resolver();

        let base = ts(2024, 1, 1);
        let root = engine
            .create(
                Certification::new(
                    "employee-1",
                    "welder",
                    "Guild",
                    None,
                    None,
                    CertificationStatus::Valid,
                    auditor(),
                )
                .with_created_at(base),
            )
            .expect("failed to create");

        let mut head_id = root.id.clone();
        for i in 1..len {
            let at = base + chrono::Duration::days(i as i64);
            let outcome = engine
                .correct_at_ns(
                    &head_id,
                    "revision",
                    &auditor(),
                    CorrectionFields::default(),
                    crate::store::datetime_to_ns(at),
                )
                .expect("failed to correct");
            head_id = outcome.corrected.id;
        }

        let probe = base + chrono::Duration::days(probe_day);
        let first = resolver.as_of(&root.id, probe).expect("failed to resolve");
        let second = resolver.as_of(&root.id, probe).expect("failed to resolve");
        prop_assert_eq!(&first, &second);

        if probe_day < 0 {
            prop_assert_eq!(first, AsOfResolution::DidNotExist);
        } else {
            let expected_index = (probe_day as usize).min(len - 1);
            let chain = engine.chain(&root.id).expect("failed to resolve chain");
            let version = first.version().expect("version must exist at probe");
            prop_assert_eq!(version.id.as_str(), chain[expected_index].id.as_str());
        }
    }
}
