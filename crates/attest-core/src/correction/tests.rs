//! Tests for the correction chain engine.

use std::thread;

use chrono::NaiveDate;
use tempfile::TempDir;

use super::*;
use crate::evidence::{ActorRef, ActorType, EvidenceWriter};
use crate::store::Store;

fn auditor() -> ActorRef {
    ActorRef::new(ActorType::User, "auditor-7")
}

fn engine() -> CorrectionEngine {
    CorrectionEngine::new(Store::in_memory().expect("failed to create in-memory store"))
}

fn sample_cert() -> Certification {
    Certification::new(
        "employee-42",
        "forklift-operator",
        "State Board",
        NaiveDate::from_ymd_opt(2024, 1, 1),
        NaiveDate::from_ymd_opt(2025, 1, 1),
        CertificationStatus::Valid,
        auditor(),
    )
}

#[test]
fn test_create_persists_version_and_evidence() {
    let store = Store::in_memory().expect("failed to create in-memory store");
    let engine = CorrectionEngine::new(store.clone());
    let writer = EvidenceWriter::new(store);

    let cert = engine.create(sample_cert()).expect("failed to create");

    let loaded = engine.version(&cert.id).expect("version must exist");
    assert_eq!(loaded, cert);

    let nodes = writer
        .nodes_for_entity("Certification", &cert.id)
        .expect("failed to read evidence");
    assert_eq!(nodes.len(), 1);
    let entries = writer.entries(&nodes[0].id).expect("failed to read entries");
    assert_eq!(entries[0].event_type, "certification_created");
}

#[test]
fn test_correct_root_immediately_yields_chain_of_two() {
    let engine = engine();
    let cert = engine.create(sample_cert()).expect("failed to create");

    let outcome = engine
        .correct(
            &cert.id,
            "wrong expiration date",
            &auditor(),
            CorrectionFields {
                expires_on: NaiveDate::from_ymd_opt(2025, 2, 1),
                ..CorrectionFields::default()
            },
        )
        .expect("failed to correct");

    assert!(outcome.original.is_corrected);
    assert_eq!(
        outcome.original.corrected_by_id.as_deref(),
        Some(outcome.corrected.id.as_str())
    );
    assert_eq!(
        outcome.original.correction_reason.as_deref(),
        Some("wrong expiration date")
    );
    assert!(!outcome.corrected.is_corrected);
    assert_eq!(
        outcome.corrected.expires_on,
        NaiveDate::from_ymd_opt(2025, 2, 1)
    );
    // Untouched fields carry over.
    assert_eq!(outcome.corrected.certification_type, "forklift-operator");
    assert_eq!(outcome.corrected.subject_id, "employee-42");

    let chain = engine.chain(&cert.id).expect("failed to resolve chain");
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].id, cert.id);
    assert_eq!(chain[1].id, outcome.corrected.id);
}

#[test]
fn test_chain_of_arbitrary_length_resolves_from_any_version() {
    let engine = engine();
    let cert = engine.create(sample_cert()).expect("failed to create");

    let mut head_id = cert.id.clone();
    for i in 0..5 {
        let outcome = engine
            .correct(
                &head_id,
                &format!("revision {i}"),
                &auditor(),
                CorrectionFields::default(),
            )
            .expect("failed to correct");
        head_id = outcome.corrected.id;
    }

    let chain = engine.chain(&cert.id).expect("failed to resolve chain");
    assert_eq!(chain.len(), 6);

    // Every version resolves the same chain, regardless of entry point.
    for version in &chain {
        let from_here = engine.chain(&version.id).expect("failed to resolve chain");
        assert_eq!(from_here.len(), 6);
        assert_eq!(from_here[0].id, chain[0].id);
        assert_eq!(from_here[5].id, head_id);
    }

    // Strictly increasing by creation time, exactly one uncorrected head.
    assert!(chain.windows(2).all(|w| w[0].created_at_ns < w[1].created_at_ns
        || (w[0].created_at_ns == w[1].created_at_ns && w[0].id != w[1].id)));
    assert_eq!(chain.iter().filter(|v| !v.is_corrected).count(), 1);
    assert!(!chain[5].is_corrected);

    let current = engine.current(&cert.id).expect("failed to resolve current");
    assert_eq!(current.id, head_id);
}

#[test]
fn test_second_correction_of_same_version_is_conflict() {
    let engine = engine();
    let cert = engine.create(sample_cert()).expect("failed to create");

    engine
        .correct(&cert.id, "first", &auditor(), CorrectionFields::default())
        .expect("first correction must succeed");

    let err = engine
        .correct(&cert.id, "second", &auditor(), CorrectionFields::default())
        .expect_err("second correction of same version must conflict");
    assert!(matches!(err, CorrectionError::AlreadyCorrected { .. }));

    // Exactly one successor exists.
    let chain = engine.chain(&cert.id).expect("failed to resolve chain");
    assert_eq!(chain.len(), 2);
}

#[test]
fn test_concurrent_corrections_one_winner() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("attest.db");
    let cert = {
        let engine = CorrectionEngine::new(Store::open(&path).expect("failed to open store"));
        engine.create(sample_cert()).expect("failed to create")
    };

    let mut handles = Vec::new();
    for i in 0..2 {
        let path = path.clone();
        let cert_id = cert.id.clone();
        handles.push(thread::spawn(move || {
            let engine =
                CorrectionEngine::new(Store::open(&path).expect("failed to open store"));
            engine.correct(
                &cert_id,
                &format!("concurrent attempt {i}"),
                &ActorRef::new(ActorType::User, format!("auditor-{i}")),
                CorrectionFields::default(),
            )
        }));
    }

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one concurrent correction must win");
    // The IMMEDIATE transaction plus the busy timeout means the loser
    // always sees the conflict, never a raw database error.
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(CorrectionError::AlreadyCorrected { .. }))),
        "the loser must see the conflict"
    );

    // Exactly one new version exists afterward.
    let engine = CorrectionEngine::new(Store::open(&path).expect("failed to open store"));
    let chain = engine.chain(&cert.id).expect("failed to resolve chain");
    assert_eq!(chain.len(), 2);
}

#[test]
fn test_correcting_the_head_extends_the_chain() {
    let engine = engine();
    let cert = engine.create(sample_cert()).expect("failed to create");

    let first = engine
        .correct(&cert.id, "first", &auditor(), CorrectionFields::default())
        .expect("failed to correct");

    // Amending a corrected record goes through the current head.
    let head = engine.current(&cert.id).expect("failed to resolve current");
    assert_eq!(head.id, first.corrected.id);

    let second = engine
        .correct(&head.id, "second", &auditor(), CorrectionFields::default())
        .expect("correcting the head must succeed");

    let chain = engine.chain(&cert.id).expect("failed to resolve chain");
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[2].id, second.corrected.id);
}

#[test]
fn test_cycle_is_integrity_violation_not_truncation() {
    let store = Store::in_memory().expect("failed to create in-memory store");
    let engine = CorrectionEngine::new(store.clone());
    let cert = engine.create(sample_cert()).expect("failed to create");
    let outcome = engine
        .correct(&cert.id, "first", &auditor(), CorrectionFields::default())
        .expect("failed to correct");

    // Corrupt the linkage out of band: point the head back at the root.
    {
        let conn = store.conn();
        conn.execute(
            "UPDATE certifications SET is_corrected = 1, corrected_by_id = ?1 WHERE id = ?2",
            rusqlite::params![cert.id, outcome.corrected.id],
        )
        .expect("failed to corrupt linkage");
    }

    let err = engine
        .chain(&cert.id)
        .expect_err("cycle must surface as an error");
    assert!(matches!(err, CorrectionError::CycleDetected { .. }));
}

#[test]
fn test_dangling_successor_is_broken_chain() {
    let store = Store::in_memory().expect("failed to create in-memory store");
    let engine = CorrectionEngine::new(store.clone());
    let cert = engine.create(sample_cert()).expect("failed to create");

    {
        let conn = store.conn();
        conn.execute_batch("PRAGMA foreign_keys = OFF;")
            .expect("failed to disable foreign keys");
        conn.execute(
            "UPDATE certifications SET is_corrected = 1, corrected_by_id = 'no-such-version'
             WHERE id = ?1",
            rusqlite::params![cert.id],
        )
        .expect("failed to corrupt linkage");
    }

    let err = engine
        .chain(&cert.id)
        .expect_err("dangling successor must surface as an error");
    assert!(matches!(err, CorrectionError::BrokenChain { .. }));
}

#[test]
fn test_correct_unknown_version_is_not_found() {
    let engine = engine();
    let err = engine
        .correct(
            "no-such-version",
            "reason",
            &auditor(),
            CorrectionFields::default(),
        )
        .expect_err("correcting unknown version must fail");
    assert!(matches!(err, CorrectionError::NotFound { .. }));
}

#[test]
fn test_correction_evidence_carries_field_changes() {
    let store = Store::in_memory().expect("failed to create in-memory store");
    let engine = CorrectionEngine::new(store.clone());
    let writer = EvidenceWriter::new(store);
    let cert = engine.create(sample_cert()).expect("failed to create");

    let outcome = engine
        .correct(
            &cert.id,
            "wrong expiration date",
            &auditor(),
            CorrectionFields {
                expires_on: NaiveDate::from_ymd_opt(2025, 2, 1),
                status: Some(CertificationStatus::Valid),
                ..CorrectionFields::default()
            },
        )
        .expect("failed to correct");

    let nodes = writer
        .nodes_for_entity("Certification", &outcome.corrected.id)
        .expect("failed to read evidence");
    assert_eq!(nodes.len(), 1);
    let entries = writer.entries(&nodes[0].id).expect("failed to read entries");
    assert_eq!(entries.len(), 1);
    let payload = &entries[0].payload;
    assert_eq!(entries[0].event_type, "certification_corrected");
    assert_eq!(payload["original_id"], cert.id.as_str());
    assert_eq!(payload["corrected_id"], outcome.corrected.id.as_str());
    assert_eq!(payload["reason"], "wrong expiration date");
    assert_eq!(payload["field_changes"]["expires_on"]["to"], "2025-02-01");
    // Unchanged status does not appear in the diff.
    assert!(payload["field_changes"].get("status").is_none());
}
