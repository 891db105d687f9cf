mod common;

use common::{import, manager, record};
use std::io::Cursor;
use synopsis_core::import::RawRecord;
use synopsis_core::model::batch::{BatchDescriptor, BatchTermination};
use synopsis_core::repo::batch_repo::{BatchRepository, SqliteBatchRepository};
use synopsis_core::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use synopsis_core::service::RecordOutcome;
use synopsis_core::{
    open_db_in_memory, CancellationToken, CoreConfig, CoreError, ImportService, Ledger,
    OperationControl, WorkflowEngine,
};

#[test]
fn failed_records_are_quarantined_and_batch_continues() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);

    let mut bad_bytes = RawRecord::new().with_text("AU", "Lee, K.").with_text("PY", "2012");
    bad_bytes.push_bytes("TI", vec![0xC3, 0x28, 0x41]);
    let report = import(
        &conn,
        &config,
        &engine,
        vec![
            record("Bats crossing roads", "Berthinussen, A.", "2010", None),
            RawRecord::new().with_text("TI", "Untitled notes"),
            bad_bytes,
            record("Hedgerow corridors for bats", "Boughey, K.", "2011", None),
        ],
    );

    assert_eq!(report.batch.processed, 4);
    assert_eq!(report.batch.imported, 2);
    assert_eq!(report.batch.quarantined, 2);
    assert_eq!(report.batch.termination, BatchTermination::Completed);
    assert!(report.interruption().is_none());
    let indices: Vec<usize> = report.records.iter().map(|r| r.record_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    match &report.records[1].outcome {
        RecordOutcome::Quarantined { reason_code, message } => {
            assert_eq!(reason_code, "malformed_record");
            assert!(message.contains("authors"));
            assert!(message.contains("year"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(matches!(
        &report.records[2].outcome,
        RecordOutcome::Quarantined { reason_code, .. } if reason_code == "unsupported_encoding"
    ));

    let batches = SqliteBatchRepository::new(&conn);
    let stored = batches.get(report.batch_id()).unwrap().unwrap();
    assert_eq!(stored, report.batch);
    let quarantined = batches.list_quarantined(report.batch_id()).unwrap();
    assert_eq!(quarantined.len(), 2);
    assert_eq!(quarantined[0].record_index, 1);
    assert_eq!(quarantined[0].raw_fields[0].value, "Untitled notes");
}

#[test]
fn imported_reference_starts_at_revision_one() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);

    let report = import(
        &conn,
        &config,
        &engine,
        vec![record(
            "Bat gantries on motorways",
            "Berthinussen, A.",
            "c. 2014",
            Some("https://doi.org/10.1/ABC"),
        )],
    );
    let id = report.imported_ids()[0];

    let reference = SqliteReferenceRepository::new(&conn).get(id).unwrap().unwrap();
    assert_eq!(reference.version, 1);
    assert_eq!(reference.state.as_str(), "imported");
    assert_eq!(reference.year.exact(), None);
    assert_eq!(reference.year.best_guess(), Some(2014));
    assert_eq!(reference.provenance.batch_id, Some(report.batch_id()));

    let revision = Ledger::new(&conn).latest(id).unwrap().unwrap();
    assert_eq!(revision.seq, 1);
    assert_eq!(revision.transition, "import");
    assert_eq!(revision.from_state, None);
}

#[test]
fn interchange_stream_is_split_into_records() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);
    let stream = "\u{FEFF}TY  - JOUR\nTI  - Bat boxes in plantations\nAU  - Smith, A.\nAU  - Jones, B.\nPY  - 2009\nER  - \n\nTY  - JOUR\nTI  - Lighting and bats\nPY  - 2016\nER  - \n";

    let report = ImportService::new(&config, &engine)
        .import_stream(
            &conn,
            BatchDescriptor {
                label: "stream".to_string(),
                ..BatchDescriptor::default()
            },
            Cursor::new(stream.as_bytes()),
            &manager(),
            &OperationControl::default(),
        )
        .unwrap();

    assert_eq!(report.batch.processed, 2);
    assert_eq!(report.batch.imported, 1);
    assert_eq!(report.batch.quarantined, 1);
    let reference = SqliteReferenceRepository::new(&conn)
        .get(report.imported_ids()[0])
        .unwrap()
        .unwrap();
    assert_eq!(reference.authors, vec!["Smith, A.", "Jones, B."]);
}

#[test]
fn cancelled_batch_keeps_committed_records_and_reports_progress() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);
    let token = CancellationToken::new();
    token.cancel();

    let report = ImportService::new(&config, &engine)
        .import_records(
            &conn,
            BatchDescriptor::default(),
            vec![record("Bat bricks", "Smith, A.", "2001", None)],
            &manager(),
            &OperationControl::new(token, None),
        )
        .unwrap();

    assert_eq!(report.batch.termination, BatchTermination::Cancelled);
    assert!(report.records.is_empty());
    assert!(matches!(
        report.interruption(),
        Some(CoreError::Cancelled { processed: 0 })
    ));
}
