#![allow(dead_code)]

use rusqlite::Connection;
use synopsis_core::import::RawRecord;
use synopsis_core::model::batch::BatchDescriptor;
use synopsis_core::model::summary::{Summary, SummaryContent, SummaryMetadata};
use synopsis_core::model::workflow::roles;
use synopsis_core::service::{ImportReport, RecordOutcome};
use synopsis_core::{
    Actor, CoreConfig, EntityKind, EntityRef, ImportService, OperationControl, Transition,
    TransitionRequest, WorkflowEngine,
};
use uuid::Uuid;

pub fn manager() -> Actor {
    Actor::new("mia", [roles::MANAGER])
}

pub fn author() -> Actor {
    Actor::new("amy", [roles::AUTHOR])
}

pub fn reviewer() -> Actor {
    Actor::new("rex", [roles::EXTERNAL_COLLABORATOR])
}

pub fn record(title: &str, authors: &str, year: &str, doi: Option<&str>) -> RawRecord {
    let mut record = RawRecord::new()
        .with_text("TI", title)
        .with_text("AU", authors)
        .with_text("PY", year);
    if let Some(doi) = doi {
        record.push_text("DO", doi);
    }
    record
}

pub fn import(
    conn: &Connection,
    config: &CoreConfig,
    engine: &WorkflowEngine,
    records: Vec<RawRecord>,
) -> ImportReport {
    let descriptor = BatchDescriptor {
        label: "test batch".to_string(),
        ..BatchDescriptor::default()
    };
    ImportService::new(config, engine)
        .import_records(
            conn,
            descriptor,
            records,
            &manager(),
            &OperationControl::default(),
        )
        .unwrap()
}

pub fn imported_id(report: &ImportReport, index: usize) -> Uuid {
    match &report.records[index].outcome {
        RecordOutcome::Imported { reference_id, .. } => *reference_id,
        other => panic!("record {index} was not imported: {other:?}"),
    }
}

pub fn transition(
    conn: &Connection,
    engine: &WorkflowEngine,
    kind: EntityKind,
    id: Uuid,
    transition: Transition,
    actor: &Actor,
) {
    engine
        .apply(
            conn,
            TransitionRequest::new(EntityRef::new(kind, id), transition, actor.clone()),
        )
        .unwrap();
}

/// Imports one standalone record and screens it in.
pub fn included_reference(
    conn: &Connection,
    config: &CoreConfig,
    engine: &WorkflowEngine,
    title: &str,
    year: &str,
) -> Uuid {
    let report = import(
        conn,
        config,
        engine,
        vec![record(title, "Smith, A.", year, None)],
    );
    let id = imported_id(&report, 0);
    for step in [Transition::StartScreening, Transition::Include] {
        transition(conn, engine, EntityKind::Reference, id, step, &author());
    }
    id
}

pub fn summary_content(action: &str, strength: Option<u8>, body: &str) -> SummaryContent {
    SummaryContent {
        metadata: SummaryMetadata {
            action: action.to_string(),
            evidence_strength: strength,
            ..SummaryMetadata::default()
        },
        body: body.to_string(),
    }
}

/// Creates a summary and walks it to `approved`.
pub fn approved_summary(
    conn: &Connection,
    engine: &WorkflowEngine,
    reference_id: Uuid,
    content: SummaryContent,
) -> Summary {
    let summary = engine
        .create_summary(conn, reference_id, content, &author())
        .unwrap();
    transition(conn, engine, EntityKind::Summary, summary.id, Transition::Submit, &author());
    for step in [Transition::StartReview, Transition::Approve] {
        transition(conn, engine, EntityKind::Summary, summary.id, step, &manager());
    }
    summary
}
