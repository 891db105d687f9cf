mod common;

use common::{
    approved_summary, author, included_reference, manager, summary_content, transition,
};
use synopsis_core::model::synopsis::ActionGrouping;
use synopsis_core::model::workflow::{DocumentState, SynopsisState};
use synopsis_core::repo::summary_repo::{SqliteSummaryRepository, SummaryRepository};
use synopsis_core::repo::synopsis_repo::{SqliteSynopsisRepository, SynopsisRepository};
use synopsis_core::workflow::ContentUpdate;
use synopsis_core::{
    open_db_in_memory, AssemblyService, CoreConfig, CoreError, EntityKind, EntityRef, Ledger,
    OperationControl, Transition, TransitionRequest, WorkflowEngine,
};

#[test]
fn rollback_restores_content_and_keeps_workflow_state() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);
    let reference = included_reference(&conn, &config, &engine, "Bats and wind turbines", "2013");
    let summary = engine
        .create_summary(
            &conn,
            reference,
            summary_content("Curtail turbines", Some(50), "Original text."),
            &author(),
        )
        .unwrap();
    let entity = EntityRef::new(EntityKind::Summary, summary.id);
    engine
        .apply(
            &conn,
            TransitionRequest::new(entity, Transition::Edit, author()).with_content(
                ContentUpdate::Summary(summary_content("Curtail turbines", Some(55), "Edited.")),
            ),
        )
        .unwrap();
    transition(&conn, &engine, EntityKind::Summary, summary.id, Transition::Submit, &author());

    let ledger = Ledger::new(&conn);
    let first = ledger.revision_at(summary.id, 1).unwrap().unwrap();
    let before: Vec<_> = ledger.history(summary.id).map(Result::unwrap).collect();

    let revision = engine.rollback(&conn, entity, first.id, &manager()).unwrap();
    assert_eq!(revision.seq, before.len() as u32 + 1);
    assert_eq!(revision.transition, "rollback");
    assert_eq!(revision.from_state.as_deref(), Some("submitted"));
    assert_eq!(revision.to_state, "submitted");
    assert_eq!(revision.content["body"], first.content["body"]);

    let after: Vec<_> = ledger.history(summary.id).map(Result::unwrap).collect();
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(&after[..before.len()], &before[..]);

    let restored = SqliteSummaryRepository::new(&conn)
        .get(summary.id)
        .unwrap()
        .unwrap();
    assert_eq!(restored.state, DocumentState::Submitted);
    assert_eq!(restored.body, "Original text.");
    assert_eq!(restored.metadata.evidence_strength, Some(50));
    assert_eq!(restored.version, revision.seq);

    transition(&conn, &engine, EntityKind::Summary, summary.id, Transition::StartReview, &manager());
    assert_eq!(ledger.count(summary.id).unwrap(), revision.seq + 1);
}

#[test]
fn rollback_of_published_synopsis_stays_published() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);
    let reference = included_reference(&conn, &config, &engine, "Bat bridges over roads", "2016");
    approved_summary(
        &conn,
        &engine,
        reference,
        summary_content("Install bat gantries", Some(30), "Crossings studied."),
    );
    let synopsis = engine
        .create_synopsis(
            &conn,
            "Bat conservation",
            vec![ActionGrouping {
                key: "transport".to_string(),
                title: "Transportation".to_string(),
                position: 1,
                actions: vec!["Install bat gantries".to_string()],
            }],
            &manager(),
        )
        .unwrap();
    let compiled = AssemblyService::new(&config, &engine)
        .compile(&conn, synopsis.id, &manager(), None, &OperationControl::default())
        .unwrap();
    transition(&conn, &engine, EntityKind::Synopsis, synopsis.id, Transition::Publish, &manager());

    let ledger = Ledger::new(&conn);
    let first = ledger.revision_at(synopsis.id, 1).unwrap().unwrap();
    let revision = engine
        .rollback(&conn, EntityRef::new(EntityKind::Synopsis, synopsis.id), first.id, &manager())
        .unwrap();
    assert_eq!(revision.from_state.as_deref(), Some("published"));
    assert_eq!(revision.to_state, "published");

    let stored = SqliteSynopsisRepository::new(&conn)
        .get(synopsis.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, SynopsisState::Published);
    assert_eq!(stored.constituents, compiled.tree.constituents());
    assert!(engine
        .available_transitions(&conn, EntityRef::new(EntityKind::Synopsis, synopsis.id), &manager())
        .unwrap()
        .is_empty());
}

#[test]
fn rollback_is_role_gated_and_checks_the_chain() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);
    let reference = included_reference(&conn, &config, &engine, "Bat boxes in forests", "2004");
    let summary = engine
        .create_summary(&conn, reference, summary_content("Provide bat boxes", None, "Text."), &author())
        .unwrap();
    let ledger = Ledger::new(&conn);
    let own = ledger.latest(summary.id).unwrap().unwrap();
    let foreign = ledger.latest(reference).unwrap().unwrap();
    let entity = EntityRef::new(EntityKind::Summary, summary.id);

    let denied = engine.rollback(&conn, entity, own.id, &author()).unwrap_err();
    assert!(matches!(denied, CoreError::CapabilityDenied { .. }));

    let unknown = engine.rollback(&conn, entity, foreign.id, &manager()).unwrap_err();
    match unknown {
        CoreError::UnknownRevision {
            entity_id,
            revision_id,
        } => {
            assert_eq!(entity_id, summary.id);
            assert_eq!(revision_id, foreign.id);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ledger.count(summary.id).unwrap(), 1);
}

#[test]
fn as_of_reconstructs_the_state_at_a_point_in_time() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);
    let reference = included_reference(&conn, &config, &engine, "Bat gates on caves", "1995");
    let ledger = Ledger::new(&conn);
    let history: Vec<_> = ledger.history(reference).map(Result::unwrap).collect();
    assert_eq!(history.len(), 3);

    let latest = history.last().unwrap();
    let at_latest = ledger.as_of(reference, latest.created_at).unwrap().unwrap();
    assert_eq!(at_latest.to_state, "included");
    assert!(ledger
        .as_of(reference, history[0].created_at - 1)
        .unwrap()
        .is_none());
}
