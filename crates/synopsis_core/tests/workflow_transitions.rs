mod common;

use common::{
    author, import, imported_id, included_reference, manager, record, reviewer, summary_content,
    transition,
};
use rusqlite::Connection;
use std::sync::Arc;
use synopsis_core::ledger::snapshot_of;
use synopsis_core::model::summary::Summary;
use synopsis_core::model::workflow::ReferenceState;
use synopsis_core::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use synopsis_core::repo::summary_repo::{SqliteSummaryRepository, SummaryRepository};
use synopsis_core::workflow::{ContentUpdate, EntityLocks, RecordingPublisher};
use synopsis_core::{
    open_db_in_memory, CoreConfig, CoreError, EntityKind, EntityRef, Ledger, Transition,
    TransitionRequest, WorkflowEngine,
};
use uuid::Uuid;

fn setup() -> (Connection, CoreConfig, WorkflowEngine) {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);
    (conn, config, engine)
}

fn draft_summary(conn: &Connection, config: &CoreConfig, engine: &WorkflowEngine) -> Summary {
    let reference = included_reference(conn, config, engine, "Bat detectors at wind farms", "2018");
    engine
        .create_summary(
            conn,
            reference,
            summary_content("Curtail turbines at low wind speed", Some(60), "First draft."),
            &author(),
        )
        .unwrap()
}

fn summary_ref(id: Uuid) -> EntityRef {
    EntityRef::new(EntityKind::Summary, id)
}

#[test]
fn resubmit_after_changes_requested_keeps_prior_revision() {
    let (conn, config, engine) = setup();
    let summary = draft_summary(&conn, &config, &engine);
    transition(&conn, &engine, EntityKind::Summary, summary.id, Transition::Submit, &author());
    transition(&conn, &engine, EntityKind::Summary, summary.id, Transition::StartReview, &manager());
    let requested = engine
        .apply(
            &conn,
            TransitionRequest::new(summary_ref(summary.id), Transition::RequestChanges, reviewer()),
        )
        .unwrap();
    assert_eq!(requested.to_state, "changes_requested");

    let revised = summary_content("Curtail turbines at low wind speed", Some(70), "Second draft.");
    let outcome = engine
        .apply(
            &conn,
            TransitionRequest::new(summary_ref(summary.id), Transition::Resubmit, author())
                .with_content(ContentUpdate::Summary(revised)),
        )
        .unwrap();
    assert_eq!(outcome.from_state, "changes_requested");
    assert_eq!(outcome.to_state, "under_review");
    assert_eq!(outcome.seq, requested.seq + 1);

    let ledger = Ledger::new(&conn);
    let prior = ledger.get(requested.revision_id).unwrap().unwrap();
    let prior_summary: Summary = snapshot_of(&prior).unwrap();
    assert_eq!(prior_summary.body, "First draft.");
    let current = SqliteSummaryRepository::new(&conn)
        .get(summary.id)
        .unwrap()
        .unwrap();
    assert_eq!(current.body, "Second draft.");
    assert_eq!(current.metadata.evidence_strength, Some(70));
    assert_eq!(current.version, outcome.seq);
    let latest = ledger.latest(summary.id).unwrap().unwrap();
    assert_eq!(latest.prior_id, Some(requested.revision_id));
}

#[test]
fn approving_a_draft_is_illegal_and_appends_nothing() {
    let (conn, config, engine) = setup();
    let summary = draft_summary(&conn, &config, &engine);
    let before = Ledger::new(&conn).count(summary.id).unwrap();

    let err = engine
        .apply(
            &conn,
            TransitionRequest::new(summary_ref(summary.id), Transition::Approve, manager()),
        )
        .unwrap_err();
    match err {
        CoreError::IllegalTransition {
            state, transition, ..
        } => {
            assert_eq!(state, "draft");
            assert_eq!(transition, "approve");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(Ledger::new(&conn).count(summary.id).unwrap(), before);
}

#[test]
fn history_grows_by_one_per_accepted_transition() {
    let (conn, config, engine) = setup();
    let summary = draft_summary(&conn, &config, &engine);
    let ledger = Ledger::new(&conn);
    assert_eq!(ledger.count(summary.id).unwrap(), 1);

    let steps = [
        (Transition::Submit, author()),
        (Transition::StartReview, manager()),
        (Transition::Approve, manager()),
    ];
    for (expected, (step, actor)) in (2..).zip(steps) {
        transition(&conn, &engine, EntityKind::Summary, summary.id, step, &actor);
        assert_eq!(ledger.count(summary.id).unwrap(), expected);
    }

    let states: Vec<String> = ledger
        .history(summary.id)
        .map(|revision| revision.unwrap().to_state)
        .collect();
    assert_eq!(states, vec!["draft", "submitted", "under_review", "approved"]);
}

#[test]
fn replayed_token_returns_stored_outcome() {
    let (conn, config, engine) = setup();
    let summary = draft_summary(&conn, &config, &engine);
    let request = TransitionRequest::new(summary_ref(summary.id), Transition::Submit, author())
        .with_token("submit-1");

    let first = engine.apply(&conn, request.clone()).unwrap();
    let second = engine.apply(&conn, request).unwrap();
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.revision_id, first.revision_id);
    assert_eq!(Ledger::new(&conn).count(summary.id).unwrap(), 2);

    let err = engine
        .apply(
            &conn,
            TransitionRequest::new(summary_ref(summary.id), Transition::StartReview, manager())
                .with_token("submit-1"),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::IdempotencyConflict { .. }));
}

#[test]
fn missing_role_is_denied() {
    let (conn, config, engine) = setup();
    let summary = draft_summary(&conn, &config, &engine);
    transition(&conn, &engine, EntityKind::Summary, summary.id, Transition::Submit, &author());
    transition(&conn, &engine, EntityKind::Summary, summary.id, Transition::StartReview, &manager());

    let err = engine
        .apply(
            &conn,
            TransitionRequest::new(summary_ref(summary.id), Transition::Approve, author()),
        )
        .unwrap_err();
    match err {
        CoreError::CapabilityDenied {
            actor_id, required, ..
        } => {
            assert_eq!(actor_id, "amy");
            assert_eq!(required, vec!["manager".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let available = engine
        .available_transitions(&conn, summary_ref(summary.id), &reviewer())
        .unwrap();
    assert_eq!(available, vec![Transition::RequestChanges]);
}

#[test]
fn content_must_match_the_transition() {
    let (conn, config, engine) = setup();
    let summary = draft_summary(&conn, &config, &engine);

    let missing = engine
        .apply(
            &conn,
            TransitionRequest::new(summary_ref(summary.id), Transition::Edit, author()),
        )
        .unwrap_err();
    assert_eq!(missing.reason_code(), "invalid_request");

    let unexpected = engine
        .apply(
            &conn,
            TransitionRequest::new(summary_ref(summary.id), Transition::Submit, author())
                .with_content(ContentUpdate::Summary(summary_content("Act", None, "x"))),
        )
        .unwrap_err();
    assert_eq!(unexpected.reason_code(), "invalid_request");

    let long_body = vec!["word"; 401].join(" ");
    let too_long = engine
        .apply(
            &conn,
            TransitionRequest::new(summary_ref(summary.id), Transition::Edit, author())
                .with_content(ContentUpdate::Summary(summary_content("Act", None, &long_body))),
        )
        .unwrap_err();
    assert_eq!(too_long.reason_code(), "validation_failed");

    let compile = engine
        .apply(
            &conn,
            TransitionRequest::new(
                EntityRef::new(EntityKind::Synopsis, Uuid::new_v4()),
                Transition::Compile,
                manager(),
            ),
        )
        .unwrap_err();
    assert_eq!(compile.reason_code(), "invalid_request");
}

#[test]
fn committed_transitions_are_published_in_order() {
    let conn = open_db_in_memory().unwrap();
    let config = CoreConfig::default();
    let publisher = Arc::new(RecordingPublisher::new());
    let engine = WorkflowEngine::new(
        &config,
        Arc::new(EntityLocks::new(config.workflow.lock_timeout())),
        publisher.clone(),
    );
    let summary = draft_summary(&conn, &config, &engine);
    publisher.take();

    transition(&conn, &engine, EntityKind::Summary, summary.id, Transition::Submit, &author());
    let _ = engine.apply(
        &conn,
        TransitionRequest::new(summary_ref(summary.id), Transition::Approve, manager()),
    );

    let events = publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].transition, "submit");
    assert_eq!(events[0].from_state.as_deref(), Some("draft"));
    assert_eq!(events[0].actor_id, "amy");
}

#[test]
fn needs_help_flag_is_raised_during_screening_only() {
    let (conn, config, engine) = setup();
    let report = common::import(
        &conn,
        &config,
        &engine,
        vec![common::record("Bat roost exclusion", "Kunz, T.", "1999", None)],
    );
    let id = common::imported_id(&report, 0);

    let early = engine.flag_needs_help(&conn, id, true, &author()).unwrap_err();
    assert!(matches!(early, CoreError::IllegalTransition { .. }));

    transition(&conn, &engine, EntityKind::Reference, id, Transition::StartScreening, &author());
    let denied = engine.flag_needs_help(&conn, id, true, &reviewer()).unwrap_err();
    assert!(matches!(denied, CoreError::CapabilityDenied { .. }));

    let revision = engine.flag_needs_help(&conn, id, true, &author()).unwrap();
    assert_eq!(revision.transition, "flag_needs_help");
    assert_eq!(revision.to_state, "screening");
    assert_eq!(revision.content["needs_help"], true);
}

#[test]
fn excluded_reference_reopens_to_screening_for_managers_only() {
    let (conn, config, engine) = setup();
    let report = import(
        &conn,
        &config,
        &engine,
        vec![record("Bat boxes in conifer plantations", "Park, K.", "2004", None)],
    );
    let reference = imported_id(&report, 0);
    for step in [Transition::StartScreening, Transition::Exclude] {
        transition(&conn, &engine, EntityKind::Reference, reference, step, &author());
    }
    let ledger = Ledger::new(&conn);
    let before = ledger.count(reference).unwrap();

    let err = engine
        .apply(
            &conn,
            TransitionRequest::new(
                EntityRef::new(EntityKind::Reference, reference),
                Transition::Reopen,
                author(),
            ),
        )
        .unwrap_err();
    assert_eq!(err.reason_code(), "capability_denied");
    assert_eq!(ledger.count(reference).unwrap(), before);

    let outcome = engine
        .apply(
            &conn,
            TransitionRequest::new(
                EntityRef::new(EntityKind::Reference, reference),
                Transition::Reopen,
                manager(),
            ),
        )
        .unwrap();
    assert_eq!(outcome.from_state, "excluded");
    assert_eq!(outcome.to_state, "screening");
    assert_eq!(ledger.count(reference).unwrap(), before + 1);
    let reopened = SqliteReferenceRepository::new(&conn)
        .get(reference)
        .unwrap()
        .unwrap();
    assert_eq!(reopened.state, ReferenceState::Screening);
}

#[test]
fn summary_creation_follows_edit_roles_not_submit_roles() {
    let mut config = CoreConfig::default();
    for rule in &mut config.workflow.capabilities {
        if rule.kind == EntityKind::Summary
            && rule.from == "draft"
            && rule.transition == Transition::Submit
        {
            rule.roles = vec!["manager".to_string()];
        }
    }
    let conn = open_db_in_memory().unwrap();
    let engine = WorkflowEngine::with_defaults(&config);
    let reference = included_reference(&conn, &config, &engine, "Culvert use by bats", "2013");
    let content = || summary_content("Install culverts", None, "Draft text.");

    let created = engine
        .create_summary(&conn, reference, content(), &author())
        .unwrap();
    assert_eq!(Ledger::new(&conn).count(created.id).unwrap(), 1);

    let err = engine
        .create_summary(&conn, reference, content(), &reviewer())
        .unwrap_err();
    match err {
        CoreError::CapabilityDenied { transition, .. } => assert_eq!(transition, "edit"),
        other => panic!("unexpected error: {other:?}"),
    }
}
