mod common;

use common::{author, import, included_reference, record, summary_content};
use std::thread;
use synopsis_core::model::cluster::ClusterStatus;
use synopsis_core::{
    open_db, ClusterService, CoreConfig, CoreError, EntityKind, EntityRef, Ledger, Transition,
    TransitionRequest, WorkflowEngine,
};

#[test]
fn racing_submits_on_one_summary_apply_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);

    let setup = open_db(&path).unwrap();
    let reference = included_reference(&setup, &config, &engine, "Bat roosts in bridges", "2007");
    let summary = engine
        .create_summary(
            &setup,
            reference,
            summary_content("Retain bridge roosts", None, "Text."),
            &author(),
        )
        .unwrap();

    let results: Vec<Result<u32, CoreError>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let engine = &engine;
                let path = &path;
                scope.spawn(move || {
                    let conn = open_db(path).unwrap();
                    engine
                        .apply(
                            &conn,
                            TransitionRequest::new(
                                EntityRef::new(EntityKind::Summary, summary.id),
                                Transition::Submit,
                                author(),
                            ),
                        )
                        .map(|outcome| outcome.seq)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    let accepted: Vec<u32> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(accepted, vec![2]);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|err| matches!(err, CoreError::IllegalTransition { .. })));
    assert_eq!(Ledger::new(&setup).count(summary.id).unwrap(), 2);
}

#[test]
fn parallel_imports_of_one_source_form_a_single_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("imports.db");
    let config = CoreConfig::default();
    let engine = WorkflowEngine::with_defaults(&config);
    drop(open_db(&path).unwrap());

    thread::scope(|scope| {
        for casing in ["Kunz, Thomas", "KUNZ, THOMAS", "kunz, thomas"] {
            let engine = &engine;
            let config = &config;
            let path = &path;
            scope.spawn(move || {
                let conn = open_db(path).unwrap();
                import(
                    &conn,
                    config,
                    engine,
                    vec![record("Ecology of bats", casing, "1982", Some("10.1007/978-1-4613-3421-7"))],
                );
            });
        }
    });

    let conn = open_db(&path).unwrap();
    let clusters = ClusterService::new(&config, &engine)
        .list(&conn, ClusterStatus::Unresolved)
        .unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].members.len(), 3);
    assert!(clusters[0].pairs.iter().all(|pair| pair.certain));
}
