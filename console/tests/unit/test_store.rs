//! Deployment store merge tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use openapi_client::models::StatusUpdatePayload;

use deploy_console::models::deployment::{
    record_from_status_update, DeploymentRecord, DeploymentStatus, EntityRef, RecordId,
    RecordOrigin,
};
use deploy_console::reconcile::store::DeploymentStore;

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
}

fn server(id: i64, version: &str, status: DeploymentStatus, minute: i64) -> DeploymentRecord {
    DeploymentRecord {
        id: RecordId::Server(id),
        version: version.to_string(),
        status,
        environment: EntityRef::new(3, "staging"),
        project: EntityRef::new(9, "billing"),
        build_number: Some(100 + id as u64),
        triggered_by: "ci".to_string(),
        created_at: at(minute),
        completed_at: None,
        origin: RecordOrigin::Authoritative,
        created_at_provisional: false,
    }
}

fn speculative(version: &str, minute: i64) -> DeploymentRecord {
    DeploymentRecord {
        id: RecordId::local(),
        build_number: None,
        triggered_by: "alice".to_string(),
        origin: RecordOrigin::Speculative,
        ..server(0, version, DeploymentStatus::Pending, minute)
    }
}

#[test]
fn test_merge_is_idempotent() {
    let snapshot = vec![
        server(1, "1.0.0", DeploymentStatus::Success, 1),
        server(2, "1.0.1", DeploymentStatus::InProgress, 2),
        server(3, "1.0.2", DeploymentStatus::Pending, 3),
    ];

    let mut store = DeploymentStore::default();
    let first = store.merge(snapshot.clone(), at(5));
    assert_eq!(first.inserted, 3);
    let after_first = store.records().to_vec();

    let second = store.merge(snapshot, at(6));
    assert!(!second.changed());
    assert_eq!(store.records(), after_first.as_slice());
}

#[test]
fn test_status_never_moves_backwards() {
    let mut store = DeploymentStore::default();
    store.merge(vec![server(1, "1.0.0", DeploymentStatus::Success, 1)], at(2));

    for stale in [DeploymentStatus::Pending, DeploymentStatus::InProgress, DeploymentStatus::Failed] {
        let outcome = store.merge(vec![server(1, "1.0.0", stale, 1)], at(3));
        assert!(!outcome.changed());
        assert_eq!(store.records()[0].status, DeploymentStatus::Success);
    }
}

#[test]
fn test_late_pending_does_not_overwrite_progress() {
    let mut store = DeploymentStore::default();
    store.merge(vec![server(1, "1.0.0", DeploymentStatus::InProgress, 1)], at(2));
    store.merge(vec![server(1, "1.0.0", DeploymentStatus::Pending, 1)], at(3));
    assert_eq!(store.records()[0].status, DeploymentStatus::InProgress);
}

#[test]
fn test_speculative_replacement_keeps_position() {
    let mut store = DeploymentStore::default();
    let pending = speculative("2.0.0", 10);
    store.merge(
        vec![
            server(1, "1.0.0", DeploymentStatus::Success, 1),
            pending.clone(),
            server(2, "1.5.0", DeploymentStatus::Success, 20),
        ],
        at(11),
    );
    assert_eq!(store.records()[1].id, pending.id);

    // the backend stamps its own creation time and build number
    let confirmed = server(42, "2.0.0", DeploymentStatus::InProgress, 11);
    let outcome = store.merge(vec![confirmed], at(12));

    assert_eq!(outcome.replaced_speculative, 1);
    assert_eq!(outcome.inserted, 0);
    assert_eq!(store.len(), 3);

    let replaced = &store.records()[1];
    assert_eq!(replaced.id, RecordId::Server(42));
    assert_eq!(replaced.origin, RecordOrigin::Authoritative);
    assert_eq!(replaced.status, DeploymentStatus::InProgress);
    assert_eq!(replaced.build_number, Some(142));
    assert_eq!(replaced.created_at, pending.created_at);
    assert!(store.get(&pending.id).is_none());
}

#[test]
fn test_matching_build_numbers_reconcile_outside_window() {
    let mut store = DeploymentStore::default();
    let mut pending = speculative("3.0.0", 0);
    pending.build_number = Some(107);
    store.merge(vec![pending], at(1));

    let outcome = store.merge(vec![server(7, "3.0.0", DeploymentStatus::InProgress, 0)], at(60));
    assert_eq!(outcome.replaced_speculative, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_stale_speculative_is_not_matched_without_build_number() {
    let mut store = DeploymentStore::default();
    store.merge(vec![speculative("4.0.0", 0)], at(0));

    let mut late = server(8, "4.0.0", DeploymentStatus::InProgress, 30);
    late.build_number = None;
    let outcome = store.merge(vec![late], at(30));

    assert_eq!(outcome.replaced_speculative, 0);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_other_environment_is_not_matched() {
    let mut store = DeploymentStore::default();
    store.merge(vec![speculative("5.0.0", 0)], at(0));

    let mut production = server(9, "5.0.0", DeploymentStatus::Pending, 1);
    production.environment = EntityRef::new(4, "production");
    let outcome = store.merge(vec![production], at(1));

    assert_eq!(outcome.replaced_speculative, 0);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_new_records_are_inserted_by_creation_time() {
    let mut store = DeploymentStore::default();
    store.merge(vec![server(1, "a", DeploymentStatus::Success, 1)], at(1));
    store.merge(vec![server(3, "c", DeploymentStatus::Pending, 3)], at(3));
    store.merge(vec![server(2, "b", DeploymentStatus::Success, 2)], at(3));

    let ids: Vec<_> = store.records().iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![RecordId::Server(3), RecordId::Server(2), RecordId::Server(1)]);
    assert_eq!(store.active().len(), 1);
}

#[test]
fn test_old_history_does_not_claim_a_fresh_trigger() {
    const WEEK: i64 = 7 * 24 * 60;
    let mut store = DeploymentStore::default();
    let pending = speculative("1.0.0", WEEK);
    store.merge(vec![pending.clone()], at(WEEK + 1));

    let outcome = store.merge(
        vec![
            server(10, "1.0.0", DeploymentStatus::Success, 0),
            server(55, "1.0.0", DeploymentStatus::InProgress, WEEK + 1),
        ],
        at(WEEK + 1),
    );

    assert_eq!(outcome.replaced_speculative, 1);
    let ids: Vec<_> = store.records().iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![RecordId::Server(55), RecordId::Server(10)]);
    assert!(store.get(&pending.id).is_none());

    // the week-old record is history, not a transition of the trigger
    let replaced = outcome
        .transitions
        .iter()
        .find(|t| t.previous.as_ref().map(|p| p.id == pending.id).unwrap_or(false))
        .unwrap();
    assert_eq!(replaced.next.id, RecordId::Server(55));
    assert_eq!(replaced.next.status, DeploymentStatus::InProgress);
}

fn pushed(id: i64, status: &str, minute: i64) -> DeploymentRecord {
    let update = StatusUpdatePayload {
        deployment_id: id,
        status: status.to_string(),
        version: "1.2.0".to_string(),
        build_number: None,
        environment_name: Some("staging".to_string()),
        project_name: Some("billing".to_string()),
        triggered_by: None,
        timestamp: Some(at(minute)),
    };
    record_from_status_update(update, at(minute)).unwrap()
}

#[test]
fn test_pushed_record_takes_creation_time_from_full_record() {
    let mut store = DeploymentStore::default();
    store.merge(
        vec![
            server(1, "1.0.0", DeploymentStatus::Success, 0),
            server(2, "1.1.0", DeploymentStatus::Success, 10),
        ],
        at(11),
    );

    // status change seen before the first fetch lists the deployment
    store.merge(vec![pushed(42, "IN_PROGRESS", 30)], at(30));
    assert_eq!(store.records()[0].id, RecordId::Server(42));
    assert!(store.records()[0].created_at_provisional);

    let outcome = store.merge(
        vec![server(42, "1.2.0", DeploymentStatus::InProgress, 5)],
        at(31),
    );
    assert!(outcome.changed());

    let ids: Vec<_> = store.records().iter().map(|r| r.id.clone()).collect();
    assert_eq!(
        ids,
        vec![RecordId::Server(2), RecordId::Server(42), RecordId::Server(1)]
    );
    let record = store.get(&RecordId::Server(42)).unwrap();
    assert_eq!(record.created_at, at(5));
    assert!(!record.created_at_provisional);

    // later pushes never bring the status-change time back
    store.merge(vec![pushed(42, "SUCCESS", 40)], at(40));
    let record = store.get(&RecordId::Server(42)).unwrap();
    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(record.created_at, at(5));
    assert_eq!(store.records()[1].id, RecordId::Server(42));
}
