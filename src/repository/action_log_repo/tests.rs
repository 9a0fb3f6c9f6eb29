use super::ActionLogRepository;
use crate::domain::action_log::{ActionLog, ActionType};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn setup_test_db() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::init_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

fn make_test_log(action_type: ActionType, target: &str, actor: &str) -> ActionLog {
    ActionLog::new(
        action_type,
        actor,
        Some(target),
        Some(json!({ "withdrawn": ["R1"] })),
        Some("Test log".to_string()),
        Utc::now().naive_utc(),
    )
}

#[test]
fn test_insert_and_find_by_id() {
    let repo = ActionLogRepository::new(setup_test_db());

    let log = make_test_log(ActionType::WaiverDecision, "C1", "dispatcher");
    let id = repo.insert(&log).unwrap();
    assert_eq!(id, log.action_id);

    let found = repo.find_by_id(&id).unwrap().unwrap();
    assert_eq!(found.action_type, "WaiverDecision");
    assert_eq!(found.actor, "dispatcher");
    assert_eq!(found.target_id.as_deref(), Some("C1"));
    assert_eq!(found.payload_json, Some(json!({ "withdrawn": ["R1"] })));

    assert!(repo.find_by_id("nope").unwrap().is_none());
}

#[test]
fn test_find_by_target_keeps_insert_order() {
    let repo = ActionLogRepository::new(setup_test_db());

    let logs = vec![
        make_test_log(ActionType::WaiverDecision, "C1", "u1"),
        make_test_log(ActionType::FeeDecision, "C1", "u1"),
        make_test_log(ActionType::FeeDecision, "C2", "u2"),
    ];
    assert_eq!(repo.batch_insert(logs).unwrap(), 3);

    let c1 = repo.find_by_target("C1").unwrap();
    assert_eq!(c1.len(), 2);
    assert_eq!(c1[0].action_type, "WaiverDecision");
    assert_eq!(c1[1].action_type, "FeeDecision");
    assert_eq!(repo.find_recent(10).unwrap().len(), 3);
}

#[test]
fn test_find_by_time_range() {
    let repo = ActionLogRepository::new(setup_test_db());
    repo.insert(&make_test_log(ActionType::GroupReset, "G1", "u1")).unwrap();

    let now = Utc::now().naive_utc();
    let hits = repo
        .find_by_time_range(now - Duration::hours(1), now + Duration::hours(1))
        .unwrap();
    assert_eq!(hits.len(), 1);

    let misses = repo
        .find_by_time_range(now - Duration::hours(3), now - Duration::hours(2))
        .unwrap();
    assert!(misses.is_empty());
}
