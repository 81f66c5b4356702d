use syndic::core::config::EngineConfig;
use syndic::core::db::db_connect;
use syndic::core::error::SyndicError;
use syndic::core::store::{Store, StoreKind};
use syndic::plugins::budget::{governance_db_path, initialize_governance_db};
use syndic::plugins::gates::{
    approve_gate, configure_gates, create_gate, get_gate, get_pending_gates, is_gate_enabled,
    modify_and_approve, reject_gate, GateStatus,
};
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store, EngineConfig) {
    let tmp = tempdir().unwrap();
    let store = Store {
        kind: StoreKind::Repo,
        root: tmp.path().to_path_buf(),
    };
    initialize_governance_db(&store.root).unwrap();
    let config = EngineConfig::builtin().unwrap();
    (tmp, store, config)
}

fn quick_gate(
    store: &Store,
    config: &EngineConfig,
    project: &str,
    gate_type: &str,
) -> syndic::plugins::gates::ApprovalGate {
    create_gate(
        store,
        config,
        project,
        gate_type,
        "Ship the payment module",
        "diff summary attached",
        serde_json::json!({"files": 12}),
        Some("task-1"),
    )
    .unwrap()
}

#[test]
fn test_enabled_gate_starts_pending_and_approves_once() {
    let (_tmp, store, config) = test_store();
    let gate = quick_gate(&store, &config, "proj-a", "security");
    assert_eq!(gate.status, GateStatus::Pending);

    let decided = approve_gate(&store, &gate.id, "alice", Some("lgtm")).unwrap();
    assert_eq!(decided.status, GateStatus::Approved);
    assert!(decided.status.is_approval());

    // deciding a decided gate is an explicit error, not a silent no-op
    let again = approve_gate(&store, &gate.id, "bob", None);
    assert!(matches!(again, Err(SyndicError::AlreadyDecided(_))));
    let rejected = reject_gate(&store, &gate.id, "bob", "changed my mind");
    assert!(matches!(rejected, Err(SyndicError::AlreadyDecided(_))));
}

#[test]
fn test_disabled_type_is_born_approved() {
    let (_tmp, store, config) = test_store();
    // "design-review" is not in the default enabled set
    let gate = quick_gate(&store, &config, "proj-a", "design-review");
    assert_eq!(gate.status, GateStatus::Approved);
    assert!(gate.decided_at.is_some());
    assert!(gate
        .reviewer_notes
        .as_deref()
        .unwrap()
        .contains("auto-approved"));

    // it never enters the pending queue
    assert!(get_pending_gates(&store, "proj-a").unwrap().is_empty());
}

#[test]
fn test_configure_gates_replaces_the_enabled_set() {
    let (_tmp, store, config) = test_store();

    // defaults until configured
    assert!(is_gate_enabled(&store, &config, "proj-a", "pre-commit").unwrap());

    configure_gates(&store, "proj-a", &["security".to_string()]).unwrap();
    assert!(is_gate_enabled(&store, &config, "proj-a", "security").unwrap());
    assert!(!is_gate_enabled(&store, &config, "proj-a", "pre-commit").unwrap());

    let gate = quick_gate(&store, &config, "proj-a", "pre-commit");
    assert_eq!(gate.status, GateStatus::Approved);

    // an explicitly empty set disables everything
    configure_gates(&store, "proj-b", &[]).unwrap();
    assert!(!is_gate_enabled(&store, &config, "proj-b", "security").unwrap());
    let gate = quick_gate(&store, &config, "proj-b", "security");
    assert_eq!(gate.status, GateStatus::Approved);

    // other projects keep the defaults
    assert!(is_gate_enabled(&store, &config, "proj-c", "security").unwrap());
}

#[test]
fn test_reject_requires_notes() {
    let (_tmp, store, config) = test_store();
    let gate = quick_gate(&store, &config, "proj-a", "security");

    let missing = reject_gate(&store, &gate.id, "alice", "   ");
    assert!(matches!(missing, Err(SyndicError::ValidationError(_))));
    // no mutation happened
    assert_eq!(get_gate(&store, &gate.id).unwrap().status, GateStatus::Pending);

    reject_gate(&store, &gate.id, "alice", "payload touches prod credentials").unwrap();
    let decided = get_gate(&store, &gate.id).unwrap();
    assert_eq!(decided.status, GateStatus::Rejected);
    assert!(!decided.status.is_approval());
}

#[test]
fn test_modify_and_approve_replaces_payload() {
    let (_tmp, store, config) = test_store();
    let gate = quick_gate(&store, &config, "proj-a", "architecture");

    let decided = modify_and_approve(
        &store,
        &gate.id,
        "alice",
        serde_json::json!({"files": 8, "dropped": ["telemetry.rs"]}),
        Some("trimmed the scope"),
    )
    .unwrap();
    assert_eq!(decided.status, GateStatus::Modified);
    assert!(decided.status.is_approval());

    let stored = get_gate(&store, &gate.id).unwrap();
    assert_eq!(stored.payload, serde_json::json!({"files": 12}));
    assert_eq!(
        stored.modified_payload,
        Some(serde_json::json!({"files": 8, "dropped": ["telemetry.rs"]}))
    );
}

#[test]
fn test_pending_gates_are_fifo_by_creation() {
    let (_tmp, store, config) = test_store();
    let g1 = quick_gate(&store, &config, "proj-a", "security");
    let g2 = quick_gate(&store, &config, "proj-a", "pre-commit");
    let g3 = quick_gate(&store, &config, "proj-a", "architecture");
    // other projects don't leak into the queue
    quick_gate(&store, &config, "proj-z", "security");

    // force distinct creation times so order is unambiguous
    let conn = db_connect(&governance_db_path(&store.root).to_string_lossy()).unwrap();
    for (id, ts) in [(&g2.id, "100Z"), (&g3.id, "200Z"), (&g1.id, "300Z")] {
        conn.execute(
            "UPDATE gates SET created_at = ?1 WHERE id = ?2",
            [ts, id.as_str()],
        )
        .unwrap();
    }
    drop(conn);

    let pending = get_pending_gates(&store, "proj-a").unwrap();
    let ids: Vec<&str> = pending.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec![g2.id.as_str(), g3.id.as_str(), g1.id.as_str()]);

    // deciding removes from the queue
    approve_gate(&store, &g2.id, "alice", None).unwrap();
    assert_eq!(get_pending_gates(&store, "proj-a").unwrap().len(), 2);
}

#[test]
fn test_create_gate_validates_input() {
    let (_tmp, store, config) = test_store();
    assert!(create_gate(
        &store,
        &config,
        "proj-a",
        "",
        "title",
        "",
        serde_json::json!({}),
        None
    )
    .is_err());
    assert!(create_gate(
        &store,
        &config,
        "proj-a",
        "security",
        "  ",
        "",
        serde_json::json!({}),
        None
    )
    .is_err());
}
