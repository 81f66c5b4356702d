use syndic::core::config::EngineConfig;
use syndic::core::db::db_connect;
use syndic::core::store::{Store, StoreKind};
use syndic::plugins::budget;
use syndic::plugins::ledger;
use syndic::plugins::scheduler::{
    add_task, claim_next_task, complete_task, fail_task, get_task, list_agents, list_tasks,
    register_agent, release_task, reclaim_stale, scheduler_db_path, FailOutcome, TaskStatus,
};
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store {
        kind: StoreKind::Repo,
        root: tmp.path().to_path_buf(),
    };
    syndic::plugins::scheduler::initialize_scheduler_db(&store.root).unwrap();
    syndic::plugins::budget::initialize_governance_db(&store.root).unwrap();
    syndic::plugins::ledger::initialize_trace_db(&store.root).unwrap();
    (tmp, store)
}

fn backdate_created(store: &Store, task_id: &str, ts: &str) {
    let conn = db_connect(&scheduler_db_path(&store.root).to_string_lossy()).unwrap();
    conn.execute(
        "UPDATE tasks SET created_at = ?1 WHERE id = ?2",
        rusqlite::params![ts, task_id],
    )
    .unwrap();
}

#[test]
fn test_task_lifecycle_to_completed() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "mid_dev").unwrap();

    let task = add_task(
        &store,
        "proj-a",
        "Implement export",
        "mid_dev",
        serde_json::json!({}),
    )
    .unwrap();
    assert_eq!(task.status, TaskStatus::Queued);

    let claimed = claim_next_task(&store, "mid_dev", "agent-1").unwrap().unwrap();
    assert_eq!(claimed.id, task.id);
    assert_eq!(claimed.status, TaskStatus::InProgress);
    assert_eq!(claimed.assigned_agent_id.as_deref(), Some("agent-1"));

    complete_task(&store, &task.id, serde_json::json!({"ok": true})).unwrap();
    let done = get_task(&store, &task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(serde_json::json!({"ok": true})));

    // completion emitted a trace entry and freed the agent
    let verification = ledger::verify_chain_integrity(&store).unwrap();
    assert!(verification.valid);
    assert_eq!(verification.chain_length, 1);
    let agents = list_agents(&store).unwrap();
    assert_eq!(agents[0].status, "idle");
}

#[test]
fn test_claim_selects_oldest_matching_role() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "qa").unwrap();

    let newer = add_task(&store, "proj-a", "newer", "qa", serde_json::json!({})).unwrap();
    let older = add_task(&store, "proj-a", "older", "qa", serde_json::json!({})).unwrap();
    let wrong_role = add_task(&store, "proj-a", "other", "mid_dev", serde_json::json!({})).unwrap();
    backdate_created(&store, &older.id, "100Z");
    backdate_created(&store, &newer.id, "200Z");

    let claimed = claim_next_task(&store, "qa", "agent-1").unwrap().unwrap();
    assert_eq!(claimed.id, older.id);
    assert_ne!(claimed.id, wrong_role.id);
}

#[test]
fn test_claim_returns_none_when_no_match() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "qa").unwrap();
    assert!(claim_next_task(&store, "qa", "agent-1").unwrap().is_none());
}

#[test]
fn test_claim_excludes_budget_paused_projects() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "qa").unwrap();
    add_task(&store, "proj-frozen", "t", "qa", serde_json::json!({})).unwrap();

    budget::pause_project(&store, "proj-frozen", "runaway spend").unwrap();
    assert!(claim_next_task(&store, "qa", "agent-1").unwrap().is_none());

    budget::resume_project(&store, "proj-frozen").unwrap();
    assert!(claim_next_task(&store, "qa", "agent-1").unwrap().is_some());
}

#[test]
fn test_agent_holds_at_most_one_task() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "qa").unwrap();
    add_task(&store, "proj-a", "t1", "qa", serde_json::json!({})).unwrap();
    add_task(&store, "proj-a", "t2", "qa", serde_json::json!({})).unwrap();

    claim_next_task(&store, "qa", "agent-1").unwrap().unwrap();
    let second = claim_next_task(&store, "qa", "agent-1");
    assert!(second.is_err());
}

#[test]
fn test_fail_requeues_until_retries_exhausted() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "qa").unwrap();
    let task = add_task(&store, "proj-a", "flaky", "qa", serde_json::json!({})).unwrap();

    for attempt in 1..=3u32 {
        claim_next_task(&store, "qa", "agent-1").unwrap().unwrap();
        let outcome = fail_task(&store, &task.id, "boom", 3).unwrap();
        match outcome {
            FailOutcome::Requeued { retry_count } => assert_eq!(retry_count, attempt),
            other => panic!("expected requeue on attempt {}, got {:?}", attempt, other),
        }
    }

    claim_next_task(&store, "qa", "agent-1").unwrap().unwrap();
    let outcome = fail_task(&store, &task.id, "boom", 3).unwrap();
    assert!(matches!(outcome, FailOutcome::Terminal { retry_count: 4 }));
    let dead = get_task(&store, &task.id).unwrap();
    assert_eq!(dead.status, TaskStatus::Failed);
    assert_eq!(dead.error_message.as_deref(), Some("boom"));

    // terminal tasks are retained, not deleted
    assert_eq!(list_tasks(&store, Some(TaskStatus::Failed)).unwrap().len(), 1);
    // and failing again is an explicit retry-exhausted error
    assert!(fail_task(&store, &task.id, "boom", 3).is_err());
}

#[test]
fn test_release_does_not_burn_a_retry() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "qa").unwrap();
    let task = add_task(&store, "proj-a", "t", "qa", serde_json::json!({})).unwrap();

    claim_next_task(&store, "qa", "agent-1").unwrap().unwrap();
    release_task(&store, &task.id).unwrap();

    let back = get_task(&store, &task.id).unwrap();
    assert_eq!(back.status, TaskStatus::Queued);
    assert_eq!(back.retry_count, 0);
    assert!(back.assigned_agent_id.is_none());
}

#[test]
fn test_reclaim_stale_requeues_and_marks_agent_offline() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "qa").unwrap();
    let task = add_task(&store, "proj-a", "hung", "qa", serde_json::json!({})).unwrap();
    claim_next_task(&store, "qa", "agent-1").unwrap().unwrap();

    // backdate the claim far past any cutoff
    let conn = db_connect(&scheduler_db_path(&store.root).to_string_lossy()).unwrap();
    conn.execute(
        "UPDATE tasks SET claimed_at = '100Z' WHERE id = ?1",
        [&task.id],
    )
    .unwrap();
    drop(conn);

    let reclaimed = reclaim_stale(&store, 60).unwrap();
    assert_eq!(reclaimed, vec![task.id.clone()]);

    let back = get_task(&store, &task.id).unwrap();
    assert_eq!(back.status, TaskStatus::Queued);
    assert_eq!(back.retry_count, 1);
    assert_eq!(list_agents(&store).unwrap()[0].status, "offline");

    // fresh claims are left alone
    claim_next_task(&store, "qa", "agent-1").unwrap().unwrap();
    assert!(reclaim_stale(&store, 3600).unwrap().is_empty());
}

#[test]
fn test_review_revision_loop() {
    let (_tmp, store) = test_store();
    register_agent(&store, "agent-1", "qa").unwrap();
    let task = add_task(&store, "proj-a", "t", "qa", serde_json::json!({})).unwrap();
    claim_next_task(&store, "qa", "agent-1").unwrap().unwrap();

    syndic::plugins::scheduler::advance_task(&store, &task.id, TaskStatus::InReview).unwrap();
    // missing notes is rejected before any mutation
    assert!(syndic::plugins::scheduler::request_revision(&store, &task.id, "  ").is_err());
    assert_eq!(get_task(&store, &task.id).unwrap().status, TaskStatus::InReview);

    syndic::plugins::scheduler::request_revision(&store, &task.id, "tighten error paths").unwrap();
    assert_eq!(
        get_task(&store, &task.id).unwrap().status,
        TaskStatus::NeedsRevision
    );

    syndic::plugins::scheduler::resume_task(&store, &task.id).unwrap();
    assert_eq!(get_task(&store, &task.id).unwrap().status, TaskStatus::InProgress);

    complete_task(&store, &task.id, serde_json::json!({})).unwrap();
}

#[test]
fn test_concurrent_claims_never_double_assign() {
    let (_tmp, store) = test_store();
    const TASKS: usize = 6;
    const AGENTS: usize = 12;

    for i in 0..TASKS {
        add_task(
            &store,
            "proj-a",
            &format!("task-{}", i),
            "mid_dev",
            serde_json::json!({}),
        )
        .unwrap();
    }
    for i in 0..AGENTS {
        register_agent(&store, &format!("agent-{}", i), "mid_dev").unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..AGENTS {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            let agent = format!("agent-{}", i);
            claim_next_task(&store, "mid_dev", &agent)
                .unwrap()
                .map(|t| t.id)
        }));
    }
    let claims: Vec<Option<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let won: Vec<&String> = claims.iter().flatten().collect();
    // every task got exactly one winner
    assert_eq!(won.len(), TASKS);
    let mut unique: Vec<&String> = won.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), TASKS);

    for task in list_tasks(&store, Some(TaskStatus::InProgress)).unwrap() {
        assert!(task.assigned_agent_id.is_some());
    }
}

#[test]
fn test_add_task_validates_input() {
    let (_tmp, store) = test_store();
    assert!(add_task(&store, "p", "  ", "qa", serde_json::json!({})).is_err());
    assert!(add_task(&store, "p", "title", "", serde_json::json!({})).is_err());
}

#[test]
fn test_config_default_retry_cap_matches_engine() {
    let cfg = EngineConfig::builtin().unwrap();
    assert_eq!(cfg.scheduler.max_retries, syndic::plugins::scheduler::DEFAULT_MAX_RETRIES);
}
