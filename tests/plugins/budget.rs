use syndic::core::config::EngineConfig;
use syndic::core::db::db_connect;
use syndic::core::store::{Store, StoreKind};
use syndic::plugins::budget::{
    can_proceed, get_budget, governance_db_path, initialize_governance_db, pause_project,
    record_cost, resume_project, round4,
};
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store {
        kind: StoreKind::Repo,
        root: tmp.path().to_path_buf(),
    };
    initialize_governance_db(&store.root).unwrap();
    (tmp, store)
}

fn tight_config(daily: f64, project: f64) -> EngineConfig {
    let mut cfg = EngineConfig::builtin().unwrap();
    cfg.budget.daily_ceiling_usd = daily;
    cfg.budget.project_ceiling_usd = project;
    cfg
}

#[test]
fn test_record_cost_accumulates_monotonically() {
    let (_tmp, store) = test_store();
    let cfg = tight_config(100.0, 1000.0);

    let mut last_daily = 0.0;
    let mut last_project = 0.0;
    for _ in 0..10 {
        let out = record_cost(&store, &cfg, "proj-a", "task-1", 0.37).unwrap();
        assert!(out.allowed);
        assert!(out.daily_spent > last_daily);
        assert!(out.project_spent > last_project);
        last_daily = out.daily_spent;
        last_project = out.project_spent;
    }
    assert_eq!(round4(last_project), 3.7);
}

#[test]
fn test_daily_ceiling_pauses_and_blocks_until_resume() {
    let (_tmp, store) = test_store();
    let cfg = tight_config(1.0, 1000.0);

    assert!(can_proceed(&store, &cfg, "proj-a", 0.0).unwrap());
    let out = record_cost(&store, &cfg, "proj-a", "task-1", 1.0).unwrap();
    assert!(out.paused);

    // sticky until explicit resume
    assert!(!can_proceed(&store, &cfg, "proj-a", 0.0).unwrap());
    assert!(!can_proceed(&store, &cfg, "proj-a", 0.0).unwrap());

    // a cost landing on the paused project is still booked but flagged
    let out = record_cost(&store, &cfg, "proj-a", "task-2", 0.25).unwrap();
    assert!(!out.allowed);
    assert_eq!(round4(out.daily_spent), 1.25);

    resume_project(&store, "proj-a").unwrap();
    let rec = get_budget(&store, "proj-a").unwrap();
    assert!(!rec.paused);
    // unpaused, but today's spend still sits over the ceiling
    assert!(!can_proceed(&store, &cfg, "proj-a", 0.0).unwrap());
}

#[test]
fn test_can_proceed_accounts_for_estimate() {
    let (_tmp, store) = test_store();
    let cfg = tight_config(10.0, 1000.0);

    record_cost(&store, &cfg, "proj-a", "task-1", 8.0).unwrap();
    assert!(can_proceed(&store, &cfg, "proj-a", 1.0).unwrap());
    assert!(!can_proceed(&store, &cfg, "proj-a", 2.0).unwrap());
    assert!(!can_proceed(&store, &cfg, "proj-a", 5.0).unwrap());
}

#[test]
fn test_project_ceiling_pauses_independently_of_daily() {
    let (_tmp, store) = test_store();
    let cfg = tight_config(1000.0, 5.0);

    let out = record_cost(&store, &cfg, "proj-a", "task-1", 5.0).unwrap();
    assert!(out.paused);
    let rec = get_budget(&store, "proj-a").unwrap();
    assert!(rec.pause_reason.unwrap().contains("project ceiling"));
}

#[test]
fn test_manual_pause_and_resume() {
    let (_tmp, store) = test_store();
    let cfg = tight_config(100.0, 1000.0);

    assert!(pause_project(&store, "proj-a", " ").is_err());
    pause_project(&store, "proj-a", "operator hold").unwrap();
    assert!(!can_proceed(&store, &cfg, "proj-a", 0.0).unwrap());

    resume_project(&store, "proj-a").unwrap();
    assert!(can_proceed(&store, &cfg, "proj-a", 0.0).unwrap());
}

#[test]
fn test_daily_window_resets_on_rollover() {
    let (_tmp, store) = test_store();
    let cfg = tight_config(2.0, 1000.0);

    let out = record_cost(&store, &cfg, "proj-a", "task-1", 2.0).unwrap();
    assert!(out.paused);

    // simulate the UTC day rolling over
    let conn = db_connect(&governance_db_path(&store.root).to_string_lossy()).unwrap();
    conn.execute(
        "UPDATE budgets SET current_day = '2000-01-01' WHERE project_id = 'proj-a'",
        [],
    )
    .unwrap();
    drop(conn);

    let rec = get_budget(&store, "proj-a").unwrap();
    assert_eq!(rec.daily_spent, 0.0);
    assert!(!rec.paused, "daily-ceiling pause lifts with the new day");
    assert_eq!(round4(rec.project_spent), 2.0, "cumulative spend survives");
    assert!(can_proceed(&store, &cfg, "proj-a", 0.0).unwrap());
}

#[test]
fn test_manual_pause_survives_rollover() {
    let (_tmp, store) = test_store();
    let cfg = tight_config(100.0, 1000.0);
    record_cost(&store, &cfg, "proj-a", "task-1", 1.0).unwrap();
    pause_project(&store, "proj-a", "incident review").unwrap();

    let conn = db_connect(&governance_db_path(&store.root).to_string_lossy()).unwrap();
    conn.execute(
        "UPDATE budgets SET current_day = '2000-01-01' WHERE project_id = 'proj-a'",
        [],
    )
    .unwrap();
    drop(conn);

    let rec = get_budget(&store, "proj-a").unwrap();
    assert!(rec.paused, "only daily-ceiling pauses lift on rollover");
}

#[test]
fn test_rejects_invalid_amounts() {
    let (_tmp, store) = test_store();
    let cfg = tight_config(100.0, 1000.0);
    assert!(record_cost(&store, &cfg, "proj-a", "t", -0.5).is_err());
    assert!(record_cost(&store, &cfg, "proj-a", "t", f64::NAN).is_err());
}
