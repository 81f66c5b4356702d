use syndic::core::config::EngineConfig;
use syndic::core::db::db_connect;
use syndic::core::error::SyndicError;
use syndic::core::store::{Store, StoreKind};
use syndic::plugins::allocator::{
    allocate_agents_for_project, allocation_history, latest_allocation, AgentRole,
    HeuristicAnalyzer, ProjectAnalyzer, ProjectSignals,
};
use syndic::plugins::budget::{governance_db_path, initialize_governance_db, round4};
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

/// Fixed-signal analyzer so allocations are deterministic in tests.
struct StubAnalyzer(ProjectSignals);

impl ProjectAnalyzer for StubAnalyzer {
    fn analyze(&self, _prd: &str) -> Result<ProjectSignals, SyndicError> {
        Ok(self.0.clone())
    }
}

fn signals(features: u32, complexity: u32, wph: u32) -> ProjectSignals {
    ProjectSignals {
        features,
        modules: 5,
        total_words: 2000,
        complexity_score: complexity,
        workflows_per_hour: wph,
    }
}

#[test]
fn test_small_project_gets_small_tier() {
    let (_tmp, store, config) = test_store();
    let analyzer = StubAnalyzer(signals(5, 30, 2));

    let log = allocate_agents_for_project(&store, &config, "proj-a", "prd text", &analyzer).unwrap();
    assert_eq!(log.allocation.get("team_lead"), Some(&1));
    assert_eq!(log.allocation.get("junior_dev"), Some(&2));
    assert_eq!(log.allocation.values().sum::<u32>(), 7);
    assert!(round4(log.estimated_cost_usd) <= 50.0);
}

#[test]
fn test_heavy_project_is_trimmed_under_ceiling() {
    let (_tmp, store, config) = test_store();
    let analyzer = StubAnalyzer(signals(40, 90, 20));

    let log = allocate_agents_for_project(&store, &config, "proj-a", "prd text", &analyzer).unwrap();
    assert!(round4(log.estimated_cost_usd) <= config.allocator.cost_ceiling_usd);
    assert!(log.allocation.get("team_lead").copied().unwrap_or(0) >= 1);
}

#[test]
fn test_cooldown_rejects_the_second_allocation() {
    let (_tmp, store, config) = test_store();
    let analyzer = StubAnalyzer(signals(5, 30, 2));

    allocate_agents_for_project(&store, &config, "proj-a", "prd", &analyzer).unwrap();
    let second = allocate_agents_for_project(&store, &config, "proj-a", "prd", &analyzer);
    match second {
        Err(SyndicError::CooldownActive {
            project,
            retry_after_secs,
        }) => {
            assert_eq!(project, "proj-a");
            assert!(retry_after_secs > 0);
            assert!(retry_after_secs <= config.allocator.cooldown_secs);
        }
        other => panic!("expected CooldownActive, got {:?}", other.map(|l| l.id)),
    }

    // history keeps exactly the one successful allocation
    assert_eq!(allocation_history(&store, "proj-a").unwrap().len(), 1);

    // an unrelated project is unaffected
    allocate_agents_for_project(&store, &config, "proj-b", "prd", &analyzer).unwrap();
}

#[test]
fn test_cooldown_expires_and_history_is_retained() {
    let (_tmp, store, config) = test_store();
    let analyzer = StubAnalyzer(signals(5, 30, 2));
    let first = allocate_agents_for_project(&store, &config, "proj-a", "prd", &analyzer).unwrap();

    // age the prior allocation past the window
    let conn = db_connect(&governance_db_path(&store.root).to_string_lossy()).unwrap();
    conn.execute(
        "UPDATE allocations SET created_at = '100Z' WHERE id = ?1",
        [&first.id],
    )
    .unwrap();
    drop(conn);

    let analyzer = StubAnalyzer(signals(15, 40, 3));
    let second = allocate_agents_for_project(&store, &config, "proj-a", "prd", &analyzer).unwrap();
    assert_ne!(first.id, second.id);

    let history = allocation_history(&store, "proj-a").unwrap();
    assert_eq!(history.len(), 2);

    let latest = latest_allocation(&store, "proj-a").unwrap().unwrap();
    assert_eq!(latest.id, second.id);
    // medium tier this time
    assert_eq!(latest.allocation.values().sum::<u32>(), 13);
}

#[test]
fn test_role_rate_table_is_total() {
    for role in AgentRole::ALL {
        assert!(role.cost_rate_usd() > 0.0);
        assert!(!role.as_str().is_empty());
    }
}

#[test]
fn test_heuristic_analyzer_feeds_allocation() {
    let (_tmp, store, config) = test_store();
    let prd = "# Storefront rebuild\n\n## Catalog\n- product listing\n- search\n- filters\n\n## Checkout\n- cart\n- payments\n";
    let log =
        allocate_agents_for_project(&store, &config, "proj-a", prd, &HeuristicAnalyzer).unwrap();
    // 5 bullets -> small tier
    assert_eq!(log.allocation.values().sum::<u32>(), 7);
}
