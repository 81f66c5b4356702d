//! Centralized database schema definitions for Syndic's consolidated bins.
//!
//! Syndic uses 3 SQLite databases ("bins") to manage state:
//! 1. scheduler.db: task backlog, status machine, and agent registry.
//! 2. governance.db: approval gates, budgets, safety lists, allocations.
//! 3. trace.db: the hash-chained governance trace ledger.

// --- 1. Scheduler Bin ---
pub const SCHEDULER_DB_NAME: &str = "scheduler.db";
pub const SCHEDULER_SCHEMA_VERSION: u32 = 1;

pub const SCHEDULER_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const SCHEDULER_DB_SCHEMA_TASKS: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        title TEXT NOT NULL,
        required_role TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'queued',
        assigned_agent_id TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        context_packet TEXT NOT NULL DEFAULT '{}',
        result TEXT,
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        claimed_at TEXT
    )
";

pub const SCHEDULER_DB_SCHEMA_AGENTS: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        role TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'idle',
        score REAL NOT NULL DEFAULT 0.0,
        risk_level TEXT NOT NULL DEFAULT 'low',
        registered_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const SCHEDULER_DB_INDEX_TASKS_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)";
pub const SCHEDULER_DB_INDEX_TASKS_ROLE: &str =
    "CREATE INDEX IF NOT EXISTS idx_tasks_role ON tasks(required_role, status)";
pub const SCHEDULER_DB_INDEX_TASKS_PROJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id)";
pub const SCHEDULER_DB_INDEX_AGENTS_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)";

// --- 2. Governance Bin ---
pub const GOVERNANCE_DB_NAME: &str = "governance.db";

pub const GOVERNANCE_DB_SCHEMA_GATES: &str = "
    CREATE TABLE IF NOT EXISTS gates (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        gate_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        payload TEXT NOT NULL DEFAULT '{}',
        modified_payload TEXT,
        reviewer TEXT,
        reviewer_notes TEXT,
        task_id TEXT,
        created_at TEXT NOT NULL,
        decided_at TEXT
    )
";
pub const GOVERNANCE_DB_INDEX_GATES_PENDING: &str =
    "CREATE INDEX IF NOT EXISTS idx_gates_pending ON gates(project_id, status, created_at)";

pub const GOVERNANCE_DB_SCHEMA_GATE_CONFIG: &str = "
    CREATE TABLE IF NOT EXISTS gate_config (
        project_id TEXT NOT NULL,
        gate_type TEXT NOT NULL,
        UNIQUE(project_id, gate_type)
    )
";

pub const GOVERNANCE_DB_SCHEMA_BUDGETS: &str = "
    CREATE TABLE IF NOT EXISTS budgets (
        project_id TEXT PRIMARY KEY,
        current_day TEXT NOT NULL,
        daily_spent REAL NOT NULL DEFAULT 0.0,
        project_spent REAL NOT NULL DEFAULT 0.0,
        paused INTEGER NOT NULL DEFAULT 0,
        pause_reason TEXT,
        updated_at TEXT NOT NULL
    )
";

pub const GOVERNANCE_DB_SCHEMA_ALLOCATIONS: &str = "
    CREATE TABLE IF NOT EXISTS allocations (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        allocation TEXT NOT NULL, -- JSON map of role -> count
        estimated_cost_usd REAL NOT NULL,
        created_at TEXT NOT NULL
    )
";
pub const GOVERNANCE_DB_INDEX_ALLOCATIONS_PROJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_allocations_project ON allocations(project_id, created_at)";

pub const GOVERNANCE_DB_SCHEMA_SAFETY_ALLOWLIST: &str = "
    CREATE TABLE IF NOT EXISTS safety_allowlist (
        entry TEXT PRIMARY KEY,
        added_by TEXT NOT NULL DEFAULT 'system',
        added_at TEXT NOT NULL
    )
";

pub const GOVERNANCE_DB_SCHEMA_SAFETY_DENYLIST: &str = "
    CREATE TABLE IF NOT EXISTS safety_denylist (
        entry TEXT PRIMARY KEY,
        added_by TEXT NOT NULL DEFAULT 'system',
        added_at TEXT NOT NULL
    )
";

// --- 3. Trace Bin ---
pub const TRACE_DB_NAME: &str = "trace.db";

pub const TRACE_DB_SCHEMA_ENTRIES: &str = "
    CREATE TABLE IF NOT EXISTS trace_entries (
        idx INTEGER PRIMARY KEY,
        prev_hash TEXT NOT NULL,
        task_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        metadata TEXT NOT NULL,
        chain_hash TEXT NOT NULL,
        ts TEXT NOT NULL
    )
";

// --- Journals ---
pub const BROKER_EVENTS_NAME: &str = "broker.events.jsonl";
pub const LIFECYCLE_EVENTS_NAME: &str = "events.jsonl";
