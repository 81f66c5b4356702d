//! Safety policy engine: package installs, shell commands, file paths.
//!
//! Evaluation is a pure read over one owned `SafetyPolicy` instance: two
//! administratively mutable sets (allowlist, denylist) mirrored from
//! governance.db, and fixed pattern batteries for dangerous commands and
//! restricted paths. Checks are advisory reads; mutation takes effect for
//! the next check with no rollback machinery.

use crate::core::broker::DbBroker;
use crate::core::config::EngineConfig;
use crate::core::error::SyndicError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::budget::governance_db_path;
use clap::{Parser, Subcommand};
use colored::Colorize;
use regex::Regex;
use rusqlite::params;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub allowed: bool,
    /// Hard block. `allowed=false, blocked=false` means "flag for human
    /// approval", not "refuse".
    pub blocked: bool,
    pub severity: Option<Severity>,
    pub reason: String,
}

impl SafetyVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            blocked: false,
            severity: None,
            reason: String::new(),
        }
    }

    fn block(severity: Severity, reason: String) -> Self {
        Self {
            allowed: false,
            blocked: true,
            severity: Some(severity),
            reason,
        }
    }

    fn flag(severity: Severity, reason: String) -> Self {
        Self {
            allowed: false,
            blocked: false,
            severity: Some(severity),
            reason,
        }
    }
}

/// Shell constructs that are never allowed to reach an interpreter.
static DANGEROUS_COMMANDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\brm\s+(-[a-z]*r[a-z]*f|-[a-z]*f[a-z]*r)[a-z]*\s+(/|~|\$HOME)").unwrap(),
            "recursive forced delete of a root path",
        ),
        (
            Regex::new(r"(?i)\brm\s+-rf?\s+/\s*$").unwrap(),
            "recursive delete of filesystem root",
        ),
        (
            Regex::new(r"(?i)\bmkfs(\.[a-z0-9]+)?\b").unwrap(),
            "disk formatting",
        ),
        (
            Regex::new(r"(?i)\bdd\s+[^|;]*of=/dev/").unwrap(),
            "raw write to a block device",
        ),
        (
            Regex::new(r":\(\)\s*\{\s*:\|:\s*&\s*\}\s*;\s*:").unwrap(),
            "fork bomb",
        ),
        (
            Regex::new(r"(?i)\b(sudo|doas)\s+").unwrap(),
            "privilege escalation",
        ),
        (
            Regex::new(r"(?i)\bchmod\s+(-[a-z]+\s+)?[0-7]*777\s+/").unwrap(),
            "world-writable system path",
        ),
        (
            Regex::new(r"(?i)\b(eval|exec)\s*\(").unwrap(),
            "dynamic code injection",
        ),
        (
            Regex::new(r"(?i)\b(curl|wget)\b[^|;]*\|\s*(ba|z|da|k)?sh\b").unwrap(),
            "pipe-to-shell download",
        ),
        (
            Regex::new(r"(?i)>\s*/dev/sd[a-z]\b").unwrap(),
            "overwrite of a block device",
        ),
    ]
});

/// Paths that agents have no business touching.
static RESTRICTED_PATHS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"^/(etc|boot|sys|proc|dev)(/|$)").unwrap(),
            "system directory",
        ),
        (
            Regex::new(r"(^|/)\.ssh(/|$)").unwrap(),
            "SSH configuration",
        ),
        (
            Regex::new(r"(^|/)(id_rsa|id_ed25519|id_ecdsa)(\.pub)?$").unwrap(),
            "SSH key material",
        ),
        (
            Regex::new(r"(^|/)\.env(\.[A-Za-z0-9_.-]+)?$").unwrap(),
            "environment secrets file",
        ),
        (
            Regex::new(r"(^|/)(credentials|\.netrc|\.npmrc|\.pypirc)$").unwrap(),
            "credential file",
        ),
        (
            Regex::new(r"\.(pem|p12|pfx|key)$").unwrap(),
            "private key file",
        ),
        (
            Regex::new(r"(^|/)\.(aws|gnupg|kube|docker)(/|$)").unwrap(),
            "credential directory",
        ),
    ]
});

/// The single policy authority. Sets load from governance.db once and are
/// kept in sync by the administrative mutators on this instance.
pub struct SafetyPolicy {
    store: Store,
    allowlist: FxHashSet<String>,
    denylist: FxHashSet<String>,
}

impl SafetyPolicy {
    /// Load the policy sets for a store.
    pub fn load(store: &Store) -> Result<Self, SyndicError> {
        let broker = DbBroker::new(&store.root);
        let (allowlist, denylist) = broker.with_conn(
            &governance_db_path(&store.root),
            "syndic",
            "safety.load",
            |conn| {
                crate::plugins::budget::ensure_schema(conn)?;
                let mut allow = FxHashSet::default();
                let mut stmt = conn.prepare("SELECT entry FROM safety_allowlist")?;
                for r in stmt.query_map([], |row| row.get::<_, String>(0))? {
                    allow.insert(r?);
                }
                let mut deny = FxHashSet::default();
                let mut stmt = conn.prepare("SELECT entry FROM safety_denylist")?;
                for r in stmt.query_map([], |row| row.get::<_, String>(0))? {
                    deny.insert(r?);
                }
                Ok((allow, deny))
            },
        )?;
        Ok(Self {
            store: store.clone(),
            allowlist,
            denylist,
        })
    }

    /// Seed the persisted sets from config defaults. Existing entries are
    /// kept; `init` calls this once per store.
    pub fn seed_defaults(store: &Store, config: &EngineConfig) -> Result<(), SyndicError> {
        let broker = DbBroker::new(&store.root);
        broker.with_conn(
            &governance_db_path(&store.root),
            "syndic",
            "safety.seed",
            |conn| {
                crate::plugins::budget::ensure_schema(conn)?;
                let ts = time::now_epoch_z();
                for entry in &config.safety.allowlist {
                    conn.execute(
                        "INSERT OR IGNORE INTO safety_allowlist(entry, added_by, added_at)
                         VALUES(?1, 'default', ?2)",
                        params![entry, ts],
                    )?;
                }
                for entry in &config.safety.denylist {
                    conn.execute(
                        "INSERT OR IGNORE INTO safety_denylist(entry, added_by, added_at)
                         VALUES(?1, 'default', ?2)",
                        params![entry, ts],
                    )?;
                }
                Ok(())
            },
        )
    }

    /// Package install screening: denylist is a hard block, allowlist
    /// (exact or `prefix/*`) clears, anything unknown is flagged for a
    /// human rather than refused outright.
    pub fn check_package_install(&self, name: &str) -> SafetyVerdict {
        let name = name.trim();
        if name.is_empty() {
            return SafetyVerdict::flag(Severity::Medium, "empty package name".into());
        }
        if self.denylist.contains(name) {
            return SafetyVerdict::block(
                Severity::Critical,
                format!("package '{}' is denylisted", name),
            );
        }
        if self.allowlist.contains(name) {
            return SafetyVerdict::allow();
        }
        for entry in &self.allowlist {
            if let Some(prefix) = entry.strip_suffix("/*") {
                if name.starts_with(prefix)
                    && name[prefix.len()..].starts_with('/')
                {
                    return SafetyVerdict::allow();
                }
            }
        }
        SafetyVerdict::flag(
            Severity::Medium,
            format!("package '{}' is not on the allowlist", name),
        )
    }

    /// Shell command screening against the dangerous-command battery.
    pub fn check_command(&self, cmd: &str) -> SafetyVerdict {
        for (pattern, label) in DANGEROUS_COMMANDS.iter() {
            if pattern.is_match(cmd) {
                return SafetyVerdict::block(Severity::Critical, (*label).to_string());
            }
        }
        SafetyVerdict::allow()
    }

    /// File path screening against the restricted-path battery.
    pub fn check_file_path(&self, path: &str) -> SafetyVerdict {
        for (pattern, label) in RESTRICTED_PATHS.iter() {
            if pattern.is_match(path) {
                return SafetyVerdict::block(Severity::High, (*label).to_string());
            }
        }
        SafetyVerdict::allow()
    }

    /// Add an allowlist entry, effective immediately.
    pub fn add_to_allowlist(&mut self, entry: &str, actor: &str) -> Result<(), SyndicError> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(SyndicError::ValidationError(
                "allowlist entry is empty".into(),
            ));
        }
        let broker = DbBroker::new(&self.store.root);
        broker.with_conn(
            &governance_db_path(&self.store.root),
            actor,
            "safety.allow",
            |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO safety_allowlist(entry, added_by, added_at)
                     VALUES(?1, ?2, ?3)",
                    params![entry, actor, time::now_epoch_z()],
                )?;
                Ok(())
            },
        )?;
        self.allowlist.insert(entry.to_string());
        Ok(())
    }

    /// Remove an allowlist entry, effective immediately.
    pub fn remove_from_allowlist(&mut self, entry: &str, actor: &str) -> Result<(), SyndicError> {
        let broker = DbBroker::new(&self.store.root);
        let removed = broker.with_conn(
            &governance_db_path(&self.store.root),
            actor,
            "safety.unallow",
            |conn| {
                let n = conn.execute("DELETE FROM safety_allowlist WHERE entry = ?1", [entry])?;
                Ok(n)
            },
        )?;
        if removed == 0 {
            return Err(SyndicError::NotFound(format!(
                "allowlist entry '{}'",
                entry
            )));
        }
        self.allowlist.remove(entry);
        Ok(())
    }

    pub fn allowlist(&self) -> Vec<String> {
        let mut v: Vec<String> = self.allowlist.iter().cloned().collect();
        v.sort();
        v
    }

    pub fn denylist(&self) -> Vec<String> {
        let mut v: Vec<String> = self.denylist.iter().cloned().collect();
        v.sort();
        v
    }
}

// ===== CLI =====

#[derive(Parser, Debug)]
#[clap(name = "safety", about = "Screen packages, commands, and paths")]
pub struct SafetyCli {
    #[clap(subcommand)]
    command: SafetyCommand,
}

#[derive(Subcommand, Debug)]
enum SafetyCommand {
    /// Screen a package install.
    CheckPackage {
        #[clap(value_name = "NAME")]
        name: String,
    },
    /// Screen a shell command.
    CheckCommand {
        #[clap(value_name = "CMD")]
        cmd: String,
    },
    /// Screen a file path.
    CheckPath {
        #[clap(value_name = "PATH")]
        path: String,
    },
    /// Add an allowlist entry (exact name or `prefix/*`).
    Allow {
        #[clap(value_name = "ENTRY")]
        entry: String,
        #[clap(long, default_value = "operator")]
        actor: String,
    },
    /// Remove an allowlist entry.
    Unallow {
        #[clap(value_name = "ENTRY")]
        entry: String,
        #[clap(long, default_value = "operator")]
        actor: String,
    },
    /// Show the current allow/deny sets.
    List,
}

fn render_verdict(kind: &str, subject: &str, verdict: &SafetyVerdict) {
    let state = if verdict.blocked {
        "BLOCKED".bright_red().bold()
    } else if verdict.allowed {
        "ALLOWED".bright_green().bold()
    } else {
        "FLAGGED".bright_yellow().bold()
    };
    println!("{} {} {}", state, kind.bright_black(), subject);
    if !verdict.reason.is_empty() {
        println!("  {} {}", "reason:".bright_black(), verdict.reason);
    }
    println!(
        "{}",
        time::command_envelope(
            &format!("safety.{}", kind),
            if verdict.blocked { "blocked" } else if verdict.allowed { "ok" } else { "flagged" },
            serde_json::to_value(verdict).unwrap_or_default()
        )
    );
}

pub fn run_safety_cli(store: &Store, cli: SafetyCli) -> Result<(), SyndicError> {
    let mut policy = SafetyPolicy::load(store)?;
    match cli.command {
        SafetyCommand::CheckPackage { name } => {
            let v = policy.check_package_install(&name);
            render_verdict("package", &name, &v);
            if v.blocked {
                return Err(SyndicError::PolicyViolation(v.reason));
            }
        }
        SafetyCommand::CheckCommand { cmd } => {
            let v = policy.check_command(&cmd);
            render_verdict("command", &cmd, &v);
            if v.blocked {
                return Err(SyndicError::PolicyViolation(v.reason));
            }
        }
        SafetyCommand::CheckPath { path } => {
            let v = policy.check_file_path(&path);
            render_verdict("path", &path, &v);
            if v.blocked {
                return Err(SyndicError::PolicyViolation(v.reason));
            }
        }
        SafetyCommand::Allow { entry, actor } => {
            policy.add_to_allowlist(&entry, &actor)?;
            println!(
                "{}",
                time::command_envelope("safety.allow", "ok", serde_json::json!({"entry": entry}))
            );
        }
        SafetyCommand::Unallow { entry, actor } => {
            policy.remove_from_allowlist(&entry, &actor)?;
            println!(
                "{}",
                time::command_envelope("safety.unallow", "ok", serde_json::json!({"entry": entry}))
            );
        }
        SafetyCommand::List => {
            println!("allowlist:");
            for e in policy.allowlist() {
                println!("  {}", e);
            }
            println!("denylist:");
            for e in policy.denylist() {
                println!("  {}", e.bright_red());
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "safety",
        "version": "0.1.0",
        "description": "Allow/deny screening for packages, commands, and paths",
        "commands": [
            { "name": "check-package", "parameters": ["name"] },
            { "name": "check-command", "parameters": ["cmd"] },
            { "name": "check-path", "parameters": ["path"] },
            { "name": "allow", "parameters": ["entry"] },
            { "name": "unallow", "parameters": ["entry"] }
        ],
        "storage": ["governance.db"]
    })
}
