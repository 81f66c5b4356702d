//! Engine configuration: embedded defaults merged with a per-project
//! override file at `.syndic/config.toml` (sibling of the data root).

use crate::core::assets;
use crate::core::error::SyndicError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_ceiling_usd: f64,
    pub project_ceiling_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_ceiling_usd: 25.0,
            project_ceiling_usd: 500.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_retries: u32,
    pub stale_after_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stale_after_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub cooldown_secs: u64,
    pub cost_ceiling_usd: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 86_400,
            cost_ceiling_usd: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatesConfig {
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SafetyConfig {
    pub denylist: Vec<String>,
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub budget: BudgetConfig,
    pub scheduler: SchedulerConfig,
    pub allocator: AllocatorConfig,
    pub gates: GatesConfig,
    pub safety: SafetyConfig,
}

impl EngineConfig {
    /// Built-in defaults from the embedded asset.
    pub fn builtin() -> Result<Self, SyndicError> {
        let text = assets::get_asset("defaults.toml")
            .ok_or_else(|| SyndicError::ConfigError("embedded defaults missing".to_string()))?;
        toml::from_str(&text).map_err(|e| SyndicError::ConfigError(e.to_string()))
    }

    /// Load config for a store: embedded defaults, then the project's
    /// `config.toml` (one level above the data root) layered on top.
    pub fn load(store_root: &Path) -> Result<Self, SyndicError> {
        let mut cfg = Self::builtin()?;
        let override_path = store_root
            .parent()
            .map(|p| p.join("config.toml"))
            .filter(|p| p.exists());
        if let Some(path) = override_path {
            let text = std::fs::read_to_string(&path).map_err(SyndicError::IoError)?;
            let overlay: EngineConfigOverlay =
                toml::from_str(&text).map_err(|e| SyndicError::ConfigError(e.to_string()))?;
            overlay.apply(&mut cfg);
        }
        Ok(cfg)
    }
}

/// Partial override shape: only present sections replace defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EngineConfigOverlay {
    budget: Option<BudgetConfig>,
    scheduler: Option<SchedulerConfig>,
    allocator: Option<AllocatorConfig>,
    gates: Option<GatesConfig>,
    safety: Option<SafetyConfig>,
}

impl EngineConfigOverlay {
    fn apply(self, cfg: &mut EngineConfig) {
        if let Some(b) = self.budget {
            cfg.budget = b;
        }
        if let Some(s) = self.scheduler {
            cfg.scheduler = s;
        }
        if let Some(a) = self.allocator {
            cfg.allocator = a;
        }
        if let Some(g) = self.gates {
            cfg.gates = g;
        }
        if let Some(s) = self.safety {
            cfg.safety = s;
        }
    }
}
