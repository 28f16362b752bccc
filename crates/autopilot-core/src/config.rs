use crate::error::{AutopilotError, Result};
use crate::manifest::KeyOrder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "autopilot.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Whole-document JSON file, replaced atomically on every write.
    #[default]
    Json,
    /// Single-table SQLite database.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".autopilot/state.json")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyConfig
// ---------------------------------------------------------------------------

/// Parameters handed to the bidding and lifecycle policies. The orchestrator
/// itself only reads `fail_closed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Halt the tick on the first per-item failure.
    #[serde(default)]
    pub fail_closed: bool,
    #[serde(default = "default_max_bids_per_tick")]
    pub max_bids_per_tick: u32,
    #[serde(default)]
    pub min_budget_near: f64,
    #[serde(default)]
    pub max_bid_near: Option<f64>,
    #[serde(default = "default_bid_eta_seconds")]
    pub bid_eta_seconds: u64,
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub submit_backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub submit_backoff_max_secs: u64,
    #[serde(default = "default_stale_after")]
    pub stale_bid_after_secs: u64,
}

fn default_max_bids_per_tick() -> u32 {
    5
}

fn default_bid_eta_seconds() -> u64 {
    86_400
}

fn default_max_submit_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    60
}

fn default_backoff_max() -> u64 {
    3_600
}

fn default_stale_after() -> u64 {
    86_400
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            fail_closed: false,
            max_bids_per_tick: default_max_bids_per_tick(),
            min_budget_near: 0.0,
            max_bid_near: None,
            bid_eta_seconds: default_bid_eta_seconds(),
            max_submit_attempts: default_max_submit_attempts(),
            submit_backoff_base_secs: default_backoff_base(),
            submit_backoff_max_secs: default_backoff_max(),
            stale_bid_after_secs: default_stale_after(),
        }
    }
}

// ---------------------------------------------------------------------------
// SettlementConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_settlement_limit")]
    pub limit: usize,
    #[serde(default = "default_near_price_usd")]
    pub near_price_usd: f64,
}

fn default_settlement_limit() -> usize {
    100
}

fn default_near_price_usd() -> f64 {
    4.0
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            limit: default_settlement_limit(),
            near_price_usd: default_near_price_usd(),
        }
    }
}

// ---------------------------------------------------------------------------
// AutopilotConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotConfig {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
    #[serde(default)]
    pub key_order: KeyOrder,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

fn default_tick_interval() -> u64 {
    120
}

impl AutopilotConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            signer_id: None,
            tick_interval_secs: default_tick_interval(),
            max_ticks: None,
            key_order: KeyOrder::default(),
            store: StoreConfig::default(),
            policy: PolicyConfig::default(),
            settlement: SettlementConfig::default(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AutopilotError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: AutopilotConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Resolve `store.path` against the directory holding the config file.
    pub fn store_path(&self, config_path: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            return self.store.path.clone();
        }
        match config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(&self.store.path),
            _ => self.store.path.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.agent_id.trim().is_empty() {
            error("agent_id must not be empty".to_string());
        }
        if self.tick_interval_secs == 0 {
            error("tick_interval_secs must be greater than zero".to_string());
        }
        if let Some(max) = self.policy.max_bid_near {
            if max.is_nan() || max <= 0.0 {
                error(format!("policy.max_bid_near must be positive (got {max})"));
            }
        }
        if self.policy.min_budget_near < 0.0 {
            error(format!(
                "policy.min_budget_near must not be negative (got {})",
                self.policy.min_budget_near
            ));
        }
        let price = self.settlement.near_price_usd;
        if price.is_nan() || price <= 0.0 {
            error(format!(
                "settlement.near_price_usd must be positive (got {})",
                self.settlement.near_price_usd
            ));
        }
        if self.settlement.limit == 0 {
            error("settlement.limit must be greater than zero".to_string());
        }

        if self.policy.submit_backoff_base_secs > self.policy.submit_backoff_max_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "policy.submit_backoff_base_secs ({}) exceeds submit_backoff_max_secs ({})",
                    self.policy.submit_backoff_base_secs, self.policy.submit_backoff_max_secs
                ),
            });
        }
        if self.policy.max_submit_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "policy.max_submit_attempts is 0: no submission will ever be attempted"
                    .to_string(),
            });
        }
        if let Some(0) = self.max_ticks {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "max_ticks is 0: the run loop will exit after its first tick".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = AutopilotConfig::new("agent.near");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: AutopilotConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.agent_id, "agent.near");
        assert_eq!(parsed.tick_interval_secs, 120);
        assert_eq!(parsed.settlement.limit, 100);
        assert_eq!(parsed.settlement.near_price_usd, 4.0);
        assert_eq!(parsed.key_order, KeyOrder::Collated);
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let cfg: AutopilotConfig = serde_yaml::from_str("agent_id: a\nstore:\n  backend: sqlite\n").unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.store.path, PathBuf::from(".autopilot/state.json"));
        assert!(!cfg.policy.fail_closed);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_missing_file_is_config_not_found() {
        let dir = TempDir::new().unwrap();
        let err = AutopilotConfig::load(&dir.path().join("autopilot.yaml")).unwrap_err();
        assert!(matches!(err, AutopilotError::ConfigNotFound(_)));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("autopilot.yaml");
        let mut cfg = AutopilotConfig::new("agent.near");
        cfg.policy.fail_closed = true;
        cfg.save(&path).unwrap();
        let loaded = AutopilotConfig::load(&path).unwrap();
        assert!(loaded.policy.fail_closed);
    }

    #[test]
    fn validate_flags_errors() {
        let mut cfg = AutopilotConfig::new(" ");
        cfg.tick_interval_secs = 0;
        cfg.policy.max_bid_near = Some(0.0);
        cfg.settlement.near_price_usd = -1.0;
        let warnings = cfg.validate();
        let errors = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 4, "{warnings:?}");
    }

    #[test]
    fn validate_warns_on_inverted_backoff() {
        let mut cfg = AutopilotConfig::new("a");
        cfg.policy.submit_backoff_base_secs = 7200;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(warnings[0].message.contains("backoff"));
    }

    #[test]
    fn store_path_is_relative_to_config_dir() {
        let cfg = AutopilotConfig::new("a");
        let resolved = cfg.store_path(Path::new("/etc/autopilot/autopilot.yaml"));
        assert_eq!(resolved, PathBuf::from("/etc/autopilot/.autopilot/state.json"));
        assert_eq!(
            cfg.store_path(Path::new("autopilot.yaml")),
            PathBuf::from(".autopilot/state.json")
        );
    }
}
