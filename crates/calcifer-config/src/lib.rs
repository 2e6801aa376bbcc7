//! Configuration for the Calcifer controller daemon.
//!
//! TOML file + `CALCIFER_` environment overrides, merged via figment and
//! validated before translation into `calcifer_core::KernelConfig`. The
//! daemon owns file I/O; the core never reads configuration itself.
//!
//! Env override style uses a double-underscore section separator, e.g.
//! `CALCIFER_CAS__MAX_RETRIES=5` maps to `[cas] max_retries`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use calcifer_core::KernelConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogSection,

    #[serde(default)]
    pub reconcile: ReconcileSection,

    #[serde(default, rename = "override")]
    pub override_section: OverrideSection,

    #[serde(default)]
    pub health: HealthSection,

    #[serde(default)]
    pub rule: RuleSection,

    #[serde(default)]
    pub cas: CasSection,

    #[serde(default)]
    pub idempotency: IdempotencySection,

    #[serde(default)]
    pub logic: LogicSection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LogSection {
    /// tracing `EnvFilter` directive, overridable by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReconcileSection {
    /// Per-device command debounce window.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OverrideSection {
    /// Expiration sweep period.
    #[serde(default = "default_expiration_interval_secs")]
    pub expiration_interval_secs: u64,
}

impl Default for OverrideSection {
    fn default() -> Self {
        Self {
            expiration_interval_secs: default_expiration_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HealthSection {
    /// Dependency poll period.
    #[serde(default = "default_health_interval_ms")]
    pub check_interval_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            check_interval_ms: default_health_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RuleSection {
    /// Per-rule safety evaluation cap.
    #[serde(default = "default_rule_timeout_ms")]
    pub evaluation_timeout_ms: u64,
}

impl Default for RuleSection {
    fn default() -> Self {
        Self {
            evaluation_timeout_ms: default_rule_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CasSection {
    /// Twin store optimistic-concurrency retry budget.
    #[serde(default = "default_cas_max_retries")]
    pub max_retries: u32,
}

impl Default for CasSection {
    fn default() -> Self {
        Self {
            max_retries: default_cas_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IdempotencySection {
    /// Inbound feedback dedup window.
    #[serde(default = "default_idempotency_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for IdempotencySection {
    fn default() -> Self {
        Self {
            ttl_secs: default_idempotency_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LogicSection {
    /// Upper bound on concurrently running reconciles.
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
}

impl Default for LogicSection {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
        }
    }
}

fn default_log_filter() -> String {
    "info".into()
}
fn default_debounce_ms() -> u64 {
    50
}
fn default_expiration_interval_secs() -> u64 {
    60
}
fn default_health_interval_ms() -> u64 {
    5000
}
fn default_rule_timeout_ms() -> u64 {
    100
}
fn default_cas_max_retries() -> u32 {
    3
}
fn default_idempotency_ttl_secs() -> u64 {
    300
}
fn default_max_concurrent_reconciles() -> usize {
    8
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "dmgiangi", "calcifer").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("calcifer");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load configuration from an explicit file (or the default path) plus
/// `CALCIFER_` environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("CALCIFER_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Serialize and write config to the canonical path.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Validation and translation ──────────────────────────────────────

impl Config {
    /// Sanity bounds; tuning that silently disables safety machinery is
    /// refused here rather than surprising at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rule.evaluation_timeout_ms == 0 {
            return Err(ConfigError::Validation {
                field: "rule.evaluation_timeout_ms".into(),
                reason: "must be positive".into(),
            });
        }
        if self.health.check_interval_ms < 100 {
            return Err(ConfigError::Validation {
                field: "health.check_interval_ms".into(),
                reason: "must be at least 100".into(),
            });
        }
        if self.override_section.expiration_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "override.expiration_interval_secs".into(),
                reason: "must be positive".into(),
            });
        }
        if self.cas.max_retries > 10 {
            return Err(ConfigError::Validation {
                field: "cas.max_retries".into(),
                reason: "retry budgets above 10 only hide contention".into(),
            });
        }
        if self.logic.max_concurrent_reconciles == 0 {
            return Err(ConfigError::Validation {
                field: "logic.max_concurrent_reconciles".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Translate into the kernel's runtime tuning.
    pub fn to_kernel_config(&self) -> KernelConfig {
        KernelConfig {
            debounce: Duration::from_millis(self.reconcile.debounce_ms),
            sweep_interval: Duration::from_secs(self.override_section.expiration_interval_secs),
            health_check_interval: Duration::from_millis(self.health.check_interval_ms),
            rule_evaluation_timeout: Duration::from_millis(self.rule.evaluation_timeout_ms),
            cas_max_retries: self.cas.max_retries,
            idempotency_ttl: Duration::from_secs(self.idempotency.ttl_secs),
            max_concurrent_reconciles: self.logic.max_concurrent_reconciles,
            ..KernelConfig::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.reconcile.debounce_ms, 50);
        assert_eq!(config.override_section.expiration_interval_secs, 60);
        assert_eq!(config.health.check_interval_ms, 5000);
        assert_eq!(config.rule.evaluation_timeout_ms, 100);
        assert_eq!(config.cas.max_retries, 3);
        assert_eq!(config.idempotency.ttl_secs, 300);
        assert_eq!(config.logic.max_concurrent_reconciles, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                [reconcile]
                debounce_ms = 25

                [cas]
                max_retries = 5
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.reconcile.debounce_ms, 25);
        assert_eq!(config.cas.max_retries, 5);
        // Untouched sections keep defaults.
        assert_eq!(config.health.check_interval_ms, 5000);
    }

    #[test]
    fn validation_rejects_degenerate_tuning() {
        let mut config = Config::default();
        config.rule.evaluation_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.health.check_interval_ms = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cas.max_retries = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn kernel_config_translation_converts_units() {
        let config = Config::default();
        let kernel = config.to_kernel_config();
        assert_eq!(kernel.debounce, Duration::from_millis(50));
        assert_eq!(kernel.sweep_interval, Duration::from_secs(60));
        assert_eq!(kernel.rule_evaluation_timeout, Duration::from_millis(100));
        assert_eq!(kernel.cas_max_retries, 3);
        assert_eq!(kernel.idempotency_ttl, Duration::from_secs(300));
    }

    #[test]
    fn load_config_reads_an_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calcifer.toml");
        std::fs::write(
            &path,
            r#"
            [log]
            filter = "debug"

            [idempotency]
            ttl_secs = 120
            "#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.log.filter, "debug");
        assert_eq!(config.idempotency.ttl_secs, 120);
    }

    #[test]
    fn load_config_rejects_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calcifer.toml");
        std::fs::write(&path, "[rule]\nevaluation_timeout_ms = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.reconcile.debounce_ms, config.reconcile.debounce_ms);
        assert_eq!(parsed.log.filter, config.log.filter);
    }
}
