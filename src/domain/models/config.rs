//! Runtime configuration for the Levers daemon and tools.
//!
//! Experiment-level knobs (traffic plans, guardrails, decision criteria)
//! live on the experiment rows; this is process-level configuration only.

use serde::{Deserialize, Serialize};

/// Main configuration structure for Levers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Serve pipeline configuration
    #[serde(default)]
    pub serve: ServeConfig,

    /// Reward attribution worker configuration
    #[serde(default)]
    pub attribution: AttributionConfig,

    /// Guardrail monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Decision engine scheduling
    #[serde(default)]
    pub decision: DecisionRunnerConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".levers/levers.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for rolling file output
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Serve pipeline deadlines and cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServeConfig {
    /// Hard deadline for policy selection plus state reads.
    #[serde(default = "default_policy_deadline_ms")]
    pub policy_deadline_ms: u64,

    /// End-to-end serve deadline.
    #[serde(default = "default_total_deadline_ms")]
    pub total_deadline_ms: u64,

    /// TTL for experiment config, catalog, and state snapshot caches.
    /// Reads may be stale by at most this long.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

const fn default_policy_deadline_ms() -> u64 {
    50
}

const fn default_total_deadline_ms() -> u64 {
    120
}

const fn default_cache_ttl_secs() -> u64 {
    60
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            policy_deadline_ms: default_policy_deadline_ms(),
            total_deadline_ms: default_total_deadline_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Reward attribution worker knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AttributionConfig {
    /// Interval between sweeper runs finalizing closed windows.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Max update attempts per queued reward across the window.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Queue rows drained per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

const fn default_sweep_interval_secs() -> u64 {
    30
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_batch_size() -> u32 {
    100
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            max_attempts: default_max_attempts(),
            batch_size: default_batch_size(),
        }
    }
}

/// Guardrail monitor scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Interval between guardrail evaluations.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

const fn default_check_interval_secs() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

/// Decision engine scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DecisionRunnerConfig {
    /// Interval between decision evaluations.
    #[serde(default = "default_decision_interval_secs")]
    pub interval_secs: u64,
}

const fn default_decision_interval_secs() -> u64 {
    86_400
}

impl Default for DecisionRunnerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_decision_interval_secs(),
        }
    }
}
