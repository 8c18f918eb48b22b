//! Pipeline configuration, read once at startup and passed explicitly.
//!
//! No ambient mutable state: the orchestrator and the novelty auditor receive
//! an immutable `PipelineConfig` and never re-read the environment.

use std::path::PathBuf;

/// Logging sink configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `mystery_agents=debug`.
    pub level: String,
    pub to_console: bool,
    pub to_file: bool,
    pub path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            to_console: true,
            to_file: false,
            path: None,
        }
    }
}

/// Immutable pipeline configuration.
///
/// Thresholds and ceilings here gate the novelty audit and the fair-play
/// feedback chain; drivers are selected from the persistence fields.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Similarity at/above this value triggers the novelty gate. Values ≥ 1.0
    /// disable the check entirely.
    pub novelty_threshold: f64,
    /// Skip the novelty audit and emit a pass with reason "skipped".
    pub novelty_skip: bool,
    /// Treat an over-threshold similarity as `fail` rather than `warning`
    /// after the single regeneration attempt.
    pub novelty_hard_fail: bool,
    /// Cumulative USD ceiling for the fair-play audit feedback chain.
    pub fair_play_cost_ceiling: f64,
    /// External database driver, when deployed behind one. Takes precedence
    /// over the JSON-file path.
    pub database_url: Option<String>,
    /// Path for the single-file JSON driver. When neither persistence field
    /// is set the store is in-memory.
    pub json_db_path: Option<PathBuf>,
    pub log: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            novelty_threshold: 0.9,
            novelty_skip: false,
            novelty_hard_fail: false,
            fair_play_cost_ceiling: 0.15,
            database_url: None,
            json_db_path: None,
            log: LogConfig::default(),
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl PipelineConfig {
    /// Build configuration from recognized environment options.
    ///
    /// Unparseable numeric values fall back to defaults rather than aborting
    /// startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            novelty_threshold: std::env::var("NOVELTY_SIMILARITY_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.novelty_threshold),
            novelty_skip: env_bool("NOVELTY_SKIP").unwrap_or(defaults.novelty_skip),
            novelty_hard_fail: env_bool("NOVELTY_HARD_FAIL").unwrap_or(defaults.novelty_hard_fail),
            fair_play_cost_ceiling: std::env::var("FAIR_PLAY_COST_CEILING")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fair_play_cost_ceiling),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            json_db_path: std::env::var("CML_JSON_DB_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            log: LogConfig {
                level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
                to_console: env_bool("LOG_TO_CONSOLE").unwrap_or(true),
                to_file: env_bool("LOG_TO_FILE").unwrap_or(false),
                path: std::env::var("LOG_PATH").ok().map(PathBuf::from),
            },
        }
    }

    /// Whether the novelty check is effectively disabled.
    pub fn novelty_bypassed(&self) -> bool {
        self.novelty_skip || self.novelty_threshold >= 1.0
    }
}
