//! Configuration, layered CLI flags > env vars > `cardigan.toml` > compiled
//! defaults. Each layer only overrides fields it actually sets; the merge
//! happens field-by-field in `build_config`, the same shape the teacher used
//! for its pipeline config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub label: String,
    pub model: String,
    pub max_cost_per_1k_tokens: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationThreshold {
    pub after_minutes: f64,
    pub min_tier_index: u32,
}

/// §6 `[routing]`: tier ladder, phase pins, duration-based floors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub tiers: Vec<TierConfig>,
    pub phase_base_tiers: HashMap<String, u32>,
    pub duration_thresholds: Vec<DurationThreshold>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let mut phase_base_tiers = HashMap::new();
        phase_base_tiers.insert("manager".to_string(), 2);
        RoutingConfig {
            tiers: vec![
                TierConfig { label: "fast".into(), model: "gpt-4o-mini".into(), max_cost_per_1k_tokens: 0.01 },
                TierConfig { label: "standard".into(), model: "gpt-4o".into(), max_cost_per_1k_tokens: 0.05 },
                TierConfig { label: "premium".into(), model: "gpt-4.1".into(), max_cost_per_1k_tokens: 0.20 },
            ],
            phase_base_tiers,
            duration_thresholds: vec![
                DurationThreshold { after_minutes: 5.0, min_tier_index: 1 },
                DurationThreshold { after_minutes: 15.0, min_tier_index: 2 },
            ],
        }
    }
}

/// §6 `[worker]`: pool sizing and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: usize,
    pub poll_interval_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub stale_threshold_multiplier: u64,
    pub max_tier_escalations: u32,
    pub recovery_budget: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            max_concurrent_jobs: 4,
            poll_interval_seconds: 5,
            heartbeat_interval_seconds: 15,
            stale_threshold_multiplier: 3,
            max_tier_escalations: 10,
            recovery_budget: 3,
        }
    }
}

/// §6 `[safety]`: guardrails the LLM client enforces on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub model_allowlist: Vec<String>,
    pub max_cost_per_1k_tokens: f64,
    pub run_cost_cap: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            model_allowlist: vec![
                "gpt-4o-mini".to_string(),
                "gpt-4o".to_string(),
                "gpt-4.1".to_string(),
            ],
            max_cost_per_1k_tokens: 0.25,
            run_cost_cap: 5.0,
        }
    }
}

/// §6 `[providers]`: where to reach the LLM backend(s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "CARDIGAN_LLM_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CardiganConfig {
    pub routing: RoutingConfig,
    pub worker: WorkerConfig,
    pub safety: SafetyConfig,
    pub providers: ProvidersConfig,
    pub db_path: PathBuf,
    pub prompts_dir: PathBuf,
    pub api_bind: String,
}

/// File-level TOML shape: every field optional so a partial `cardigan.toml`
/// only overrides what it names, mirroring the teacher's `load_toml_config`.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    routing: Option<RoutingConfig>,
    worker: Option<PartialWorkerConfig>,
    safety: Option<PartialSafetyConfig>,
    providers: Option<PartialProvidersConfig>,
    db_path: Option<PathBuf>,
    prompts_dir: Option<PathBuf>,
    api_bind: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PartialWorkerConfig {
    max_concurrent_jobs: Option<usize>,
    poll_interval_seconds: Option<u64>,
    heartbeat_interval_seconds: Option<u64>,
    stale_threshold_multiplier: Option<u64>,
    max_tier_escalations: Option<u32>,
    recovery_budget: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PartialSafetyConfig {
    model_allowlist: Option<Vec<String>>,
    max_cost_per_1k_tokens: Option<f64>,
    run_cost_cap: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct PartialProvidersConfig {
    base_url: Option<String>,
    api_key_env: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// CLI-supplied overrides; `None` means "not passed on the command line".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db_path: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
    pub api_bind: Option<String>,
    pub max_concurrent_jobs: Option<usize>,
    pub run_cost_cap: Option<f64>,
}

fn load_toml_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

fn apply_env_overrides(cfg: &mut CardiganConfig) {
    if let Ok(v) = std::env::var("CARDIGAN_DB_PATH") {
        cfg.db_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("CARDIGAN_PROMPTS_DIR") {
        cfg.prompts_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("CARDIGAN_API_BIND") {
        cfg.api_bind = v;
    }
    if let Ok(v) = std::env::var("CARDIGAN_MAX_CONCURRENT_JOBS") {
        if let Ok(n) = v.parse() {
            cfg.worker.max_concurrent_jobs = n;
        }
    }
    if let Ok(v) = std::env::var("CARDIGAN_RUN_COST_CAP") {
        if let Ok(n) = v.parse() {
            cfg.safety.run_cost_cap = n;
        }
    }
    if let Ok(v) = std::env::var("CARDIGAN_PROVIDER_BASE_URL") {
        cfg.providers.base_url = v;
    }
}

fn apply_cli_overrides(cfg: &mut CardiganConfig, cli: &CliOverrides) {
    if let Some(ref v) = cli.db_path {
        cfg.db_path = v.clone();
    }
    if let Some(ref v) = cli.prompts_dir {
        cfg.prompts_dir = v.clone();
    }
    if let Some(ref v) = cli.api_bind {
        cfg.api_bind = v.clone();
    }
    if let Some(v) = cli.max_concurrent_jobs {
        cfg.worker.max_concurrent_jobs = v;
    }
    if let Some(v) = cli.run_cost_cap {
        cfg.safety.run_cost_cap = v;
    }
}

/// Build the merged configuration: CLI flags > env vars > `config_path` >
/// compiled defaults.
pub fn build_config(config_path: &Path, cli: &CliOverrides) -> Result<CardiganConfig> {
    let file = load_toml_config(config_path)?;

    let mut cfg = CardiganConfig {
        routing: file.routing.unwrap_or_default(),
        worker: WorkerConfig::default(),
        safety: SafetyConfig::default(),
        providers: ProvidersConfig::default(),
        db_path: PathBuf::from("cardigan.db"),
        prompts_dir: PathBuf::from("prompts"),
        api_bind: "127.0.0.1:8088".to_string(),
    };

    if let Some(w) = file.worker {
        if let Some(v) = w.max_concurrent_jobs {
            cfg.worker.max_concurrent_jobs = v;
        }
        if let Some(v) = w.poll_interval_seconds {
            cfg.worker.poll_interval_seconds = v;
        }
        if let Some(v) = w.heartbeat_interval_seconds {
            cfg.worker.heartbeat_interval_seconds = v;
        }
        if let Some(v) = w.stale_threshold_multiplier {
            cfg.worker.stale_threshold_multiplier = v;
        }
        if let Some(v) = w.max_tier_escalations {
            cfg.worker.max_tier_escalations = v;
        }
        if let Some(v) = w.recovery_budget {
            cfg.worker.recovery_budget = v;
        }
    }
    if let Some(s) = file.safety {
        if let Some(v) = s.model_allowlist {
            cfg.safety.model_allowlist = v;
        }
        if let Some(v) = s.max_cost_per_1k_tokens {
            cfg.safety.max_cost_per_1k_tokens = v;
        }
        if let Some(v) = s.run_cost_cap {
            cfg.safety.run_cost_cap = v;
        }
    }
    if let Some(p) = file.providers {
        if let Some(v) = p.base_url {
            cfg.providers.base_url = v;
        }
        if let Some(v) = p.api_key_env {
            cfg.providers.api_key_env = v;
        }
        if let Some(v) = p.request_timeout_secs {
            cfg.providers.request_timeout_secs = v;
        }
    }
    if let Some(v) = file.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = file.prompts_dir {
        cfg.prompts_dir = v;
    }
    if let Some(v) = file.api_bind {
        cfg.api_bind = v;
    }

    apply_env_overrides(&mut cfg);
    apply_cli_overrides(&mut cfg, cli);

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_with_no_file() {
        let cfg = build_config(Path::new("/nonexistent/cardigan.toml"), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.worker.max_concurrent_jobs, 4);
        assert!(!cfg.routing.tiers.is_empty());
    }

    #[test]
    fn cli_overrides_win_over_defaults() {
        let cli = CliOverrides {
            max_concurrent_jobs: Some(9),
            ..Default::default()
        };
        let cfg = build_config(Path::new("/nonexistent/cardigan.toml"), &cli).unwrap();
        assert_eq!(cfg.worker.max_concurrent_jobs, 9);
    }

    #[test]
    fn partial_toml_file_only_overrides_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cardigan.toml");
        std::fs::write(&path, "db_path = \"custom.db\"\n").unwrap();
        let cfg = build_config(&path, &CliOverrides::default()).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("custom.db"));
        assert_eq!(cfg.worker.max_concurrent_jobs, 4);
    }
}
