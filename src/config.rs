//! Orchestrator configuration types and loading (§10.3)

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    #[serde(rename = "loop")]
    pub loop_: LoopConfig,
    pub pool: PoolConfig,
    pub tool: ToolConfig,
    pub sandbox: SandboxConfig,
    pub guardrails: GuardrailConfig,
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    pub regression: RegressionConfig,
    pub learning: LearningConfig,
    pub triggers: TriggerConfig,
    pub signature: SignatureConfig,
}

impl Config {
    /// Load configuration with fallback chain:
    /// explicit `--config` path → `.taskorc.yaml` → user config dir → defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".taskorc.yaml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskorc").join("config.yaml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration (§6 External Interfaces).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "anthropic" or "openai"
    pub provider: String,
    pub model: String,
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,
    #[serde(rename = "base-url")]
    pub base_url: String,
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

/// Root directory for the persistent state layout (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding `events/`, `snapshots/`, `plugins/`, `learnings.jsonl`.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".taskorc"),
        }
    }
}

/// Scheduler tick cadence (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

/// Agent worker pool sizing and crash-recovery behavior (§4.7, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
    /// Crash-recovery cap: a task re-queued after a worker crash this many
    /// times is reported as permanently failed instead of retried again.
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,
    /// Respawn backoff after a worker crash, doubling up to the cap.
    #[serde(rename = "respawn-backoff-ms")]
    pub respawn_backoff_ms: u64,
    #[serde(rename = "respawn-backoff-max-ms")]
    pub respawn_backoff_max_ms: u64,
    /// Grace period for cooperative cancellation before a worker is force-terminated.
    #[serde(rename = "hard-kill-grace-ms")]
    pub hard_kill_grace_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            max_attempts: 3,
            respawn_backoff_ms: 500,
            respawn_backoff_max_ms: 30_000,
            hard_kill_grace_ms: 5_000,
        }
    }
}

/// Tool Registry invocation limits (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
    #[serde(rename = "max-output-bytes")]
    pub max_output_bytes: usize,
    #[serde(rename = "error-threshold")]
    pub error_threshold: u32,
    #[serde(rename = "error-window-ms")]
    pub error_window_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 0,
            max_output_bytes: 1_048_576,
            error_threshold: 3,
            error_window_ms: 300_000,
        }
    }
}

/// Sandbox Runtime lifecycle timeouts and resource caps (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    #[serde(rename = "load-timeout-ms")]
    pub load_timeout_ms: u64,
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,
    #[serde(rename = "max-memory-mib")]
    pub max_memory_mib: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 5_000,
            call_timeout_ms: 5_000,
            max_memory_mib: 64,
        }
    }
}

/// Guardrail Engine policy configuration (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    #[serde(rename = "allowed-paths")]
    pub allowed_paths: Vec<PathBuf>,
    #[serde(rename = "denied-paths")]
    pub denied_paths: Vec<PathBuf>,
    #[serde(rename = "denied-commands")]
    pub denied_commands: Vec<String>,
    #[serde(rename = "max-calls-per-hour")]
    pub max_calls_per_hour: u32,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            denied_paths: Vec::new(),
            denied_commands: Vec::new(),
            max_calls_per_hour: 100,
        }
    }
}

/// Per-tool rate limiting (§4.3 policy kind 4); quotas (kind 5) default off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    #[serde(rename = "per-tool-per-min")]
    pub per_tool_per_min: u32,
    #[serde(rename = "quotas-enabled")]
    pub quotas_enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_tool_per_min: 30,
            quotas_enabled: false,
        }
    }
}

/// Tool Registry regression detection thresholds (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    #[serde(rename = "baseline-size")]
    pub baseline_size: usize,
    #[serde(rename = "window-size")]
    pub window_size: usize,
    #[serde(rename = "latency-delta-ms")]
    pub latency_delta_ms: u64,
    #[serde(rename = "error-rate-delta")]
    pub error_rate_delta: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            baseline_size: 20,
            window_size: 10,
            latency_delta_ms: 50,
            error_rate_delta: 0.05,
        }
    }
}

/// Learning Store confidence thresholds (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    #[serde(rename = "min-confidence")]
    pub min_confidence: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self { min_confidence: 0.6 }
    }
}

/// Scheduler trigger-evaluation thresholds (§4.8 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    #[serde(rename = "stale-goal-days")]
    pub stale_goal_days: i64,
    #[serde(rename = "blocked-task-hours")]
    pub blocked_task_hours: i64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            stale_goal_days: 3,
            blocked_task_hours: 24,
        }
    }
}

/// Plugin signature enforcement (§4.5 plugin approval binding).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub enabled: bool,
    pub secret: String,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.loop_.interval_ms, 10_000);
        assert_eq!(config.pool.size, 3);
        assert_eq!(config.tool.timeout_ms, 30_000);
        assert_eq!(config.tool.max_output_bytes, 1_048_576);
        assert_eq!(config.sandbox.load_timeout_ms, 5_000);
        assert_eq!(config.sandbox.max_memory_mib, 64);
        assert_eq!(config.guardrails.max_calls_per_hour, 100);
        assert_eq!(config.rate_limit.per_tool_per_min, 30);
        assert!(!config.rate_limit.quotas_enabled);
        assert_eq!(config.regression.baseline_size, 20);
        assert_eq!(config.learning.min_confidence, 0.6);
        assert_eq!(config.triggers.stale_goal_days, 3);
        assert!(!config.signature.enabled);
    }

    #[test]
    fn llm_config_defaults_to_anthropic() {
        let config = LlmConfig::default();
        assert_eq!(config.provider, "anthropic");
        assert!(config.model.contains("sonnet"));
        assert_eq!(config.api_key_env, "ANTHROPIC_API_KEY");
    }

    #[test]
    fn deserialize_partial_config_falls_back_to_defaults() {
        let yaml = r#"
llm:
  model: claude-haiku
pool:
  size: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.model, "claude-haiku");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.pool.size, 5);
        assert_eq!(config.loop_.interval_ms, 10_000);
    }

    #[test]
    fn deserialize_full_nested_sections() {
        let yaml = r#"
loop:
  interval-ms: 5000
guardrails:
  max-calls-per-hour: 50
  denied-commands: ["rm -rf /"]
signature:
  enabled: true
  secret: "topsecret"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.loop_.interval_ms, 5000);
        assert_eq!(config.guardrails.max_calls_per_hour, 50);
        assert_eq!(config.guardrails.denied_commands, vec!["rm -rf /".to_string()]);
        assert!(config.signature.enabled);
        assert_eq!(config.signature.secret, "topsecret");
    }
}
