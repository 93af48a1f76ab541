//! Guardrail Engine: policy checks, rate limits, quotas (C3, §4.3)

use std::collections::HashMap;
use std::path::Path;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::config::GuardrailConfig;
use crate::domain::ApprovalLevel;

use super::action::Action;
use super::classification::Classification;
use super::rate_limit::RateLimiter;
use super::redact::redact;

/// Literal and regex patterns for recursive deletes, destructive SQL,
/// force-push, fork bombs, raw block-device writes, chmod 777.
static DESTRUCTIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"rm\s+-[a-zA-Z]*r[a-zA-Z]*f|rm\s+-[a-zA-Z]*f[a-zA-Z]*r",
        r"(?i)drop\s+table",
        r"(?i)delete\s+from\s+\w+\s*(;|$)",
        r"git\s+push\s+.*--force",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        r"dd\s+.*of=/dev/",
        r"chmod\s+(-R\s+)?777",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Credential directories, secret files, root-level system files.
const SENSITIVE_PATH_FRAGMENTS: &[&str] = &[
    ".ssh", ".aws", ".gnupg", "/etc/shadow", "/etc/passwd", ".env", "id_rsa", ".kube",
];

/// Pure-ish policy classifier: given an [`Action`], decides `allow`,
/// `deny(reason)`, or `require_approval(level, reason)`. Rate limiting is
/// the one stateful policy kind, held behind a `Mutex` so the public
/// `classify` call stays a simple `&self` method.
pub struct GuardrailEngine {
    config: GuardrailConfig,
    rate_limiter: Mutex<RateLimiter>,
    /// bytes-written and requests/minute counters, keyed per tool (off by default).
    quota_usage: Mutex<HashMap<String, u64>>,
}

impl GuardrailEngine {
    pub fn new(config: GuardrailConfig, rate_limit_per_min: u32) -> Self {
        Self {
            config,
            rate_limiter: Mutex::new(RateLimiter::new(rate_limit_per_min as usize, Duration::from_secs(60))),
            quota_usage: Mutex::new(HashMap::new()),
        }
    }

    fn matches_destructive_pattern(text: &str) -> bool {
        DESTRUCTIVE_PATTERNS.iter().any(|p| p.is_match(text))
    }

    fn matches_sensitive_path(path: &Path) -> bool {
        let s = path.to_string_lossy();
        SENSITIVE_PATH_FRAGMENTS.iter().any(|frag| s.contains(frag))
    }

    fn path_denied(&self, path: &Path) -> bool {
        self.config.denied_paths.iter().any(|d| path.starts_with(d))
    }

    fn path_allowed(&self, path: &Path) -> bool {
        if self.config.allowed_paths.is_empty() {
            return true;
        }
        self.config.allowed_paths.iter().any(|a| path.starts_with(a))
    }

    /// Decide the disposition of `action`. §4.3: "a single call cannot be
    /// silently downgraded — the most restrictive matching rule wins."
    pub fn classify(&self, action: &Action) -> Classification {
        debug!(tool = %action.tool_name, caller = %action.caller, "GuardrailEngine::classify: called");
        let mut result = Classification::Allow;

        // Policy 6: plugin self-extension always requires review.
        if action.is_self_extension {
            result = result.most_restrictive(Classification::RequireApproval(
                ApprovalLevel::Review,
                "self-extension always requires approval".to_string(),
            ));
        }

        // Policy 1: destructive patterns.
        let haystack = format!(
            "{} {}",
            action.description,
            action.args.as_str().unwrap_or(&action.args.to_string())
        );
        if Self::matches_destructive_pattern(&haystack) {
            result = result.most_restrictive(Classification::RequireApproval(
                ApprovalLevel::Confirm,
                "matched destructive action pattern".to_string(),
            ));
        }

        // Policy 2 + 3: path checks.
        for path in &action.target_paths {
            if self.path_denied(path) {
                return result.most_restrictive(Classification::Deny(format!(
                    "path {} is in the denied-paths list",
                    path.display()
                )));
            }
            if !self.path_allowed(path) {
                return result.most_restrictive(Classification::Deny(format!(
                    "path {} is not in the allowed-paths list",
                    path.display()
                )));
            }
            if Self::matches_sensitive_path(path) {
                result = result.most_restrictive(Classification::RequireApproval(
                    ApprovalLevel::Review,
                    format!("path {} matches a sensitive-path pattern", path.display()),
                ));
            }
        }

        // Policy 1 (commands): denylisted commands from config.
        if self
            .config
            .denied_commands
            .iter()
            .any(|c| action.description.contains(c.as_str()) || action.args.to_string().contains(c.as_str()))
        {
            return result.most_restrictive(Classification::Deny("matched a configured denied command".to_string()));
        }

        // Policy 4: rate limits.
        let mut limiter = self.rate_limiter.lock().unwrap();
        if !limiter.check_and_record(&action.caller, &action.tool_name) {
            let reset = limiter.reset_after(&action.caller, &action.tool_name);
            return result.most_restrictive(Classification::Deny(format!(
                "rate limited, resets in {}s",
                reset.as_secs()
            )));
        }
        drop(limiter);

        result
    }

    /// Policy 5: optional per-tool byte/request quota (off by default).
    pub fn record_quota_usage(&self, tool_name: &str, bytes: u64) {
        let mut usage = self.quota_usage.lock().unwrap();
        *usage.entry(tool_name.to_string()).or_insert(0) += bytes;
    }

    /// Strip secrets before logging/persisting. Shared by C1 and C5.
    pub fn redact(&self, value: &serde_json::Value) -> serde_json::Value {
        redact(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> GuardrailEngine {
        GuardrailEngine::new(GuardrailConfig::default(), 100)
    }

    #[test]
    fn plain_action_is_allowed() {
        let action = Action::new("echo hello", "bash", "user");
        assert_eq!(engine().classify(&action), Classification::Allow);
    }

    #[test]
    fn destructive_pattern_requires_approval() {
        let action = Action::new("rm -rf /", "bash", "user");
        match engine().classify(&action) {
            Classification::RequireApproval(ApprovalLevel::Confirm, _) => {}
            other => panic!("expected require_approval(confirm), got {other:?}"),
        }
    }

    #[test]
    fn sensitive_path_requires_review() {
        let action = Action::new("read secrets", "read_file", "user")
            .with_target_paths(vec![std::path::PathBuf::from("/home/user/.ssh/id_rsa")]);
        match engine().classify(&action) {
            Classification::RequireApproval(ApprovalLevel::Review, _) => {}
            other => panic!("expected require_approval(review), got {other:?}"),
        }
    }

    #[test]
    fn denied_path_wins_over_sensitive_match() {
        let mut config = GuardrailConfig::default();
        config.denied_paths.push(std::path::PathBuf::from("/home/user/.ssh"));
        let engine = GuardrailEngine::new(config, 100);
        let action =
            Action::new("read", "read_file", "user").with_target_paths(vec![std::path::PathBuf::from("/home/user/.ssh/id_rsa")]);
        assert!(matches!(engine.classify(&action), Classification::Deny(_)));
    }

    #[test]
    fn self_extension_always_requires_review() {
        let action = Action::new("install tool", "install_plugin", "user").self_extension();
        match engine().classify(&action) {
            Classification::RequireApproval(ApprovalLevel::Review, _) => {}
            other => panic!("expected require_approval(review), got {other:?}"),
        }
    }

    #[test]
    fn exceeding_rate_limit_denies() {
        let engine = GuardrailEngine::new(GuardrailConfig::default(), 1);
        let action = Action::new("call", "some_tool", "user");
        assert_eq!(engine.classify(&action), Classification::Allow);
        assert!(matches!(engine.classify(&action), Classification::Deny(_)));
    }

    #[test]
    fn denied_command_from_config_is_denied() {
        let mut config = GuardrailConfig::default();
        config.denied_commands.push("shutdown -h now".to_string());
        let engine = GuardrailEngine::new(config, 100);
        let action = Action::new("shutdown -h now", "bash", "user");
        assert!(matches!(engine.classify(&action), Classification::Deny(_)));
    }
}
