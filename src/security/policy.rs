//! Layer 6: the safety/policy engine. The final, deterministic checkpoint
//! before any tool executes or any output reaches the user — the LLM
//! cannot bypass this layer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::Mutex;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::security::rate_limiter::ToolRateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Caution,
    Restricted,
    Dangerous,
    Forbidden,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Safe => "safe",
            SafetyLevel::Caution => "caution",
            SafetyLevel::Restricted => "restricted",
            SafetyLevel::Dangerous => "dangerous",
            SafetyLevel::Forbidden => "forbidden",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    UnauthorizedTool,
    ForbiddenCommand,
    PiiExposure,
    RateLimit,
    DangerousOperation,
    PrdViolation,
    MissingConfirmation,
    InvalidInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyViolation {
    #[serde(rename = "type")]
    pub kind: ViolationType,
    pub message: String,
    pub severity: SafetyLevel,
    pub blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyCheckResult {
    pub allowed: bool,
    pub level: SafetyLevel,
    pub violations: Vec<PolicyViolation>,
    pub requires_confirmation: bool,
    pub requires_approval: bool,
    pub message: String,
}

macro_rules! pattern_table {
    ($name:ident, $( ($pat:expr, $desc:expr) ),+ $(,)?) => {
        static $name: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
            vec![$( (Regex::new($pat).unwrap(), $desc) ),+]
        });
    };
}

pattern_table!(
    FORBIDDEN_PATTERNS,
    (r"(?i)\brm\s+-rf\s+/", "recursive root deletion"),
    (r"(?i)\bformat\s+[cC]:", "drive format command"),
    (r"(?i)\bdel\s+/[sS]\s+/[qQ]", "recursive deletion"),
    (r"(?i):\(\)\{[^}]*\};\s*:", "fork bomb"),
    (r"(?i)>\s*/dev/sd[a-z]", "direct disk write"),
    (r"(?i)\bdrop\s+database", "database deletion"),
    (r"(?i)\btruncate\s+table", "table truncation"),
    (r#"(?i)password\s*[=:]\s*['"][^'"]+['"]"#, "hardcoded password"),
    (r#"(?i)api[_-]?key\s*[=:]\s*['"][^'"]+['"]"#, "hardcoded API key"),
    (r"(?i)BEGIN\s+(RSA|DSA|EC)\s+PRIVATE\s+KEY", "private key exposure"),
);

pattern_table!(
    DANGEROUS_PATTERNS,
    (r"(?i)\bsudo\b", "elevated privileges"),
    (r"(?i)\badmin\b.*\b(delete|remove|drop)", "admin deletion"),
    (r"(?i)\bexec\s*\(", "dynamic code execution"),
    (r"(?i)\beval\s*\(", "eval execution"),
    (r"(?i)>\s*/etc/", "system file modification"),
    (r"(?i)\bkill\s+-9", "force kill"),
    (r"(?i)\bshutdown\b", "system shutdown"),
    (r"(?i)\breboot\b", "system reboot"),
);

pattern_table!(
    CAUTION_PATTERNS,
    (r"(?i)\bdelete\b", "delete operation"),
    (r"(?i)\bremove\b", "remove operation"),
    (r"(?i)\bmodify\b", "modify operation"),
    (r"(?i)\bupdate\b", "update operation"),
    (r"(?i)\bwrite\b", "write operation"),
    (r"(?i)\bexecute\b", "execute operation"),
);

pattern_table!(
    PII_PATTERNS,
    (r"\b\d{3}-\d{2}-\d{4}\b", "SSN"),
    (r"\b\d{16}\b", "credit card"),
    (r"\b[A-Z]{2}\d{6,9}\b", "passport"),
    (r"[\w.-]+@[\w.-]+\.\w+", "email"),
    (r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b", "phone"),
);

fn default_tool_safety() -> HashMap<&'static str, SafetyLevel> {
    use SafetyLevel::*;
    HashMap::from([
        ("check_health", Safe),
        ("get_system_status", Safe),
        ("get_model_status", Safe),
        ("get_documentation", Safe),
        ("list_entities", Safe),
        ("list_available_tools", Safe),
        ("list_roles", Safe),
        ("get_metrics", Safe),
        ("get_alerts", Safe),
        ("get_config", Safe),
        ("get_project_status", Safe),
        ("visualize_dag", Safe),
        ("semantic_search", Safe),
        ("get_recent_logs", Caution),
        ("get_security_audit", Caution),
        ("query_traces", Caution),
        ("diagnose_issue", Caution),
        ("get_role_capabilities", Caution),
        ("check_permission", Caution),
        ("execute_command", Restricted),
        ("add_to_knowledge_base", Restricted),
        ("start_debate", Restricted),
        ("create_workflow", Restricted),
        ("check_pii", Restricted),
        ("execute_workflow", Dangerous),
        ("request_approval", Dangerous),
        ("evaluate_risk", Dangerous),
    ])
}

/// Context passed alongside a safety check; mirrors the `context` dict the
/// original engine threads through PRD predicate checks.
#[derive(Debug, Clone, Default)]
pub struct SafetyContext {
    pub confirmed: bool,
    pub approved: bool,
}

/// Deterministic safety enforcement engine — the final checkpoint before
/// any action is executed. The LLM cannot bypass this layer.
pub struct SafetyPolicyEngine {
    tool_safety: Mutex<HashMap<String, SafetyLevel>>,
    rate_limiter: ToolRateLimiter,
    audit_log_path: PathBuf,
}

impl SafetyPolicyEngine {
    pub fn new(log_dir: &Path) -> Self {
        let mut limits = HashMap::new();
        limits.insert("execute_command".to_string(), 10);
        limits.insert("execute_workflow".to_string(), 5);
        limits.insert("request_approval".to_string(), 3);

        Self {
            tool_safety: Mutex::new(
                default_tool_safety()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            rate_limiter: ToolRateLimiter::new(limits),
            audit_log_path: log_dir.join("security_audit.jsonl"),
        }
    }

    pub fn get_tool_safety_level(&self, tool_name: &str) -> SafetyLevel {
        self.tool_safety
            .lock()
            .unwrap()
            .get(tool_name)
            .copied()
            .unwrap_or(SafetyLevel::Caution)
    }

    fn is_known_tool(&self, tool_name: &str) -> bool {
        self.tool_safety.lock().unwrap().contains_key(tool_name)
    }

    pub fn register_tool_safety(&self, tool_name: &str, level: SafetyLevel) {
        self.tool_safety
            .lock()
            .unwrap()
            .insert(tool_name.to_string(), level);
    }

    /// Main entry point for safety validation.
    pub fn check_safety(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        user_input: &str,
        context: &SafetyContext,
    ) -> SafetyCheckResult {
        let mut violations = Vec::new();
        let safety_level = self.get_tool_safety_level(tool_name);

        if !self.is_known_tool(tool_name) {
            violations.push(PolicyViolation {
                kind: ViolationType::UnauthorizedTool,
                message: format!("'{tool_name}' is not in the tool safety registry"),
                severity: SafetyLevel::Caution,
                blocked: false,
            });
        }

        if !arguments.is_object() && !arguments.is_null() {
            violations.push(PolicyViolation {
                kind: ViolationType::InvalidInput,
                message: format!("arguments for '{tool_name}' must be a JSON object"),
                severity: SafetyLevel::Restricted,
                blocked: true,
            });
        }

        let all_text = format!("{tool_name} {arguments} {user_input}");

        for (pattern, description) in FORBIDDEN_PATTERNS.iter() {
            if pattern.is_match(&all_text) {
                violations.push(PolicyViolation {
                    kind: ViolationType::ForbiddenCommand,
                    message: format!("forbidden pattern detected: {description}"),
                    severity: SafetyLevel::Forbidden,
                    blocked: true,
                });
            }
        }

        if violations.iter().any(|v| v.severity == SafetyLevel::Forbidden) {
            let result = SafetyCheckResult {
                allowed: false,
                level: SafetyLevel::Forbidden,
                violations,
                requires_confirmation: false,
                requires_approval: false,
                message: "operation blocked: contains forbidden patterns".to_string(),
            };
            self.log_safety_check(tool_name, &result);
            return result;
        }

        for (pattern, description) in DANGEROUS_PATTERNS.iter() {
            if pattern.is_match(&all_text) {
                violations.push(PolicyViolation {
                    kind: ViolationType::DangerousOperation,
                    message: format!("dangerous pattern detected: {description}"),
                    severity: SafetyLevel::Dangerous,
                    blocked: false,
                });
            }
        }

        let mut pii_found = Vec::new();
        for (pattern, pii_type) in PII_PATTERNS.iter() {
            if pattern.is_match(&all_text) {
                pii_found.push(*pii_type);
            }
        }
        if !pii_found.is_empty() {
            violations.push(PolicyViolation {
                kind: ViolationType::PiiExposure,
                message: format!("PII detected: {}", pii_found.join(", ")),
                severity: SafetyLevel::Restricted,
                blocked: false,
            });
        }

        if self.rate_limiter.check_and_record(tool_name).is_err() {
            violations.push(PolicyViolation {
                kind: ViolationType::RateLimit,
                message: format!("rate limit exceeded for {tool_name}"),
                severity: SafetyLevel::Restricted,
                blocked: true,
            });
        }

        // PRD-003: dangerous operations require approval.
        if safety_level == SafetyLevel::Dangerous && !context.approved {
            violations.push(PolicyViolation {
                kind: ViolationType::PrdViolation,
                message: "PRD violation: dangerous operations require approval".to_string(),
                severity: SafetyLevel::Restricted,
                blocked: false,
            });
        }
        // PRD-002: PII must be redacted in logs.
        if !pii_found.is_empty() {
            violations.push(PolicyViolation {
                kind: ViolationType::PrdViolation,
                message: "PRD violation: PII must be redacted in logs".to_string(),
                severity: SafetyLevel::Restricted,
                blocked: false,
            });
        }

        for (pattern, description) in CAUTION_PATTERNS.iter() {
            if pattern.is_match(&all_text) {
                tracing::info!(tool = %tool_name, reason = %description, "caution-level action logged");
                break;
            }
        }

        let has_blocking = violations.iter().any(|v| v.blocked);
        let max_severity = violations
            .iter()
            .map(|v| v.severity)
            .max()
            .unwrap_or(safety_level);

        let requires_confirmation = matches!(safety_level, SafetyLevel::Restricted | SafetyLevel::Dangerous)
            && !context.confirmed;
        let requires_approval = safety_level == SafetyLevel::Dangerous && !context.approved;

        if requires_confirmation {
            violations.push(PolicyViolation {
                kind: ViolationType::MissingConfirmation,
                message: format!("'{tool_name}' requires user confirmation before running"),
                severity: safety_level,
                blocked: false,
            });
        }

        let message = Self::generate_message(&violations, safety_level);

        let result = SafetyCheckResult {
            allowed: !has_blocking,
            level: max_severity,
            violations,
            requires_confirmation,
            requires_approval,
            message,
        };
        self.log_safety_check(tool_name, &result);
        result
    }

    /// Validate tool output before returning it to the user. Only scans
    /// for PII and forbidden patterns — never rate-limits or requires
    /// approval, since the tool already ran.
    pub fn validate_output(&self, output: &str, _tool_name: &str) -> SafetyCheckResult {
        let mut violations = Vec::new();

        let mut pii_found = Vec::new();
        for (pattern, pii_type) in PII_PATTERNS.iter() {
            if pattern.is_match(output) {
                pii_found.push(*pii_type);
            }
        }
        if !pii_found.is_empty() {
            violations.push(PolicyViolation {
                kind: ViolationType::PiiExposure,
                message: format!("output contains PII: {}", pii_found.join(", ")),
                severity: SafetyLevel::Caution,
                blocked: false,
            });
        }

        for (pattern, description) in FORBIDDEN_PATTERNS.iter() {
            if pattern.is_match(output) {
                violations.push(PolicyViolation {
                    kind: ViolationType::ForbiddenCommand,
                    message: format!("output contains forbidden pattern: {description}"),
                    severity: SafetyLevel::Dangerous,
                    blocked: true,
                });
            }
        }

        let has_blocking = violations.iter().any(|v| v.blocked);
        SafetyCheckResult {
            allowed: !has_blocking,
            level: if has_blocking { SafetyLevel::Dangerous } else { SafetyLevel::Safe },
            violations,
            requires_confirmation: false,
            requires_approval: false,
            message: format!("output validation {}", if has_blocking { "failed" } else { "passed" }),
        }
    }

    /// Redact all known PII patterns from text.
    pub fn redact_pii(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (pattern, pii_type) in PII_PATTERNS.iter() {
            result = pattern.replace_all(&result, format!("[REDACTED:{pii_type}]")).into_owned();
        }
        result
    }

    pub fn confirmation_message(&self, tool_name: &str, arguments: &serde_json::Value, result: &SafetyCheckResult) -> String {
        let mut lines = vec![
            "Confirmation required".to_string(),
            String::new(),
            format!("You're about to execute: {tool_name}"),
        ];
        if arguments.as_object().is_some_and(|o| !o.is_empty()) {
            lines.push(format!("Arguments: {arguments}"));
        }
        lines.push(format!("Safety level: {}", result.level.as_str().to_uppercase()));
        if !result.violations.is_empty() {
            lines.push(String::new());
            lines.push("Warnings:".to_string());
            for v in result.violations.iter().take(3) {
                lines.push(format!("  - {}", v.message));
            }
        }
        lines.push(String::new());
        lines.push("Reply 'yes' or 'confirm' to proceed, or 'no' to cancel.".to_string());
        lines.join("\n")
    }

    pub fn approval_message(&self, tool_name: &str, arguments: &serde_json::Value, result: &SafetyCheckResult) -> String {
        let mut lines = vec![
            "Approval required".to_string(),
            String::new(),
            format!("This operation requires approval: {tool_name}"),
        ];
        if arguments.as_object().is_some_and(|o| !o.is_empty()) {
            lines.push(format!("Arguments: {arguments}"));
        }
        lines.push(format!("Safety level: {}", result.level.as_str().to_uppercase()));
        if !result.violations.is_empty() {
            lines.push(String::new());
            lines.push("Risk assessment:".to_string());
            for v in &result.violations {
                lines.push(format!("  - [{}] {}", v.severity.as_str(), v.message));
            }
        }
        lines.push(String::new());
        lines.push("This request has been logged and requires administrator approval.".to_string());
        lines.join("\n")
    }

    fn generate_message(violations: &[PolicyViolation], safety_level: SafetyLevel) -> String {
        if violations.is_empty() {
            return format!("safety check passed (level: {})", safety_level.as_str());
        }
        let blocking: Vec<_> = violations.iter().filter(|v| v.blocked).collect();
        let warnings: Vec<_> = violations.iter().filter(|v| !v.blocked).collect();

        let mut parts = Vec::new();
        if let Some(first) = blocking.first() {
            parts.push(format!("blocked: {}", first.message));
        }
        if !warnings.is_empty() {
            parts.push(format!("warnings: {}", warnings.len()));
        }
        if parts.is_empty() {
            format!("safety level: {}", safety_level.as_str())
        } else {
            parts.join("; ")
        }
    }

    fn log_safety_check(&self, tool_name: &str, result: &SafetyCheckResult) {
        let entry = serde_json::json!({
            "ts": chrono::Utc::now().timestamp(),
            "type": "safety_check",
            "tool": tool_name,
            "allowed": result.allowed,
            "level": result.level.as_str(),
            "violation_count": result.violations.len(),
        });
        if let Some(parent) = self.audit_log_path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        use std::io::Write;
        if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(&self.audit_log_path) {
            let _ = writeln!(f, "{entry}");
        } else {
            warn!("failed to write safety audit log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SafetyPolicyEngine {
        let dir = std::env::temp_dir().join(format!("policy_test_{}", std::process::id()));
        SafetyPolicyEngine::new(&dir)
    }

    #[test]
    fn forbidden_pattern_blocks() {
        let e = engine();
        let result = e.check_safety("execute_command", &serde_json::json!({"command": "rm -rf /"}), "", &SafetyContext::default());
        assert!(!result.allowed);
        assert_eq!(result.level, SafetyLevel::Forbidden);
    }

    #[test]
    fn dangerous_pattern_does_not_block_but_raises_level() {
        let e = engine();
        let result = e.check_safety("execute_command", &serde_json::json!({"command": "sudo ls"}), "", &SafetyContext::default());
        assert!(result.allowed);
        assert!(result.violations.iter().any(|v| v.kind == ViolationType::DangerousOperation));
    }

    #[test]
    fn dangerous_tool_requires_approval() {
        let e = engine();
        let result = e.check_safety("execute_workflow", &serde_json::json!({}), "", &SafetyContext::default());
        assert!(result.requires_approval);
    }

    #[test]
    fn restricted_tool_requires_confirmation() {
        let e = engine();
        let result = e.check_safety("execute_command", &serde_json::json!({}), "", &SafetyContext::default());
        assert!(result.requires_confirmation);
        let confirmed_ctx = SafetyContext { confirmed: true, approved: false };
        let result2 = e.check_safety("execute_command", &serde_json::json!({}), "", &confirmed_ctx);
        assert!(!result2.requires_confirmation);
    }

    #[test]
    fn pii_detected_in_arguments() {
        let e = engine();
        let result = e.check_safety("check_health", &serde_json::json!({"note": "email me at a@b.com"}), "", &SafetyContext::default());
        assert!(result.violations.iter().any(|v| v.kind == ViolationType::PiiExposure));
    }

    #[test]
    fn redact_pii_replaces_email() {
        let e = engine();
        let redacted = e.redact_pii("contact me at foo@bar.com");
        assert!(redacted.contains("[REDACTED:email]"));
        assert!(!redacted.contains("foo@bar.com"));
    }

    #[test]
    fn validate_output_flags_forbidden_pattern() {
        let e = engine();
        let result = e.validate_output("run rm -rf / now", "any_tool");
        assert!(!result.allowed);
    }

    #[test]
    fn unknown_tool_defaults_to_caution() {
        let e = engine();
        assert_eq!(e.get_tool_safety_level("some_unregistered_tool"), SafetyLevel::Caution);
    }

    #[test]
    fn register_tool_safety_overrides_default() {
        let e = engine();
        e.register_tool_safety("check_health", SafetyLevel::Dangerous);
        assert_eq!(e.get_tool_safety_level("check_health"), SafetyLevel::Dangerous);
    }

    #[test]
    fn rate_limit_exceeded_blocks() {
        let e = engine();
        for _ in 0..3 {
            e.check_safety("request_approval", &serde_json::json!({}), "", &SafetyContext::default());
        }
        let result = e.check_safety("request_approval", &serde_json::json!({}), "", &SafetyContext::default());
        assert!(!result.allowed);
    }

    #[test]
    fn confirmation_message_contains_tool_name() {
        let e = engine();
        let result = e.check_safety("execute_command", &serde_json::json!({}), "", &SafetyContext::default());
        let msg = e.confirmation_message("execute_command", &serde_json::json!({}), &result);
        assert!(msg.contains("execute_command"));
    }
}
