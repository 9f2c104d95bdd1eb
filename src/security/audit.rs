use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::error;

/// Structured, append-only audit log for every security-relevant event.
///
/// Events include tool executions, approval decisions, LLM calls,
/// rate-limit hits, PII detection, and policy violations. Persisted as
/// JSON-lines (one event per line) rather than sqlite, matching the
/// control plane's file-based state model; a bounded in-memory ring
/// buffer backs `recent`/`summary` so those reads don't re-parse the file.
pub struct AuditLogger {
    path: PathBuf,
    next_id: Mutex<i64>,
    cache: Mutex<VecDeque<AuditEntry>>,
}

const CACHE_CAPACITY: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub event_type: String,
    pub tool: Option<String>,
    pub action: Option<String>,
    pub user_context: Option<String>,
    pub reasoning: Option<String>,
    pub params_json: Option<String>,
    pub result: Option<String>,
    pub success: Option<bool>,
    pub source: String,
    pub created_at: i64,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditSummary {
    pub total_events: u64,
    pub tool_calls: u64,
    pub approvals: u64,
    pub rejections: u64,
    pub rate_limits: u64,
    pub pii_detections: u64,
    pub policy_violations: u64,
}

// ---------------------------------------------------------------------------
// Sensitive-value redaction for audit log params
// ---------------------------------------------------------------------------

/// Redact sensitive values from a JSON string before audit logging.
///
/// Scans JSON keys for patterns suggesting secrets (passwords, tokens,
/// API keys, credentials) and replaces their values with `[REDACTED]`.
/// Non-JSON strings are returned unchanged.
pub fn redact_sensitive_params(json: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(json) else {
        return json.to_string();
    };
    redact_value(&mut value);
    serde_json::to_string(&value).unwrap_or_else(|_| json.to_string())
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.contains("password")
        || lower.contains("secret")
        || lower.contains("token")
        || lower.contains("api_key")
        || lower.contains("apikey")
        || lower.contains("auth")
        || lower.contains("credential")
        || lower.contains("bearer")
        || lower.contains("private_key")
        || lower.contains("signing_key")
}

fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_sensitive_key(key) {
                    if val.is_string() {
                        *val = serde_json::Value::String("[REDACTED]".to_string());
                    }
                } else {
                    redact_value(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                redact_value(item);
            }
        }
        _ => {}
    }
}

impl AuditLogger {
    pub fn new(path: PathBuf) -> Self {
        let mut cache = VecDeque::new();
        let mut max_id = 0i64;
        if let Ok(contents) = std::fs::read_to_string(&path) {
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(entry) = serde_json::from_str::<AuditEntry>(line) {
                    max_id = max_id.max(entry.id);
                    if cache.len() >= CACHE_CAPACITY {
                        cache.pop_front();
                    }
                    cache.push_back(entry);
                }
            }
        }
        Self { path, next_id: Mutex::new(max_id + 1), cache: Mutex::new(cache) }
    }

    fn append(&self, entry: &AuditEntry) {
        let Ok(line) = serde_json::to_string(entry) else { return };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            error!("failed to write audit log: {e}");
        }
    }

    /// Log a security-relevant event. `params_json` is redacted before
    /// persistence: any JSON keys matching sensitive patterns (password,
    /// token, secret, etc.) have their values replaced with `[REDACTED]`.
    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        event_type: &str,
        tool: Option<&str>,
        action: Option<&str>,
        user_context: Option<&str>,
        reasoning: Option<&str>,
        params_json: Option<&str>,
        result: Option<&str>,
        success: Option<bool>,
        source: &str,
        trace_id: Option<&str>,
    ) {
        let redacted = params_json.map(redact_sensitive_params);
        let mut next_id = self.next_id.lock().await;
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        let entry = AuditEntry {
            id,
            event_type: event_type.to_string(),
            tool: tool.map(String::from),
            action: action.map(String::from),
            user_context: user_context.map(String::from),
            reasoning: reasoning.map(String::from),
            params_json: redacted,
            result: result.map(String::from),
            success,
            source: source.to_string(),
            created_at: chrono::Utc::now().timestamp(),
            trace_id: trace_id.map(String::from),
        };

        self.append(&entry);
        let mut cache = self.cache.lock().await;
        if cache.len() >= CACHE_CAPACITY {
            cache.pop_front();
        }
        cache.push_back(entry);
    }

    /// Convenience: log a tool execution.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_tool_call(
        &self,
        tool_name: &str,
        params: &serde_json::Value,
        result_preview: &str,
        success: bool,
        source: &str,
        reasoning: &str,
        user_context: &str,
        trace_id: Option<&str>,
    ) {
        let params_str = serde_json::to_string(params).unwrap_or_default();
        self.log(
            "tool_call",
            Some(tool_name),
            Some(if success { "execute" } else { "fail" }),
            Some(user_context),
            Some(reasoning),
            Some(&params_str),
            Some(result_preview),
            Some(success),
            source,
            trace_id,
        )
        .await;
    }

    pub async fn log_approval(&self, tool_name: &str, action: &str, reasoning: &str, source: &str) {
        self.log("approval", Some(tool_name), Some(action), None, Some(reasoning), None, None, None, source, None)
            .await;
    }

    pub async fn log_rate_limit(&self, tool_name: &str, source: &str) {
        self.log(
            "rate_limit",
            Some(tool_name),
            Some("block"),
            None,
            None,
            None,
            Some("rate limit exceeded"),
            Some(false),
            source,
            None,
        )
        .await;
    }

    pub async fn log_pii_detected(&self, description: &str, action: &str, source: &str) {
        self.log("pii_detected", None, Some(action), None, None, None, Some(description), Some(false), source, None)
            .await;
    }

    pub async fn log_policy_violation(&self, tool_name: &str, reason: &str, source: &str) {
        self.log(
            "policy_violation",
            Some(tool_name),
            Some("block"),
            None,
            None,
            None,
            Some(reason),
            Some(false),
            source,
            None,
        )
        .await;
    }

    /// Query recent audit entries with optional filtering, newest first.
    pub async fn recent(
        &self,
        limit: usize,
        offset: usize,
        event_type: Option<&str>,
        tool: Option<&str>,
    ) -> Vec<AuditEntry> {
        let cache = self.cache.lock().await;
        cache
            .iter()
            .rev()
            .filter(|e| event_type.is_none_or(|et| e.event_type == et))
            .filter(|e| tool.is_none_or(|t| e.tool.as_deref() == Some(t)))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Aggregate statistics over the cached window.
    pub async fn summary(&self) -> AuditSummary {
        let cache = self.cache.lock().await;
        let mut summary = AuditSummary { total_events: cache.len() as u64, ..Default::default() };
        for entry in cache.iter() {
            match entry.event_type.as_str() {
                "tool_call" => summary.tool_calls += 1,
                "approval" if entry.action.as_deref() == Some("approve") => summary.approvals += 1,
                "approval" if entry.action.as_deref() == Some("reject") => summary.rejections += 1,
                "rate_limit" => summary.rate_limits += 1,
                "pii_detected" => summary.pii_detections += 1,
                "policy_violation" => summary.policy_violations += 1,
                _ => {}
            }
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Metrics: counters, histograms, gauges
// ---------------------------------------------------------------------------

/// Minimal in-process metrics registry: named counters, histograms
/// (observation lists, summarized on read), and gauges.
#[derive(Default)]
pub struct Metrics {
    counters: StdMutex<HashMap<String, u64>>,
    histograms: StdMutex<HashMap<String, Vec<f64>>>,
    gauges: StdMutex<HashMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str, by: u64) {
        *self.counters.lock().unwrap().entry(name.to_string()).or_insert(0) += by;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn observe(&self, name: &str, value: f64) {
        self.histograms.lock().unwrap().entry(name.to_string()).or_default().push(value);
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSummary> {
        let histograms = self.histograms.lock().unwrap();
        let values = histograms.get(name)?;
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some(HistogramSummary { count: values.len(), sum, min, max, avg: sum / values.len() as f64 })
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.lock().unwrap().get(name).copied()
    }
}

// ---------------------------------------------------------------------------
// Trace context: W3C traceparent propagation
// ---------------------------------------------------------------------------

/// A W3C Trace Context span identity (`traceparent` header, version `00`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::rng();
    (0..bytes).map(|_| format!("{:02x}", rng.random::<u8>())).collect()
}

impl TraceContext {
    /// Start a new root trace.
    pub fn new() -> Self {
        Self { trace_id: random_hex(16), span_id: random_hex(8) }
    }

    /// Derive a child span within the same trace.
    pub fn child_span(&self) -> Self {
        Self { trace_id: self.trace_id.clone(), span_id: random_hex(8) }
    }

    /// Render as a `traceparent` header value: `00-{trace-id}-{span-id}-01`.
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Parse an incoming `traceparent` header, extracting the trace id and
    /// starting a fresh span id as the new local span (per W3C semantics,
    /// the incoming span id becomes the parent, not this span's id).
    pub fn parse(header: &str) -> Option<Self> {
        let parts: Vec<&str> = header.split('-').collect();
        if parts.len() != 4 || parts[0] != "00" || parts[1].len() != 32 || parts[2].len() != 16 {
            return None;
        }
        Some(Self { trace_id: parts[1].to_string(), span_id: random_hex(8) })
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_logger() -> (AuditLogger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        (AuditLogger::new(path), dir)
    }

    #[tokio::test]
    async fn test_log_and_recent() {
        let (logger, _dir) = make_logger().await;
        logger.log_tool_call("exec", &serde_json::json!({"cmd": "ls"}), "file list", true, "agent", "list files", "user said ls", None).await;
        logger.log_rate_limit("exec", "agent").await;
        logger.log_pii_detected("SSN found", "redact", "agent").await;

        let entries = logger.recent(10, 0, None, None).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].event_type, "pii_detected");
        assert_eq!(entries[1].event_type, "rate_limit");
        assert_eq!(entries[2].event_type, "tool_call");
    }

    #[tokio::test]
    async fn test_filter_by_event_type() {
        let (logger, _dir) = make_logger().await;
        logger.log_tool_call("exec", &serde_json::json!({}), "ok", true, "agent", "", "", None).await;
        logger.log_rate_limit("exec", "agent").await;

        let entries = logger.recent(10, 0, Some("rate_limit"), None).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, "rate_limit");
    }

    #[tokio::test]
    async fn test_filter_by_tool() {
        let (logger, _dir) = make_logger().await;
        logger.log_tool_call("exec", &serde_json::json!({}), "ok", true, "agent", "", "", None).await;
        logger.log_tool_call("web_search", &serde_json::json!({}), "ok", true, "agent", "", "", None).await;

        let entries = logger.recent(10, 0, None, Some("web_search")).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool.as_deref(), Some("web_search"));
    }

    #[tokio::test]
    async fn test_summary() {
        let (logger, _dir) = make_logger().await;
        logger.log_tool_call("exec", &serde_json::json!({}), "ok", true, "agent", "", "", None).await;
        logger.log_tool_call("exec", &serde_json::json!({}), "fail", false, "agent", "", "", None).await;
        logger.log_rate_limit("exec", "agent").await;
        logger.log_pii_detected("SSN", "redact", "agent").await;
        logger.log_policy_violation("exec", "blocked", "agent").await;
        logger.log_approval("exec", "approve", "ok", "http").await;
        logger.log_approval("exec", "reject", "no", "http").await;

        let summary = logger.summary().await;
        assert_eq!(summary.total_events, 7);
        assert_eq!(summary.tool_calls, 2);
        assert_eq!(summary.approvals, 1);
        assert_eq!(summary.rejections, 1);
        assert_eq!(summary.rate_limits, 1);
        assert_eq!(summary.pii_detections, 1);
        assert_eq!(summary.policy_violations, 1);
    }

    #[tokio::test]
    async fn audit_log_reloads_from_jsonl_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let logger = AuditLogger::new(path.clone());
            logger.log_tool_call("exec", &serde_json::json!({}), "ok", true, "agent", "", "", None).await;
        }
        let logger2 = AuditLogger::new(path);
        let entries = logger2.recent(10, 0, None, None).await;
        assert_eq!(entries.len(), 1);
    }

    // -- Redaction tests --------------------------------------------------

    #[test]
    fn redact_sensitive_keys() {
        let input = r#"{"api_key":"sk-123","query":"hello","password":"s3cret"}"#;
        let result = redact_sensitive_params(input);
        let v: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(v["api_key"], "[REDACTED]");
        assert_eq!(v["query"], "hello");
        assert_eq!(v["password"], "[REDACTED]");
    }

    #[test]
    fn redact_nested_sensitive_keys() {
        let input = r#"{"config":{"client_secret":"abc","name":"test"}}"#;
        let result = redact_sensitive_params(input);
        let v: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(v["config"]["client_secret"], "[REDACTED]");
        assert_eq!(v["config"]["name"], "test");
    }

    #[test]
    fn redact_in_array() {
        let input = r#"[{"token":"xyz"},{"cmd":"ls"}]"#;
        let result = redact_sensitive_params(input);
        let v: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(v[0]["token"], "[REDACTED]");
        assert_eq!(v[1]["cmd"], "ls");
    }

    #[test]
    fn redact_non_json_passthrough() {
        let input = "not json at all";
        assert_eq!(redact_sensitive_params(input), input);
    }

    // -- Metrics & trace context -------------------------------------------

    #[test]
    fn metrics_counter_accumulates() {
        let m = Metrics::new();
        m.incr("tool_calls_total", 1);
        m.incr("tool_calls_total", 2);
        assert_eq!(m.counter("tool_calls_total"), 3);
    }

    #[test]
    fn metrics_histogram_summarizes() {
        let m = Metrics::new();
        m.observe("latency_ms", 10.0);
        m.observe("latency_ms", 20.0);
        let summary = m.histogram("latency_ms").unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.avg, 15.0);
    }

    #[test]
    fn metrics_gauge_overwrites() {
        let m = Metrics::new();
        m.set_gauge("inflight", 3.0);
        m.set_gauge("inflight", 5.0);
        assert_eq!(m.gauge("inflight"), Some(5.0));
    }

    #[test]
    fn trace_context_traceparent_roundtrip() {
        let ctx = TraceContext::new();
        let header = ctx.traceparent();
        let parsed = TraceContext::parse(&header).unwrap();
        assert_eq!(parsed.trace_id, ctx.trace_id);
    }

    #[test]
    fn trace_context_child_keeps_trace_id() {
        let ctx = TraceContext::new();
        let child = ctx.child_span();
        assert_eq!(child.trace_id, ctx.trace_id);
        assert_ne!(child.span_id, ctx.span_id);
    }

    #[test]
    fn trace_context_parse_rejects_malformed() {
        assert!(TraceContext::parse("not-a-traceparent").is_none());
    }
}
