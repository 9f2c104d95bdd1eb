//! Layer 3: the workflow engine. Executes pre-defined DAGs of tool calls so
//! the LLM never has to reason about task ordering.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: StepStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub condition: Option<String>,
    #[serde(default)]
    pub skip_on_failure: bool,
}

impl WorkflowStep {
    pub fn new(id: &str, name: &str, tool_name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            tool_name: tool_name.to_string(),
            arguments: HashMap::new(),
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            condition: None,
            skip_on_failure: false,
        }
    }

    pub fn with_args(mut self, args: HashMap<String, Value>) -> Self {
        self.arguments = args;
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl Workflow {
    fn new(id: String, name: &str, description: String, steps: Vec<WorkflowStep>, context: HashMap<String, Value>) -> Self {
        Self {
            id,
            name: name.to_string(),
            description,
            steps,
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            context,
        }
    }

    pub fn get_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    fn get_step_mut(&mut self, step_id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    /// Steps whose dependencies are all completed and that are themselves pending.
    pub fn get_next_steps(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .filter(|s| {
                s.dependencies.iter().all(|dep| {
                    self.get_step(dep)
                        .map(|d| d.status == StepStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed))
    }

    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Failed)
    }

    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["graph TD".to_string()];
        for step in &self.steps {
            let class = match step.status {
                StepStatus::Pending => "",
                StepStatus::Running => ":::running",
                StepStatus::Completed => ":::completed",
                StepStatus::Failed => ":::failed",
                StepStatus::Skipped => ":::skipped",
            };
            lines.push(format!("    {}[{}]{}", step.id, step.name, class));
            for dep in &step.dependencies {
                lines.push(format!("    {dep} --> {}", step.id));
            }
        }
        lines.push(String::new());
        lines.push("    classDef running fill:#ffd700,stroke:#333".to_string());
        lines.push("    classDef completed fill:#90ee90,stroke:#333".to_string());
        lines.push("    classDef failed fill:#ff6b6b,stroke:#333".to_string());
        lines.push("    classDef skipped fill:#d3d3d3,stroke:#333".to_string());
        lines.join("\n")
    }
}

/// Injected by the Orchestrator: runs a tool call and returns its result.
pub type ToolExecutor = Arc<
    dyn Fn(String, Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync,
>;

/// Cooperative cancellation signal for a running workflow.
#[derive(Clone, Default)]
pub struct CancellationFlag(CancellationToken);

impl CancellationFlag {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Engine for creating and executing pre-defined workflow templates.
pub struct WorkflowEngine {
    workflows: Mutex<HashMap<String, Workflow>>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self {
            workflows: Mutex::new(HashMap::new()),
        }
    }

    pub fn list_templates(&self) -> Vec<&'static str> {
        vec!["diagnose", "system_check", "security_audit", "debug", "generate_validate", "analyze"]
    }

    /// Create a workflow from a built-in template. `params` supplies
    /// template-specific inputs (e.g. `symptom`, `query`, `content`).
    pub fn create_workflow(&self, template_name: &str, params: &HashMap<String, Value>) -> Option<Workflow> {
        let workflow = match template_name {
            "diagnose" => self.diagnose_template(params),
            "system_check" => self.system_check_template(),
            "security_audit" => self.security_audit_template(),
            "debug" => self.debug_template(params),
            "generate_validate" => self.generate_validate_template(params),
            "analyze" => self.analyze_template(params),
            _ => return None,
        };
        self.workflows.lock().unwrap().insert(workflow.id.clone(), workflow.clone());
        Some(workflow)
    }

    pub fn get_workflow(&self, id: &str) -> Option<Workflow> {
        self.workflows.lock().unwrap().get(id).cloned()
    }

    fn str_param(params: &HashMap<String, Value>, key: &str) -> String {
        params.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
    }

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn diagnose_template(&self, params: &HashMap<String, Value>) -> Workflow {
        let symptom = Self::str_param(params, "symptom");
        let id = format!("diag_{}", Utc::now().timestamp());
        let steps = vec![
            WorkflowStep::new("health", "Check Health", "check_health"),
            WorkflowStep::new("status", "Get System Status", "get_system_status").depends_on(&["health"]),
            WorkflowStep::new("logs", "Get Recent Logs", "get_recent_logs")
                .with_args(Self::args(&[("service", Value::from("all")), ("lines", Value::from(20))]))
                .depends_on(&["health"]),
            WorkflowStep::new("diagnose", "Diagnose Issue", "diagnose_issue")
                .with_args(Self::args(&[("symptom", Value::from(symptom.clone()))]))
                .depends_on(&["status", "logs"]),
        ];
        let mut context = HashMap::new();
        context.insert("symptom".to_string(), Value::from(symptom.clone()));
        Workflow::new(id, "Diagnostic Workflow", format!("Diagnose issue: {}", truncate(&symptom, 50)), steps, context)
    }

    fn system_check_template(&self) -> Workflow {
        let id = format!("check_{}", Utc::now().timestamp());
        let steps = vec![
            WorkflowStep::new("health", "Backend Health", "check_health"),
            WorkflowStep::new("models", "ML Model Status", "get_model_status"),
            WorkflowStep::new("metrics", "Get Metrics", "get_metrics")
                .with_args(Self::args(&[("service", Value::from("all"))])),
            WorkflowStep::new("alerts", "Check Alerts", "get_alerts"),
            WorkflowStep::new("status", "System Status", "get_system_status")
                .depends_on(&["health", "models", "metrics", "alerts"]),
        ];
        Workflow::new(id, "System Check", "Comprehensive system health check".to_string(), steps, HashMap::new())
    }

    fn security_audit_template(&self) -> Workflow {
        let id = format!("sec_{}", Utc::now().timestamp());
        let steps = vec![
            WorkflowStep::new("audit_logs", "Get Security Audit Logs", "get_security_audit")
                .with_args(Self::args(&[("limit", Value::from(50))])),
            WorkflowStep::new("roles", "List Roles", "list_roles"),
            WorkflowStep::new("config", "Get Config", "get_config")
                .with_args(Self::args(&[("section", Value::from("all"))])),
            WorkflowStep::new("risk", "Evaluate Risk", "evaluate_risk")
                .with_args(Self::args(&[("operation", Value::from("security_audit"))]))
                .depends_on(&["audit_logs", "roles", "config"]),
        ];
        Workflow::new(id, "Security Audit", "Comprehensive security audit".to_string(), steps, HashMap::new())
    }

    fn debug_template(&self, params: &HashMap<String, Value>) -> Workflow {
        let symptom = Self::str_param(params, "symptom");
        let id = format!("debug_{}", Utc::now().timestamp());
        let steps = vec![
            WorkflowStep::new("health", "Check Health", "check_health"),
            WorkflowStep::new("logs", "Get Logs", "get_recent_logs")
                .with_args(Self::args(&[("service", Value::from("all")), ("lines", Value::from(50))])),
            WorkflowStep::new("traces", "Query Traces", "query_traces")
                .with_args(Self::args(&[("duration_ms_min", Value::from(1000))]))
                .depends_on(&["health"]),
            WorkflowStep::new("metrics", "Get Metrics", "get_metrics").depends_on(&["health"]),
            WorkflowStep::new("diagnose", "Diagnose", "diagnose_issue")
                .with_args(Self::args(&[("symptom", Value::from(symptom.clone()))]))
                .depends_on(&["logs", "traces", "metrics"]),
        ];
        let mut context = HashMap::new();
        context.insert("symptom".to_string(), Value::from(symptom.clone()));
        Workflow::new(id, "Debug Workflow", format!("Debug: {}", truncate(&symptom, 50)), steps, context)
    }

    fn generate_validate_template(&self, params: &HashMap<String, Value>) -> Workflow {
        let content = Self::str_param(params, "content");
        let id = format!("gen_{}", Utc::now().timestamp());
        let steps = vec![
            WorkflowStep::new("risk", "Evaluate Risk", "evaluate_risk")
                .with_args(Self::args(&[("operation", Value::from("generate_content"))])),
            WorkflowStep::new("pii", "Check PII", "check_pii")
                .with_args(Self::args(&[("text", Value::from(content.clone()))]))
                .depends_on(&["risk"]),
            WorkflowStep::new("audit", "Audit Log", "audit_log")
                .with_args(Self::args(&[("action", Value::from("content_generated"))]))
                .depends_on(&["pii"]),
        ];
        let mut context = HashMap::new();
        context.insert("content".to_string(), Value::from(content));
        Workflow::new(id, "Generate & Validate", "Generate content and validate it".to_string(), steps, context)
    }

    fn analyze_template(&self, params: &HashMap<String, Value>) -> Workflow {
        let query = Self::str_param(params, "query");
        let id = format!("analyze_{}", Utc::now().timestamp());
        let steps = vec![
            WorkflowStep::new("search", "Semantic Search", "semantic_search")
                .with_args(Self::args(&[("query", Value::from(query.clone()))])),
            WorkflowStep::new("docs", "Get Documentation", "get_documentation"),
            WorkflowStep::new("project", "Project Status", "get_project_status"),
        ];
        let mut context = HashMap::new();
        context.insert("query".to_string(), Value::from(query.clone()));
        Workflow::new(id, "Analysis Pipeline", format!("Analyze: {}", truncate(&query, 50)), steps, context)
    }

    /// Keyword heuristics mapping intent/text to a template name.
    pub fn detect_workflow(&self, user_input: &str) -> Option<&'static str> {
        let lower = user_input.to_lowercase();
        if ["debug", "diagnose", "troubleshoot", "fix"].iter().any(|w| lower.contains(w)) {
            return Some("debug");
        }
        if ["security", "audit", "vulnerability"].iter().any(|w| lower.contains(w)) {
            return Some("security_audit");
        }
        if ["full check", "system check", "comprehensive"].iter().any(|w| lower.contains(w)) {
            return Some("system_check");
        }
        if ["analyze", "research", "investigate", "look into"].iter().any(|w| lower.contains(w)) {
            return Some("analyze");
        }
        let wants_generate = ["generate", "create"].iter().any(|w| lower.contains(w));
        let wants_validate = ["validate", "check", "verify"].iter().any(|w| lower.contains(w));
        if wants_generate && wants_validate {
            return Some("generate_validate");
        }
        None
    }

    /// Convenience used by the Orchestrator: detect + create in one call.
    pub fn match_workflow(&self, user_input: &str, params: &HashMap<String, Value>) -> Option<Workflow> {
        let template_name = self.detect_workflow(user_input)?;
        self.create_workflow(template_name, params)
    }

    /// Execute a workflow wave-by-wave. Each wave runs up to
    /// `max_concurrent` ready steps concurrently, then the next wave forms
    /// from newly-ready steps. A round with pending-but-unready steps means
    /// the DAG is stuck and the workflow is marked failed.
    pub async fn execute_workflow(
        &self,
        mut workflow: Workflow,
        executor: ToolExecutor,
        max_concurrent: usize,
        cancel: &CancellationFlag,
    ) -> Workflow {
        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(Utc::now());

        while !workflow.is_complete() {
            if cancel.is_cancelled() {
                workflow.status = WorkflowStatus::Cancelled;
                break;
            }

            let ready = workflow.get_next_steps();
            if ready.is_empty() {
                let stuck = workflow.steps.iter().any(|s| s.status == StepStatus::Pending);
                if stuck {
                    workflow.status = WorkflowStatus::Failed;
                    for step in workflow.steps.iter_mut().filter(|s| s.status == StepStatus::Pending) {
                        step.status = StepStatus::Skipped;
                        step.error = Some("stuck: unmet dependencies".to_string());
                    }
                }
                break;
            }

            let batch: Vec<String> = ready.into_iter().take(max_concurrent).collect();
            for step_id in &batch {
                if let Some(step) = workflow.get_step_mut(step_id) {
                    step.status = StepStatus::Running;
                    step.started_at = Some(Utc::now());
                }
            }

            let futures: Vec<_> = batch
                .iter()
                .map(|step_id| {
                    let step = workflow.get_step(step_id).unwrap().clone();
                    let context = workflow.context.clone();
                    let executor = executor.clone();
                    let cancel = cancel.clone();
                    async move { (step.id.clone(), run_step(&step, &context, executor, &cancel).await) }
                })
                .collect();

            let results = futures::future::join_all(futures).await;
            for (step_id, outcome) in results {
                if let Some(step) = workflow.get_step_mut(&step_id) {
                    step.completed_at = Some(Utc::now());
                    match outcome {
                        StepOutcome::Completed(result) => {
                            step.status = StepStatus::Completed;
                            workflow.context.insert(format!("step_{step_id}_result"), result.clone());
                            step.result = Some(result);
                        }
                        StepOutcome::Skipped => {
                            step.status = StepStatus::Skipped;
                        }
                        StepOutcome::Failed(err) => {
                            step.status = StepStatus::Failed;
                            step.error = Some(err);
                        }
                    }
                }
            }
        }

        if workflow.status == WorkflowStatus::Running {
            workflow.status = if workflow.has_failures() { WorkflowStatus::Failed } else { WorkflowStatus::Completed };
        }
        workflow.completed_at = Some(Utc::now());

        self.workflows.lock().unwrap().insert(workflow.id.clone(), workflow.clone());
        workflow
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

enum StepOutcome {
    Completed(Value),
    Skipped,
    Failed(String),
}

async fn run_step(
    step: &WorkflowStep,
    context: &HashMap<String, Value>,
    executor: ToolExecutor,
    cancel: &CancellationFlag,
) -> StepOutcome {
    if cancel.is_cancelled() {
        return StepOutcome::Failed("cancelled".to_string());
    }

    if let Some(condition) = &step.condition {
        if !evaluate_condition(condition, context) {
            return StepOutcome::Skipped;
        }
    }

    let substituted = substitute_args(&step.arguments, context);
    match executor(step.tool_name.clone(), Value::Object(substituted.into_iter().collect())).await {
        Ok(result) => StepOutcome::Completed(result),
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}

/// Replace `$var` occurrences in string argument values with the matching
/// workflow-context value.
fn substitute_args(arguments: &HashMap<String, Value>, context: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut out = arguments.clone();
    for value in out.values_mut() {
        if let Value::String(s) = value {
            for (key, ctx_value) in context {
                let placeholder = format!("${key}");
                if s.contains(&placeholder) {
                    let replacement = match ctx_value {
                        Value::String(v) => v.clone(),
                        other => other.to_string(),
                    };
                    *s = s.replace(&placeholder, &replacement);
                }
            }
        }
    }
    out
}

/// Evaluate `$var == "lit"`, `$var != "lit"`, `$var exists`, or a bare
/// `true`/`false` literal against the workflow context.
fn evaluate_condition(condition: &str, context: &HashMap<String, Value>) -> bool {
    let condition = condition.trim();

    if condition.eq_ignore_ascii_case("true") {
        return true;
    }
    if condition.eq_ignore_ascii_case("false") {
        return false;
    }

    if let Some(var) = condition.strip_suffix(" exists") {
        let var = var.trim().trim_start_matches('$');
        return context.contains_key(var);
    }

    if let Some((lhs, rhs)) = condition.split_once("==") {
        let var = lhs.trim().trim_start_matches('$');
        let expected = rhs.trim().trim_matches(|c| c == '"' || c == '\'');
        return context_str(context, var) == expected;
    }

    if let Some((lhs, rhs)) = condition.split_once("!=") {
        let var = lhs.trim().trim_start_matches('$');
        let expected = rhs.trim().trim_matches(|c| c == '"' || c == '\'');
        return context_str(context, var) != expected;
    }

    true
}

fn context_str(context: &HashMap<String, Value>, key: &str) -> String {
    match context.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>() + "..."
    }
}

/// A failed tool executor for testing paths that never execute a tool.
pub fn unavailable_executor() -> ToolExecutor {
    Arc::new(|name, _args| {
        Box::pin(async move { Err(AgentError::ToolNotFound(name)) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_executor() -> ToolExecutor {
        Arc::new(|name, _args| {
            Box::pin(async move { Ok(serde_json::json!({"tool": name, "ok": true})) })
        })
    }

    #[test]
    fn list_templates_has_six_builtins() {
        let engine = WorkflowEngine::new();
        assert_eq!(engine.list_templates().len(), 6);
    }

    #[test]
    fn create_workflow_unknown_template_returns_none() {
        let engine = WorkflowEngine::new();
        assert!(engine.create_workflow("nonexistent", &HashMap::new()).is_none());
    }

    #[test]
    fn diagnose_template_has_expected_steps() {
        let engine = WorkflowEngine::new();
        let mut params = HashMap::new();
        params.insert("symptom".to_string(), Value::from("slow responses"));
        let wf = engine.create_workflow("diagnose", &params).unwrap();
        assert_eq!(wf.steps.len(), 4);
        assert_eq!(wf.get_step("diagnose").unwrap().dependencies, vec!["status", "logs"]);
    }

    #[test]
    fn detect_workflow_matches_debug_keywords() {
        let engine = WorkflowEngine::new();
        assert_eq!(engine.detect_workflow("please debug this error"), Some("debug"));
        assert_eq!(engine.detect_workflow("run a security audit"), Some("security_audit"));
        assert_eq!(engine.detect_workflow("hello there"), None);
    }

    #[test]
    fn evaluate_condition_variants() {
        let mut ctx = HashMap::new();
        ctx.insert("room".to_string(), Value::from("kitchen"));
        assert!(evaluate_condition("true", &ctx));
        assert!(!evaluate_condition("false", &ctx));
        assert!(evaluate_condition("$room exists", &ctx));
        assert!(!evaluate_condition("$missing exists", &ctx));
        assert!(evaluate_condition(r#"$room == "kitchen""#, &ctx));
        assert!(evaluate_condition(r#"$room != "bathroom""#, &ctx));
    }

    #[tokio::test]
    async fn execute_workflow_completes_linear_chain() {
        let engine = WorkflowEngine::new();
        let wf = engine.create_workflow("system_check", &HashMap::new()).unwrap();
        let cancel = CancellationFlag::new();
        let result = engine.execute_workflow(wf, ok_executor(), 3, &cancel).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn execute_workflow_marks_failed_on_tool_error() {
        let engine = WorkflowEngine::new();
        let wf = engine.create_workflow("diagnose", &HashMap::new()).unwrap();
        let cancel = CancellationFlag::new();
        let result = engine.execute_workflow(wf, unavailable_executor(), 3, &cancel).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn execute_workflow_respects_cancellation() {
        let engine = WorkflowEngine::new();
        let wf = engine.create_workflow("system_check", &HashMap::new()).unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = engine.execute_workflow(wf, ok_executor(), 3, &cancel).await;
        assert_eq!(result.status, WorkflowStatus::Cancelled);
    }

    #[test]
    fn mermaid_output_includes_all_step_ids() {
        let engine = WorkflowEngine::new();
        let wf = engine.create_workflow("analyze", &HashMap::new()).unwrap();
        let mermaid = wf.to_mermaid();
        for step in &wf.steps {
            assert!(mermaid.contains(&step.id));
        }
    }
}
