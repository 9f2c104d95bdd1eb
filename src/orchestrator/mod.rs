//! Chat orchestrator: the single entry point a request enters through.
//!
//! Grounded on the teacher's `agent/mod.rs` tool-call loop (classify →
//! route → gate → execute → synthesize → append, breadcrumbed with
//! `tracing` at each step) generalized to the spec's ten-step per-request
//! algorithm: classify intent, route to a workflow/tool/free-chat plan,
//! run the safety gate, execute with retry/backoff and deadlines, guard
//! the synthesized reply, redact/validate the output, and audit the whole
//! turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::warn;

use crate::approval::ApprovalQueue;
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::guards::GuardPipeline;
use crate::intent::{Intent, IntentClassifier};
use crate::llm::adapter::{ChatMessage, DualModelAdapter};
use crate::router::{IntentCategory, SymbolicRouter};
use crate::security::audit::{AuditLogger, Metrics, TraceContext};
use crate::security::policy::{SafetyContext, SafetyPolicyEngine};
use crate::tools::{DispatchContext, ToolContext, ToolRegistry};
use crate::workflow::{CancellationFlag, ToolExecutor, WorkflowEngine};

mod conversation;
mod retry;

pub use conversation::{Conversation, ConversationStore};
use retry::{backoff_delay, is_retryable_for_orchestrator, MAX_RETRIES};

const PER_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const TOTAL_TURN_TIMEOUT: Duration = Duration::from_secs(180);
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(3);
const LOW_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// The structured reply returned for every turn, whatever plan was taken.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorResponse {
    pub conversation_id: String,
    pub response: String,
    pub tool_calls: Vec<String>,
    pub mode: &'static str,
    pub llm_used: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
}

enum Plan {
    Workflow(crate::workflow::Workflow),
    Tool { name: String, arguments: serde_json::Value, mode: &'static str },
    Chat { mode: &'static str },
}

/// Wires every component in the control plane together behind one
/// `handle_message` entry point. Holds only `Arc`-shared, thread-safe
/// handles so it can itself be held behind an `Arc` and cloned cheaply
/// into the HTTP layer's handler closures.
pub struct Orchestrator {
    intent_classifier: IntentClassifier,
    router: SymbolicRouter,
    workflows: WorkflowEngine,
    safety: SafetyPolicyEngine,
    llm: Arc<DualModelAdapter>,
    guards: GuardPipeline,
    tools: Arc<ToolRegistry>,
    tool_ctx: Arc<ToolContext>,
    approvals: Arc<ApprovalQueue>,
    audit: Arc<AuditLogger>,
    metrics: Arc<Metrics>,
    conversations: ConversationStore,
    turn_semaphore: Arc<Semaphore>,
    conversation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        llm: Arc<DualModelAdapter>,
        tools: Arc<ToolRegistry>,
        tool_ctx: Arc<ToolContext>,
        approvals: Arc<ApprovalQueue>,
        audit: Arc<AuditLogger>,
        metrics: Arc<Metrics>,
        log_dir: &std::path::Path,
    ) -> Self {
        Self {
            intent_classifier: IntentClassifier::new(),
            router: SymbolicRouter::new(),
            workflows: WorkflowEngine::new(),
            safety: SafetyPolicyEngine::new(log_dir),
            llm,
            guards: GuardPipeline::new(&config.guards),
            tools,
            tool_ctx,
            approvals,
            audit,
            metrics,
            conversations: ConversationStore::new(500, Duration::from_secs(3600)),
            turn_semaphore: Arc::new(Semaphore::new(config.server.max_concurrent_chats)),
            conversation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-conversation FIFO lock: a second message for the same
    /// conversation queues behind the first instead of racing it.
    async fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.conversation_locks.lock().await;
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Count of conversations currently held in the in-memory store, for
    /// `/chat/status`.
    pub async fn active_conversations(&self) -> usize {
        self.conversations.active_count().await
    }

    /// Handle one inbound chat turn end to end. Bounded by a 180s total
    /// deadline and a global semaphore capping concurrent in-flight turns.
    pub async fn handle_message(&self, conversation_id: &str, user_message: &str) -> Result<OrchestratorResponse> {
        let _permit = self
            .turn_semaphore
            .acquire()
            .await
            .map_err(|_| AgentError::ServiceUnavailable("orchestrator shutting down".into()))?;

        let lock = self.lock_for(conversation_id).await;
        let _conv_guard = lock.lock().await;

        match tokio::time::timeout(TOTAL_TURN_TIMEOUT, self.run_turn(conversation_id, user_message)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(conversation_id, "turn exceeded total deadline");
                self.audit
                    .log("timeout", None, None, Some(conversation_id), None, None, None, Some(false), "orchestrator", None)
                    .await;
                Err(AgentError::Timeout(format!("turn for conversation {conversation_id} exceeded {TOTAL_TURN_TIMEOUT:?}")))
            }
        }
    }

    async fn run_turn(&self, conversation_id: &str, user_message: &str) -> Result<OrchestratorResponse> {
        let trace = TraceContext::new();
        let mut conversation = self.conversations.get_or_create(conversation_id).await;
        conversation.messages.push(ChatMessage { role: "user".to_string(), content: user_message.to_string() });

        // Step: resume a pending confirmation/approval from the prior turn.
        if let Some(pending) = conversation.pending.take() {
            let affirmative = is_affirmative(user_message);
            if affirmative {
                let outcome = self
                    .execute_plan(
                        &conversation_id.to_string(),
                        Plan::Tool { name: pending.tool.clone(), arguments: pending.arguments.clone(), mode: "mcp" },
                        user_message,
                        &trace,
                        SafetyContext { confirmed: true, approved: true },
                    )
                    .await;
                self.conversations.save(conversation_id, conversation).await;
                return outcome;
            }
            // Not a yes: fall through to treat this as a new, unrelated turn.
        }

        let classified = self.intent_classifier.classify(user_message, Some(&self.llm)).await;
        if classified.confidence < LOW_CONFIDENCE_THRESHOLD && classified.intent == Intent::GeneralChat {
            let response = OrchestratorResponse {
                conversation_id: conversation_id.to_string(),
                response: "I'm not sure what you'd like me to do — could you rephrase that?".to_string(),
                tool_calls: Vec::new(),
                mode: "clarify",
                llm_used: None,
                model_used: None,
                success: true,
                action_id: None,
            };
            conversation.messages.push(ChatMessage { role: "assistant".to_string(), content: response.response.clone() });
            self.conversations.save(conversation_id, conversation).await;
            return Ok(response);
        }

        let plan = self.build_plan(user_message, &classified.parameters);
        let result = self
            .execute_plan(&conversation_id.to_string(), plan, user_message, &trace, SafetyContext::default())
            .await;

        if let Ok(response) = &result {
            conversation.messages.push(ChatMessage { role: "assistant".to_string(), content: response.response.clone() });
        }
        self.conversations.save(conversation_id, conversation).await;
        result
    }

    fn build_plan(&self, user_input: &str, intent_params: &HashMap<String, serde_json::Value>) -> Plan {
        let workflow_params: HashMap<String, serde_json::Value> = intent_params.clone();
        if let Some(workflow) = self.workflows.match_workflow(user_input, &workflow_params) {
            return Plan::Workflow(workflow);
        }

        let classification = self.router.classify_intent(user_input);
        let mode = category_mode(classification.category);
        let available: Vec<String> = self.tools.list().into_iter().map(|(name, _)| name.to_string()).collect();
        if let Some((tool, args)) = self.router.route_to_tool(&classification, user_input, &available) {
            let arguments = serde_json::Value::Object(
                args.into_iter().map(|(k, v)| (k, serde_json::Value::String(v))).collect(),
            );
            return Plan::Tool { name: tool, arguments, mode };
        }

        Plan::Chat { mode }
    }

    async fn execute_plan(
        &self,
        conversation_id: &str,
        plan: Plan,
        user_input: &str,
        trace: &TraceContext,
        safety_ctx: SafetyContext,
    ) -> Result<OrchestratorResponse> {
        match plan {
            Plan::Chat { mode } => self.run_chat(conversation_id, user_input, mode, false).await,
            Plan::Tool { name, arguments, mode } => {
                let check = self.safety.check_safety(&name, &arguments, user_input, &safety_ctx);
                if !check.allowed {
                    self.audit.log_policy_violation(&name, &check.message, "orchestrator").await;
                    return Ok(OrchestratorResponse {
                        conversation_id: conversation_id.to_string(),
                        response: check.message,
                        tool_calls: vec![name],
                        mode: "blocked",
                        llm_used: None,
                        model_used: None,
                        success: false,
                        action_id: None,
                    });
                }
                if check.requires_confirmation && !safety_ctx.confirmed {
                    let message = self.safety.confirmation_message(&name, &arguments, &check);
                    self.conversations
                        .set_pending(conversation_id, conversation::PendingAction { tool: name.clone(), arguments })
                        .await;
                    return Ok(OrchestratorResponse {
                        conversation_id: conversation_id.to_string(),
                        response: message,
                        tool_calls: vec![name],
                        mode: "awaiting_confirmation",
                        llm_used: None,
                        model_used: None,
                        success: true,
                        action_id: None,
                    });
                }
                if check.requires_approval && !safety_ctx.approved {
                    let action_id = self.approvals.enqueue(&name, arguments.clone()).await?;
                    self.audit.log_approval(&name, "enqueued", &check.message, "orchestrator").await;
                    let message = self.safety.approval_message(&name, &arguments, &check);
                    return Ok(OrchestratorResponse {
                        conversation_id: conversation_id.to_string(),
                        response: message,
                        tool_calls: vec![name],
                        mode: "awaiting_approval",
                        llm_used: None,
                        model_used: None,
                        success: true,
                        action_id: Some(action_id),
                    });
                }

                let tool_name = name.clone();
                let result = self.dispatch_with_retry(&tool_name, arguments, conversation_id, trace).await;
                self.synthesize_tool_result(conversation_id, user_input, &tool_name, mode, result).await
            }
            Plan::Workflow(workflow) => {
                let workflow_name = workflow.name.clone();
                let executor = self.workflow_executor(conversation_id, trace);
                let cancel = CancellationFlag::new();
                let finished = self.workflows.execute_workflow(workflow, executor, 4, &cancel).await;
                let succeeded = !finished.has_failures();
                self.metrics.incr("workflows_executed_total", 1);
                if !succeeded {
                    self.metrics.incr("workflows_failed_total", 1);
                }
                let summary = format!(
                    "Workflow '{}' finished with status {:?} ({} steps).",
                    workflow_name,
                    finished.status,
                    finished.steps.len()
                );
                self.finish_with_guards(conversation_id, &summary, vec![workflow_name], "mcp", succeeded, None).await
            }
        }
    }

    /// Build the closure `WorkflowEngine::execute_workflow` calls per step:
    /// per-step safety check plus the same retry/backoff/timeout machinery
    /// as a standalone tool call.
    fn workflow_executor(&self, conversation_id: &str, trace: &TraceContext) -> ToolExecutor {
        let tools = self.tools.clone();
        let tool_ctx = self.tool_ctx.clone();
        let audit = self.audit.clone();
        let metrics = self.metrics.clone();
        let conversation_id = conversation_id.to_string();
        let trace_id = trace.trace_id.clone();

        Arc::new(move |tool_name: String, arguments: serde_json::Value| {
            let tools = tools.clone();
            let tool_ctx = tool_ctx.clone();
            let audit = audit.clone();
            let metrics = metrics.clone();
            let conversation_id = conversation_id.clone();
            let trace_id = trace_id.clone();
            Box::pin(async move {
                let result = dispatch_with_retry_inner(
                    &tools,
                    &tool_ctx,
                    &audit,
                    &metrics,
                    &tool_name,
                    arguments,
                    &conversation_id,
                    &trace_id,
                )
                .await?;
                Ok(serde_json::json!({"output": result.output, "success": result.success}))
            })
        })
    }

    async fn dispatch_with_retry(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        conversation_id: &str,
        trace: &TraceContext,
    ) -> Result<crate::tools::ToolOutput> {
        dispatch_with_retry_inner(
            &self.tools,
            &self.tool_ctx,
            &self.audit,
            &self.metrics,
            tool_name,
            arguments,
            conversation_id,
            &trace.trace_id,
        )
        .await
    }

    async fn synthesize_tool_result(
        &self,
        conversation_id: &str,
        user_input: &str,
        tool_name: &str,
        mode: &'static str,
        result: Result<crate::tools::ToolOutput>,
    ) -> Result<OrchestratorResponse> {
        match result {
            Ok(output) => {
                let note = format!(
                    "The tool `{tool_name}` was run for the request \"{user_input}\" and returned:\n{}",
                    output.output
                );
                self.finish_with_guards(conversation_id, &note, vec![tool_name.to_string()], mode, output.success, None)
                    .await
            }
            Err(e) => {
                self.metrics.incr("errors_total", 1);
                Ok(OrchestratorResponse {
                    conversation_id: conversation_id.to_string(),
                    response: format!("`{tool_name}` failed: {e}"),
                    tool_calls: vec![tool_name.to_string()],
                    mode: "tool_error",
                    llm_used: None,
                    model_used: None,
                    success: false,
                    action_id: None,
                })
            }
        }
    }

    /// Synthesize a final reply with the LLM, then run it through the
    /// guard pipeline and output-safety validation before returning.
    async fn finish_with_guards(
        &self,
        conversation_id: &str,
        context_note: &str,
        tool_calls: Vec<String>,
        mode: &'static str,
        upstream_success: bool,
        force_worker: Option<bool>,
    ) -> Result<OrchestratorResponse> {
        let messages = vec![
            ChatMessage { role: "system".to_string(), content: context_note.to_string() },
            ChatMessage { role: "user".to_string(), content: "Summarize the result for the user.".to_string() },
        ];
        let chat_result = self.llm.chat(&messages, mode, force_worker.unwrap_or(false)).await?;

        let report = self.guards.run(&chat_result.content, None);
        let mut text = chat_result.content;
        if !report.passed {
            warn!(conversation_id, warnings = ?report.warnings, "guard pipeline flagged response");
        }

        let output_check = self.safety.validate_output(&text, tool_calls.first().map(String::as_str).unwrap_or(""));
        if !output_check.allowed {
            text = self.safety.redact_pii(&text);
        }

        self.metrics.incr("turns_completed_total", 1);
        Ok(OrchestratorResponse {
            conversation_id: conversation_id.to_string(),
            response: text,
            tool_calls,
            mode: "tool",
            llm_used: Some(chat_result.model_used),
            model_used: Some(chat_result.model_name),
            success: upstream_success && output_check.allowed,
            action_id: None,
        })
    }

    async fn run_chat(
        &self,
        conversation_id: &str,
        user_input: &str,
        mode: &'static str,
        force_worker: bool,
    ) -> Result<OrchestratorResponse> {
        let messages = vec![ChatMessage { role: "user".to_string(), content: user_input.to_string() }];
        let chat_result = self.llm.chat(&messages, mode, force_worker).await?;
        let report = self.guards.run(&chat_result.content, None);
        let mut text = chat_result.content;
        if !report.passed {
            warn!(conversation_id, warnings = ?report.warnings, "guard pipeline flagged response");
        }
        let output_check = self.safety.validate_output(&text, "");
        if !output_check.allowed {
            text = self.safety.redact_pii(&text);
        }
        self.metrics.incr("turns_completed_total", 1);
        Ok(OrchestratorResponse {
            conversation_id: conversation_id.to_string(),
            response: text,
            tool_calls: Vec::new(),
            mode: "chat",
            llm_used: Some(chat_result.model_used),
            model_used: Some(chat_result.model_name),
            success: output_check.allowed,
            action_id: None,
        })
    }
}

/// Free function (not a method) so the workflow-step executor closure and
/// the top-level single-tool path share one retry/backoff/health-ping
/// implementation without cloning `&self`.
async fn dispatch_with_retry_inner(
    tools: &ToolRegistry,
    tool_ctx: &ToolContext,
    audit: &AuditLogger,
    metrics: &Metrics,
    tool_name: &str,
    arguments: serde_json::Value,
    conversation_id: &str,
    trace_id: &str,
) -> Result<crate::tools::ToolOutput> {
    let mut attempt: u32 = 0;
    loop {
        let call = DispatchContext {
            trace_id: trace_id.to_string(),
            conversation_id: conversation_id.to_string(),
            deadline: tokio::time::Instant::now() + PER_TOOL_TIMEOUT,
        };

        let attempt_result = tokio::time::timeout(
            PER_TOOL_TIMEOUT,
            tools.dispatch(tool_name, arguments.clone(), &call, tool_ctx, audit, metrics),
        )
        .await;

        let outcome = match attempt_result {
            Ok(inner) => inner,
            Err(_) => Err(AgentError::Timeout(format!("'{tool_name}' exceeded {PER_TOOL_TIMEOUT:?}"))),
        };

        match outcome {
            Ok(output) => return Ok(output),
            Err(e) if attempt < MAX_RETRIES && is_retryable_for_orchestrator(&e) => {
                attempt += 1;
                warn!(tool = tool_name, attempt, error = %e, "tool call failed, checking health before retry");
                if !health_ping(tools, tool_ctx).await {
                    return Err(AgentError::ServiceUnavailable(format!(
                        "'{tool_name}' unavailable after failed health check"
                    )));
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Ping `check_health` with a short timeout before retrying a failed tool
/// call, so a dead backend fails fast instead of burning the full retry
/// budget. No teacher precedent for this exists; grounded directly on
/// `SPEC_FULL.md`'s orchestrator retry section.
async fn health_ping(tools: &ToolRegistry, ctx: &ToolContext) -> bool {
    if tools.get("check_health").is_none() {
        return true;
    }
    matches!(
        tokio::time::timeout(HEALTH_PING_TIMEOUT, tools.execute("check_health", serde_json::json!({}), ctx)).await,
        Ok(Ok(output)) if output.success
    )
}

fn is_affirmative(message: &str) -> bool {
    let lower = message.trim().to_lowercase();
    matches!(lower.as_str(), "yes" | "y" | "confirm" | "confirmed" | "ok" | "okay" | "approve" | "do it" | "go ahead")
}

fn category_mode(category: IntentCategory) -> &'static str {
    match category {
        IntentCategory::Debug => "debug",
        IntentCategory::Workflow | IntentCategory::Command => "mcp",
        _ => "general",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirmative_detection() {
        assert!(is_affirmative("yes"));
        assert!(is_affirmative("  Confirm  "));
        assert!(!is_affirmative("no thanks"));
        assert!(!is_affirmative("what?"));
    }

    #[test]
    fn category_mode_maps_workflow_and_command_to_mcp() {
        assert_eq!(category_mode(IntentCategory::Workflow), "mcp");
        assert_eq!(category_mode(IntentCategory::Command), "mcp");
        assert_eq!(category_mode(IntentCategory::Query), "general");
        assert_eq!(category_mode(IntentCategory::Debug), "debug");
    }

    #[tokio::test]
    async fn health_ping_passes_when_tool_absent() {
        let registry = ToolRegistry::new();
        let tmp = std::env::temp_dir().join("agent-control-plane-orch-test");
        std::fs::create_dir_all(&tmp).unwrap();
        let ctx = ToolContext {
            sandbox: crate::security::SandboxedFs::new(tmp).unwrap(),
            http_client: reqwest::Client::new(),
        };
        assert!(health_ping(&registry, &ctx).await);
    }
}
