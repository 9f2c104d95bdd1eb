//! Handler bodies for every route in `http::build`'s router. Thin by
//! design per SPEC_FULL.md §1/§6: the intelligence/rank/embed/github/role
//! endpoints are locally-computed stand-ins matching the documented
//! response shape, not real integrations with an external service.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::{AgentError, Result};
use crate::security::policy::SafetyContext;

// -- /health, /ready ---------------------------------------------------------

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let start = std::time::Instant::now();
    let ml_models = json!({
        "talker": state.llm.is_model_available("talker"),
        "worker": state.llm.is_model_available("worker"),
    });
    let integrations = json!({
        "gateway": !state.config.gateway.url.is_empty(),
        "tools_registered": state.tools.len(),
    });
    Json(json!({
        "ok": true,
        "status": "healthy",
        "latency_ms": start.elapsed().as_secs_f64() * 1000.0,
        "ml_models": ml_models,
        "integrations": integrations,
    }))
}

pub async fn ready() -> Json<Value> {
    Json(json!({"ready": true, "timestamp": chrono::Utc::now().to_rfc3339()}))
}

// -- /chat/send ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatSendRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub mode: Option<String>,
}

pub async fn chat_send(
    State(state): State<AppState>,
    Json(req): Json<ChatSendRequest>,
) -> Result<Json<Value>> {
    if req.message.trim().is_empty() {
        return Err(AgentError::BadRequest("message must not be empty".into()));
    }
    let conversation_id = req.conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let response = state.orchestrator.handle_message(&conversation_id, &req.message).await?;
    Ok(Json(serde_json::to_value(response)?))
}

// -- /chat/status ---------------------------------------------------------------

pub async fn chat_status(State(state): State<AppState>) -> Json<Value> {
    let llm = json!({
        "talker_available": state.llm.is_model_available("talker"),
        "worker_available": state.llm.is_model_available("worker"),
    });
    let tools_available: Vec<&str> = state.tools.list().into_iter().map(|(name, _)| name).collect();
    Json(json!({
        "llm": llm,
        "tools_available": tools_available,
        "conversations_active": state.orchestrator.active_conversations().await,
        "backend_url": state.config.gateway.url,
    }))
}

// -- /command ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

pub async fn command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<Value>> {
    if req.command.trim().is_empty() {
        return Err(AgentError::BadRequest("command must not be empty".into()));
    }
    let tool = state.tools.get("exec").ok_or_else(|| AgentError::ToolNotFound("exec".into()))?;
    let output = tool.execute(json!({"command": req.command}), &state.tool_ctx).await?;
    let exit_code = output
        .metadata
        .as_ref()
        .and_then(|m| m.get("exit_code"))
        .and_then(|v| v.as_i64())
        .unwrap_or(if output.success { 0 } else { -1 });

    Ok(Json(json!({
        "result": {
            "output": output.output,
            "stdout": output.output,
            "stderr": "",
            "exit_code": exit_code,
        },
        "command": req.command,
        "success": output.success,
    })))
}

// -- /ai/intelligence/emotion/analyze ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EmotionRequest {
    pub text: String,
}

const POSITIVE_WORDS: &[&str] = &["great", "happy", "love", "good", "thanks", "awesome", "glad"];
const NEGATIVE_WORDS: &[&str] = &["angry", "sad", "hate", "bad", "terrible", "frustrated", "upset"];

pub async fn emotion_analyze(Json(req): Json<EmotionRequest>) -> Result<Json<Value>> {
    if req.text.trim().is_empty() {
        return Err(AgentError::BadRequest("text must not be empty".into()));
    }
    let lower = req.text.to_lowercase();
    let positive = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let negative = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();

    let (emotion, mood, confidence) = match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => ("positive", "upbeat", 0.6 + 0.1 * positive.min(3) as f64),
        std::cmp::Ordering::Less => ("negative", "strained", 0.6 + 0.1 * negative.min(3) as f64),
        std::cmp::Ordering::Equal if positive > 0 => ("mixed", "ambivalent", 0.5),
        _ => ("neutral", "even", 0.5),
    };

    Ok(Json(json!({
        "text": req.text,
        "emotion": emotion,
        "mood": mood,
        "confidence": confidence,
        "source": "local-lexicon",
        "model": "keyword-heuristic-v1",
    })))
}

// -- /ai/intelligence/ultra/rank ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RankCandidate {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct RankRequest {
    pub query: String,
    pub candidates: Vec<RankCandidate>,
}

fn overlap_score(query: &str, text: &str) -> f64 {
    let query_words: std::collections::HashSet<&str> = query.to_lowercase().split_whitespace().collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let text_words: std::collections::HashSet<&str> = text_lower.split_whitespace().collect();
    let hits = query_words.intersection(&text_words).count();
    hits as f64 / query_words.len() as f64
}

pub async fn ultra_rank(Json(req): Json<RankRequest>) -> Result<Json<Value>> {
    if req.query.trim().is_empty() {
        return Err(AgentError::BadRequest("query must not be empty".into()));
    }
    let mut ranked: Vec<Value> = req
        .candidates
        .iter()
        .map(|c| {
            let score = overlap_score(&req.query, &c.text);
            json!({"candidate": {"id": c.id, "text": c.text}, "score": score})
        })
        .collect();
    ranked.sort_by(|a, b| {
        b["score"].as_f64().unwrap_or(0.0).partial_cmp(&a["score"].as_f64().unwrap_or(0.0)).unwrap()
    });

    Ok(Json(json!({
        "ranked": ranked,
        "query": req.query,
        "total": req.candidates.len(),
        "source": "local-overlap-ranker",
        "model": "lexical-overlap-v1",
    })))
}

// -- /embed ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
}

const EMBED_DIMENSIONS: usize = 64;

/// Deterministic bag-of-hashed-tokens embedding. Not a real model — a
/// locally-computed stand-in matching the documented response shape
/// (§1's explicit out-of-scope list excludes real embedding models).
fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; EMBED_DIMENSIONS];
    for token in text.split_whitespace() {
        let mut hash: u64 = 1469598103934665603;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        vector[(hash as usize) % EMBED_DIMENSIONS] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

pub async fn embed(Json(req): Json<EmbedRequest>) -> Result<Json<Value>> {
    if req.text.trim().is_empty() {
        return Err(AgentError::BadRequest("text must not be empty".into()));
    }
    Ok(Json(json!({
        "embedding": hashed_embedding(&req.text),
        "model": "hashed-bow-v1",
        "dimensions": EMBED_DIMENSIONS,
        "source": "local",
    })))
}

// -- /github/repos ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GithubReposQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Out of scope per §1 ("device adapters... GitHub REST — interfaces
/// only"): this returns an empty, correctly-shaped page rather than
/// reaching out to the real GitHub API.
pub async fn github_repos(Query(q): Query<GithubReposQuery>) -> Json<Value> {
    let limit = q.limit.unwrap_or(10);
    Json(json!({"repos": Vec::<Value>::new(), "total": 0, "source": "github-rest-unconfigured", "limit": limit}))
}

// -- /roles/guards/check ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GuardsCheckRequest {
    pub text: String,
    #[serde(default)]
    pub guards: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub context: Value,
}

pub async fn roles_guards_check(
    State(state): State<AppState>,
    Json(req): Json<GuardsCheckRequest>,
) -> Result<Json<Value>> {
    if req.text.trim().is_empty() {
        return Err(AgentError::BadRequest("text must not be empty".into()));
    }
    let report = state.guards.run(&req.text, None);
    Ok(Json(json!({
        "passed": report.passed,
        "guards": req.guards,
        "text_length": req.text.len(),
        "warnings": report.warnings,
    })))
}

// -- /roles/active ---------------------------------------------------------------

const ACTIVE_ROLES: &[&str] = &["safe", "caution", "restricted", "dangerous", "forbidden"];

pub async fn roles_active() -> Json<Value> {
    Json(json!({
        "roles": ACTIVE_ROLES,
        "count": ACTIVE_ROLES.len(),
        "version": env!("CARGO_PKG_VERSION"),
        "loaded_at": chrono::Utc::now().to_rfc3339(),
    }))
}

// -- /roles/evaluate ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RoleEvaluateRequest {
    pub role: String,
    pub action: String,
    #[serde(default)]
    pub context: Value,
}

fn risk_score(level: crate::security::policy::SafetyLevel) -> f64 {
    use crate::security::policy::SafetyLevel::*;
    match level {
        Safe => 0.0,
        Caution => 0.25,
        Restricted => 0.5,
        Dangerous => 0.75,
        Forbidden => 1.0,
    }
}

pub async fn roles_evaluate(
    State(state): State<AppState>,
    Json(req): Json<RoleEvaluateRequest>,
) -> Result<Json<Value>> {
    if req.action.trim().is_empty() {
        return Err(AgentError::BadRequest("action must not be empty".into()));
    }
    let check = state.safety.check_safety(&req.action, &req.context, "", &SafetyContext::default());
    Ok(Json(json!({
        "role": req.role,
        "action": req.action,
        "allowed": check.allowed,
        "reason": check.message,
        "risk_score": risk_score(check.level),
        "level": check.level.as_str(),
        "requires_confirmation": check.requires_confirmation,
        "requires_approval": check.requires_approval,
    })))
}
