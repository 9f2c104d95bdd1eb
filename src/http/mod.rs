//! HTTP surface: the spec's exact, unauthenticated route table. Grounded
//! on the teacher's `dashboard/routes.rs` for the axum router/`tower-http`
//! CORS idiom, trimmed of the dashboard UI, JWT/passkey auth layer, and
//! every route backed by a dropped subsystem (messaging, skills, trash,
//! federation, users).

mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::guards::GuardPipeline;
use crate::llm::adapter::DualModelAdapter;
use crate::orchestrator::Orchestrator;
use crate::security::audit::{AuditLogger, Metrics};
use crate::security::policy::SafetyPolicyEngine;
use crate::tools::{ToolContext, ToolRegistry};

/// Shared state for every handler. `started_at` backs `/health`'s
/// latency/uptime figures without threading a separate health-check tool
/// call through every request. `llm`/`guards`/`safety`/`tools`/`tool_ctx`
/// are held here as their own `Arc`s, separate from the copies
/// `Orchestrator` owns internally, so the diagnostic endpoints
/// (`/health`, `/roles/guards/check`, `/roles/evaluate`, `/command`) can
/// reach them directly without threading new public methods through
/// `Orchestrator`.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub llm: Arc<DualModelAdapter>,
    pub tools: Arc<ToolRegistry>,
    pub tool_ctx: Arc<ToolContext>,
    pub guards: Arc<GuardPipeline>,
    pub safety: Arc<SafetyPolicyEngine>,
    pub audit: Arc<AuditLogger>,
    pub metrics: Arc<Metrics>,
    pub config: Config,
    pub started_at: Instant,
}

/// Build the router. CORS is permissive by design (§6): any origin,
/// `GET|POST|OPTIONS`, `Content-Type`, plus the private-network preflight
/// header loopback browser clients send.
pub fn build(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .allow_private_network(true);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/chat/send", post(handlers::chat_send))
        .route("/chat/status", post(handlers::chat_status))
        .route("/command", post(handlers::command))
        .route("/ai/intelligence/emotion/analyze", post(handlers::emotion_analyze))
        .route("/ai/intelligence/ultra/rank", post(handlers::ultra_rank))
        .route("/embed", post(handlers::embed))
        .route("/github/repos", get(handlers::github_repos))
        .route("/roles/guards/check", post(handlers::roles_guards_check))
        .route("/roles/active", get(handlers::roles_active))
        .route("/roles/evaluate", post(handlers::roles_evaluate))
        .layer(cors)
        .with_state(state)
}
