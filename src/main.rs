mod approval;
mod config;
mod error;
mod guards;
mod http;
mod intent;
mod llm;
mod orchestrator;
mod router;
mod security;
mod tools;
mod workflow;

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::security::SandboxedFs;
use crate::tools::{ToolContext, ToolRegistry};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    if args.iter().any(|a| a == "--default-config") {
        print!("{}", Config::default_config_contents());
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(std::path::PathBuf::from);

    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            return;
        }
    };

    info!(
        agent_name = %config.agent_name,
        bind = %format!("{}:{}", config.server.host, config.server.port),
        "agent control plane starting"
    );

    let data_dir = Config::data_dir();
    let sandbox_root = if config.security.sandbox_root.is_empty() {
        data_dir.join("sandbox")
    } else {
        std::path::PathBuf::from(&config.security.sandbox_root)
    };
    let sandbox = match SandboxedFs::new(sandbox_root) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to initialize sandbox: {e}");
            return;
        }
    };
    info!(root = %sandbox.root().display(), "sandbox initialized");

    if std::env::var("NO_JAIL").as_deref() == Ok("1") || !config.security.apply_landlock {
        info!("landlock sandbox skipped");
    } else {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| std::path::PathBuf::from(".config"))
            .join("agent-control-plane");
        match crate::security::apply_landlock(&data_dir, &config_dir) {
            Ok(()) => {}
            Err(e) => tracing::warn!("landlock sandbox not applied: {e}"),
        }
    }

    if args.iter().any(|a| a == "--check") {
        run_checks(&config, &sandbox).await;
        return;
    }

    let logs_dir = data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        error!("failed to create log directory: {e}");
        return;
    }

    let tool_ctx = Arc::new(ToolContext { sandbox, http_client: reqwest::Client::new() });
    let tool_registry = Arc::new(build_tool_registry(&config));
    info!(tools = tool_registry.len(), "tool registry initialized");

    let llm = Arc::new(llm::adapter::DualModelAdapter::new(&config));
    let audit = Arc::new(security::audit::AuditLogger::new(logs_dir.join("security_audit.jsonl")));
    let metrics = Arc::new(security::audit::Metrics::new());

    let approvals_path = config.approval.persist.then(|| data_dir.join("approvals.jsonl"));
    let approvals = match approval::ApprovalQueue::new(approvals_path, config.approval.expiry_secs) {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("failed to initialize approval queue: {e}");
            return;
        }
    };

    let orchestrator = Arc::new(orchestrator::Orchestrator::new(
        &config,
        llm.clone(),
        tool_registry.clone(),
        tool_ctx.clone(),
        approvals.clone(),
        audit.clone(),
        metrics.clone(),
        &logs_dir,
    ));

    let guards = Arc::new(guards::GuardPipeline::new(&config.guards));
    let safety = Arc::new(security::policy::SafetyPolicyEngine::new(&logs_dir));

    let app_state = http::AppState {
        orchestrator,
        llm,
        tools: tool_registry,
        tool_ctx,
        guards,
        safety,
        audit,
        metrics,
        config: config.clone(),
        started_at: std::time::Instant::now(),
    };

    let router = http::build(app_state);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {bind_addr}: {e}");
            return;
        }
    };

    info!(addr = %bind_addr, "agent control plane listening");
    if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
        error!("server error: {e}");
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install ctrl_c handler");
        return;
    }
    info!("ctrl_c received, shutting down");
}

/// Build the tool registry. The spec's tool surface is intentionally
/// small: shell exec, file read/write/edit/patch, process management,
/// web search/fetch, and the read-only query tools the orchestrator's
/// health-ping and `/chat/status` rely on.
fn build_tool_registry(config: &Config) -> ToolRegistry {
    use crate::tools::*;

    let mut registry = ToolRegistry::new();

    registry.register(Box::new(exec::ExecTool::new(config.llm.timeout_secs.max(30))));
    registry.register(Box::new(file::ReadFileTool));
    registry.register(Box::new(file::WriteFileTool));
    registry.register(Box::new(file::EditFileTool));
    registry.register(Box::new(file::ApplyPatchTool));
    registry.register(Box::new(process::ProcessTool::new()));
    registry.register(Box::new(web::WebSearchTool::new(5)));
    registry.register(Box::new(web::WebFetchTool));
    registry.register(Box::new(query::CheckHealthTool));
    registry.register(Box::new(query::GetSystemStatusTool::new()));

    let catalogue: Vec<(String, String)> =
        registry.list().into_iter().map(|(name, desc)| (name.to_string(), desc.to_string())).collect();
    registry.register(Box::new(query::ListToolsTool::new(catalogue)));

    registry
}

async fn run_checks(config: &Config, sandbox: &SandboxedFs) {
    info!("running pre-flight checks...");
    info!("config: OK");
    info!("  agent_name: {}", config.agent_name);
    info!("  bind: {}:{}", config.server.host, config.server.port);
    info!("  sandbox_root: {}", sandbox.root().display());

    let model_dir = std::path::Path::new(&config.llm.model_dir);
    if model_dir.exists() {
        let gguf_count =
            std::fs::read_dir(model_dir).map(|rd| rd.filter_map(|e| e.ok()).filter(|e| e.path().extension().is_some_and(|ext| ext == "gguf")).count()).unwrap_or(0);
        info!("model_dir: OK ({}, {} .gguf file(s))", model_dir.display(), gguf_count);
    } else {
        error!("model_dir: NOT FOUND ({})", model_dir.display());
    }

    if config.gateway.url.is_empty() {
        info!("gateway: not configured");
    } else {
        info!("gateway: {}", config.gateway.url);
    }
}

fn print_usage() {
    println!(
        "agent-control-plane — sandboxed AI agent control plane (intent routing, safety policy, workflow engine, dual-model LLM dispatch)

USAGE:
    agent-control-plane [OPTIONS]

OPTIONS:
    --config <PATH>     Path to config file (default: ~/.config/agent-control-plane/config.toml)
    --default-config    Print default config to stdout and exit
    --check             Validate config, sandbox, and model directory, then exit
    -h, --help          Print this help message

ENVIRONMENT:
    BACKEND_HOST          Bind host (default: 127.0.0.1)
    BACKEND_PORT          Bind port (default: 9201)
    LLAMA_N_GPU_LAYERS    GPU layers to offload: auto | 0 | -1 | <int>
    LLAMA_CONTEXT         Context window size in tokens (default: 4096)
    LLAMA_THREADS         Inference threads (default: 8)
    MEDIA_TRACKING_ONLY   \"true\" to log media tool calls without dispatching them
    GATEWAY_URL           Upstream gateway base URL
    USE_GATEWAY_PROXY     \"true\" to route tool calls through the gateway proxy
    NO_JAIL               Set to \"1\" to skip the landlock filesystem sandbox
    RUST_LOG              Tracing filter (default: info)
"
    );
}
