//! Dual-tier LLM adapter: a fast "talker" model handles most requests, a
//! slower "worker" model is selected for requests whose phrasing implies
//! heavier reasoning (code, multi-step instructions, analysis).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::llm::engine::ModelSlot;
use crate::llm::prompts;

const TALKER_MODELS: &[&str] = &[
    "Phi-3-mini-4k-instruct-q4.gguf",
    "phi-3-mini-4k-instruct-q4_k_s.gguf",
    "phi-3-mini-4k-instruct-q4_k_m.gguf",
];

const WORKER_MODELS: &[&str] = &[
    "qwen2.5-3b-instruct-q4_k_m.gguf",
    "Qwen2.5-3B-Instruct-Q4_K_M.gguf",
    "qwen2.5-coder-3b-instruct-q4_k_m.gguf",
];

static WORKER_KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "implement",
        "fix",
        "edit",
        "create",
        "write",
        "code",
        "build",
        "develop",
        "refactor",
        "debug",
        "analyze",
        "explain in detail",
        "step by step",
        "how to",
        "architecture",
        "design",
        "optimize",
        "review",
        "complex",
    ]
    .into_iter()
    .collect()
});

/// Scan `model_dir` for the first file matching the role's candidate list,
/// falling back to the combined talker+worker priority list, then to the
/// first `*.gguf` file found.
fn find_model_by_role(model_dir: &Path, role: &str) -> Option<PathBuf> {
    let candidates: &[&str] = if role == "talker" { TALKER_MODELS } else { WORKER_MODELS };
    for name in candidates {
        let path = model_dir.join(name);
        if path.exists() {
            return Some(path);
        }
    }
    for name in TALKER_MODELS.iter().chain(WORKER_MODELS.iter()) {
        let path = model_dir.join(name);
        if path.exists() {
            return Some(path);
        }
    }
    std::fs::read_dir(model_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "gguf"))
}

/// Detect GPU offload layers: explicit config/env override wins, otherwise
/// default to CPU-only (0). Real hardware probing (nvidia-smi, CUDA device
/// queries) is the caller's responsibility via `LLAMA_N_GPU_LAYERS`; this
/// function only resolves the already-merged config value.
fn resolve_gpu_layers(config: &Config) -> i32 {
    config.llm.n_gpu_layers
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub role: &'static str,
    pub path: String,
    pub loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResult {
    pub content: String,
    pub model_used: &'static str,
    pub model_name: String,
    pub tool_call: Option<serde_json::Value>,
}

static TOOL_CALL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```tool_call\s*\n?(.*?)\n?```").unwrap());

fn extract_tool_call(content: &str) -> Option<serde_json::Value> {
    let captured = TOOL_CALL_FENCE.captures(content)?;
    serde_json::from_str(captured[1].trim()).ok()
}

/// Truncate history to fit `max_tokens`, estimating 4 chars/token and
/// always preserving at least the most recent message.
fn truncate_messages(messages: &[ChatMessage], max_tokens: usize) -> Vec<ChatMessage> {
    if messages.is_empty() {
        return Vec::new();
    }
    const CHARS_PER_TOKEN: usize = 4;
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
    if total_chars <= max_chars {
        return messages.to_vec();
    }

    let mut truncated: Vec<ChatMessage> = Vec::new();
    let mut current_chars = 0usize;

    for msg in messages.iter().rev() {
        let msg_chars = msg.content.len();
        if current_chars + msg_chars <= max_chars {
            truncated.insert(0, msg.clone());
            current_chars += msg_chars;
        } else if truncated.is_empty() {
            let keep_from = msg_chars.saturating_sub(max_chars.saturating_sub(100));
            let mut content = "...".to_string();
            content.push_str(&msg.content[keep_from..]);
            truncated.insert(0, ChatMessage { role: msg.role.clone(), content });
            break;
        } else {
            truncated.insert(
                0,
                ChatMessage {
                    role: "system".to_string(),
                    content: "[Earlier conversation truncated to fit context window]".to_string(),
                },
            );
            break;
        }
    }

    if truncated.len() < messages.len() {
        warn!(from = messages.len(), to = truncated.len(), "conversation truncated to fit context window");
    }
    truncated
}

/// Dual-tier LLM adapter selecting between a fast talker model and a
/// heavier worker model based on message content.
pub struct DualModelAdapter {
    talker: OnceLock<Option<ModelSlot>>,
    worker: OnceLock<Option<ModelSlot>>,
    model_dir: PathBuf,
    n_gpu_layers: i32,
    context_tokens: usize,
    threads: usize,
    temperature: f32,
    max_tokens: usize,
    reserved_tokens: usize,
}

impl DualModelAdapter {
    pub fn new(config: &Config) -> Self {
        Self {
            talker: OnceLock::new(),
            worker: OnceLock::new(),
            model_dir: PathBuf::from(&config.llm.model_dir),
            n_gpu_layers: resolve_gpu_layers(config),
            context_tokens: config.llm.context_tokens,
            threads: config.llm.threads,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            reserved_tokens: config.llm.reserved_tokens,
        }
    }

    fn slot_for(&self, role: &str) -> &Option<ModelSlot> {
        let cell = if role == "worker" { &self.worker } else { &self.talker };
        cell.get_or_init(|| {
            find_model_by_role(&self.model_dir, role).map(|path| {
                info!(role, model = %path.display(), "discovered model file");
                ModelSlot::new(
                    path,
                    self.n_gpu_layers,
                    self.context_tokens,
                    self.threads,
                    self.temperature,
                    self.max_tokens,
                )
            })
        })
    }

    pub fn is_model_available(&self, role: &str) -> bool {
        self.slot_for(role).is_some()
    }

    pub fn get_model_info(&self, role: &str) -> Option<ModelInfo> {
        self.slot_for(role).as_ref().map(|slot| ModelInfo {
            role: if role == "worker" { "worker" } else { "talker" },
            path: slot.path().display().to_string(),
            loaded: slot.is_loaded(),
        })
    }

    pub fn load_model(&self, role: &str) -> Result<()> {
        match self.slot_for(role) {
            Some(slot) => slot.load(),
            None => Err(AgentError::LlmUnavailable(format!("no {role} model found"))),
        }
    }

    fn requires_worker(message: &str) -> bool {
        let lower = message.to_lowercase();
        WORKER_KEYWORDS.iter().any(|kw| lower.contains(kw))
    }

    /// Select a model slot for `message`, preferring the worker when the
    /// content implies heavy reasoning, falling back to whichever tier is
    /// actually available.
    fn select_model(&self, message: &str, force_worker: bool) -> Result<(&'static str, &ModelSlot)> {
        if force_worker || Self::requires_worker(message) {
            if let Some(worker) = self.slot_for("worker") {
                return Ok(("worker", worker));
            }
            warn!("worker model unavailable, falling back to talker");
        }
        if let Some(talker) = self.slot_for("talker") {
            return Ok(("talker", talker));
        }
        if let Some(worker) = self.slot_for("worker") {
            return Ok(("worker", worker));
        }
        Err(AgentError::LlmUnavailable("no LLM models available".into()))
    }

    /// Chat with automatic talker/worker routing.
    pub async fn chat(&self, messages: &[ChatMessage], mode: &str, force_worker: bool) -> Result<ChatResult> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let (role, slot) = self.select_model(last_user, force_worker)?;
        slot.load()?;

        let max_context_tokens = self.context_tokens.saturating_sub(self.reserved_tokens);
        let truncated = truncate_messages(messages, max_context_tokens);

        let mut prompt = String::new();
        prompt.push_str(&prompts::system_prompt(mode));
        prompt.push_str("\n\n");
        for msg in &truncated {
            prompt.push_str(&format!("{}: {}\n", msg.role, msg.content));
        }

        let content = slot.chat(prompt).await?;
        if content.is_empty() {
            return Err(AgentError::LlmUnavailable("model returned empty response".into()));
        }
        let tool_call = extract_tool_call(&content);

        Ok(ChatResult {
            content,
            model_used: role,
            model_name: slot.path().display().to_string(),
            tool_call,
        })
    }

    /// One-shot generation (no conversation history), used for short
    /// auxiliary calls like intent classification.
    pub async fn generate(&self, prompt: &str, force_worker: bool) -> Result<String> {
        let (_, slot) = self.select_model(prompt, force_worker)?;
        slot.load()?;
        slot.chat(prompt.to_string()).await
    }

    /// Raw prompt call on the talker tier, used by the intent classifier —
    /// it wants a short, cheap, low-temperature completion and never needs
    /// the worker.
    pub async fn classify_raw(&self, prompt: &str) -> Result<String> {
        let slot = self
            .slot_for("talker")
            .as_ref()
            .ok_or_else(|| AgentError::LlmUnavailable("no talker model available".into()))?;
        slot.load()?;
        slot.chat(prompt.to_string()).await
    }

    pub fn supports_streaming(&self) -> bool {
        false
    }

    /// Streaming is not natively supported by the blocking GGUF backend;
    /// this emits the full response as a single chunk so callers written
    /// against a streaming contract still work.
    pub async fn stream_chat(&self, messages: &[ChatMessage], mode: &str) -> Result<Vec<String>> {
        let result = self.chat(messages, mode, false).await?;
        Ok(vec![result.content])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_worker_detects_keywords() {
        assert!(DualModelAdapter::requires_worker("please implement a new parser"));
        assert!(DualModelAdapter::requires_worker("explain in detail how this works"));
        assert!(!DualModelAdapter::requires_worker("hi there"));
    }

    #[test]
    fn truncate_keeps_last_message_when_oversized() {
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: "x".repeat(10_000),
        }];
        let truncated = truncate_messages(&messages, 100);
        assert_eq!(truncated.len(), 1);
        assert!(truncated[0].content.starts_with("..."));
    }

    #[test]
    fn truncate_noop_under_budget() {
        let messages = vec![ChatMessage { role: "user".into(), content: "hi".into() }];
        let truncated = truncate_messages(&messages, 1000);
        assert_eq!(truncated.len(), 1);
        assert_eq!(truncated[0].content, "hi");
    }

    #[test]
    fn truncate_drops_oldest_first() {
        let messages: Vec<ChatMessage> = (0..10)
            .map(|i| ChatMessage { role: "user".into(), content: format!("msg-{i}-").repeat(20) })
            .collect();
        let truncated = truncate_messages(&messages, 50);
        assert!(truncated.len() < messages.len());
        assert!(truncated.last().unwrap().content.contains("msg-9"));
    }

    #[test]
    fn extract_tool_call_parses_fenced_json() {
        let content = "sure\n```tool_call\n{\"tool\": \"web_search\", \"params\": {}}\n```\n";
        let call = extract_tool_call(content).unwrap();
        assert_eq!(call["tool"], "web_search");
    }

    #[test]
    fn extract_tool_call_none_when_absent() {
        assert!(extract_tool_call("just a normal reply").is_none());
    }

    #[test]
    fn find_model_by_role_prefers_role_candidates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qwen2.5-3b-instruct-q4_k_m.gguf"), b"").unwrap();
        std::fs::write(dir.path().join("Phi-3-mini-4k-instruct-q4.gguf"), b"").unwrap();
        let talker = find_model_by_role(dir.path(), "talker").unwrap();
        assert!(talker.to_string_lossy().contains("Phi-3"));
        let worker = find_model_by_role(dir.path(), "worker").unwrap();
        assert!(worker.to_string_lossy().contains("qwen2.5"));
    }

    #[test]
    fn find_model_by_role_falls_back_to_any_gguf() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("custom-model.gguf"), b"").unwrap();
        let found = find_model_by_role(dir.path(), "talker").unwrap();
        assert!(found.to_string_lossy().ends_with("custom-model.gguf"));
    }
}
