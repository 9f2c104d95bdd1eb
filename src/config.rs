use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub guards: GuardsConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

// -- HTTP surface ----------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host, overridable with `BACKEND_HOST`.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port, overridable with `BACKEND_PORT`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Max concurrent in-flight chat requests (HTTP semaphore cap).
    #[serde(default = "default_max_concurrent_chats")]
    pub max_concurrent_chats: usize,
}

// -- LLM: dual-tier talker/worker model ------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Directory scanned for `*.gguf` model files.
    #[serde(default = "default_model_dir")]
    pub model_dir: String,

    /// Explicit talker model filename override.
    #[serde(default)]
    pub talker_model: String,

    /// Explicit worker model filename override.
    #[serde(default)]
    pub worker_model: String,

    /// GPU layers to offload; overridable with `LLAMA_N_GPU_LAYERS`.
    /// 0 disables GPU offload.
    #[serde(default)]
    pub n_gpu_layers: i32,

    /// Context window size in tokens; overridable with `LLAMA_CONTEXT`.
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,

    /// Inference threads; overridable with `LLAMA_THREADS`.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Reserve this many tokens of the context window for the response,
    /// truncating oldest non-pinned history to stay under budget.
    #[serde(default = "default_reserved_tokens")]
    pub reserved_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// LLM call timeout in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

// -- Security / sandbox -----------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Root directory the file sandbox is jailed to.
    #[serde(default)]
    pub sandbox_root: String,

    /// Apply Linux landlock filesystem sandboxing at startup.
    /// Skippable via the `NO_JAIL=1` environment variable.
    #[serde(default = "default_true")]
    pub apply_landlock: bool,

    /// Per-tool-call rate limits, per minute / per hour (0 = unlimited).
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    #[serde(default = "default_rate_limit_per_hour")]
    pub rate_limit_per_hour: u32,
}

// -- Approval queue ---------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// How long a pending approval stays valid before `expire_sweep` drops it.
    #[serde(default = "default_approval_expiry_secs")]
    pub expiry_secs: u64,

    /// Persist the pending/approved queue as a JSONL write-ahead log under
    /// the data directory so it survives restarts.
    #[serde(default = "default_true")]
    pub persist: bool,
}

// -- Guard pipeline ----------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GuardsConfig {
    /// Whether the schema validator guard hard-fails on violation
    /// (`true`) or degrades to a warning (`false`), mirroring the
    /// "library unavailable" soft-degrade behavior of the original.
    #[serde(default)]
    pub schema_strict: bool,

    #[serde(default = "default_true")]
    pub hallucination_checker_enabled: bool,

    #[serde(default = "default_true")]
    pub honesty_policy_enabled: bool,
}

// -- Media / home-automation gateway clients ---------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MediaConfig {
    #[serde(default)]
    pub base_url: String,

    /// When true, media tool calls are logged but never actually dispatched
    /// downstream. Formerly a process-wide `TRACKING_ONLY_MODE` global.
    #[serde(default)]
    pub tracking_only: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub use_gateway_proxy: bool,
}

// -- Defaults ----------------------------------------------------------------

fn default_agent_name() -> String {
    "agent-control-plane".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9201
}
fn default_max_concurrent_chats() -> usize {
    16
}
fn default_model_dir() -> String {
    "models".to_string()
}
fn default_context_tokens() -> usize {
    4096
}
fn default_threads() -> usize {
    4
}
fn default_reserved_tokens() -> usize {
    1500
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> usize {
    1024
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_rate_limit_per_minute() -> u32 {
    30
}
fn default_rate_limit_per_hour() -> u32 {
    300
}
fn default_approval_expiry_secs() -> u64 {
    3600
}

// -- Default impls ------------------------------------------------------------

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_chats: default_max_concurrent_chats(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            talker_model: String::new(),
            worker_model: String::new(),
            n_gpu_layers: 0,
            context_tokens: default_context_tokens(),
            threads: default_threads(),
            reserved_tokens: default_reserved_tokens(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            sandbox_root: String::new(),
            apply_landlock: true,
            rate_limit_per_minute: default_rate_limit_per_minute(),
            rate_limit_per_hour: default_rate_limit_per_hour(),
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_approval_expiry_secs(),
            persist: true,
        }
    }
}

impl Default for GuardsConfig {
    fn default() -> Self {
        Self {
            schema_strict: false,
            hallucination_checker_enabled: true,
            honesty_policy_enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            security: SecurityConfig::default(),
            approval: ApprovalConfig::default(),
            guards: GuardsConfig::default(),
            media: MediaConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

// -- Config impl ---------------------------------------------------------

impl Config {
    /// Load config from the given path, or the default XDG config location.
    /// Falls back to `Config::default()` when the file doesn't exist, then
    /// applies environment variable overrides for deployment knobs.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let mut config = if config_path.exists() {
            info!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)
                .map_err(|e| AgentError::Config(format!("parse error: {e}")))?
        } else {
            info!("no config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BACKEND_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("BACKEND_PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("LLAMA_N_GPU_LAYERS") {
            if let Ok(n) = v.parse() {
                self.llm.n_gpu_layers = n;
            }
        }
        if let Ok(v) = std::env::var("LLAMA_CONTEXT") {
            if let Ok(n) = v.parse() {
                self.llm.context_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("LLAMA_THREADS") {
            if let Ok(n) = v.parse() {
                self.llm.threads = n;
            }
        }
        if let Ok(v) = std::env::var("MEDIA_TRACKING_ONLY") {
            self.media.tracking_only = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("GATEWAY_URL") {
            self.gateway.url = v;
        }
        if let Ok(v) = std::env::var("USE_GATEWAY_PROXY") {
            self.gateway.use_gateway_proxy = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    /// Returns the default config file path: `$XDG_CONFIG_HOME/agent-control-plane/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("agent-control-plane")
            .join("config.toml")
    }

    /// Returns the data directory: `$XDG_DATA_HOME/agent-control-plane/`
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("agent-control-plane")
    }

    /// Generate the default config file contents.
    pub fn default_config_contents() -> &'static str {
        include_str!("../config.example.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 9201);
        assert_eq!(config.llm.reserved_tokens, 1500);
        assert_eq!(config.approval.expiry_secs, 3600);
        assert!(!config.guards.schema_strict);
    }

    #[test]
    fn load_missing_file_falls_back_to_default() {
        let config = Config::load(Some(Path::new("/nonexistent/path/config.toml"))).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn load_parses_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "agent_name = \"custom\"\n[server]\nport = 9090\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.agent_name, "custom");
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn env_override_wins_over_file() {
        std::env::set_var("BACKEND_PORT", "7777");
        let config = Config::load(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.server.port, 7777);
        std::env::remove_var("BACKEND_PORT");
    }
}
