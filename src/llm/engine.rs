//! Thin wrapper around a single loaded GGUF model, feature-gated behind
//! `local` since `llama-gguf` pulls in a heavyweight native build.

#[cfg(feature = "local")]
mod imp {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use llama_gguf::{ChatEngine, Engine, EngineConfig};
    use tracing::info;

    use crate::error::{AgentError, Result};

    /// One loaded GGUF model (either the talker or the worker tier).
    pub struct ModelSlot {
        chat: Arc<Mutex<Option<ChatEngine>>>,
        path: PathBuf,
        n_gpu_layers: i32,
        context_tokens: usize,
        threads: usize,
        temperature: f32,
        max_tokens: usize,
    }

    impl ModelSlot {
        pub fn new(
            path: PathBuf,
            n_gpu_layers: i32,
            context_tokens: usize,
            threads: usize,
            temperature: f32,
            max_tokens: usize,
        ) -> Self {
            Self {
                chat: Arc::new(Mutex::new(None)),
                path,
                n_gpu_layers,
                context_tokens,
                threads,
                temperature,
                max_tokens,
            }
        }

        pub fn path(&self) -> &PathBuf {
            &self.path
        }

        pub fn is_loaded(&self) -> bool {
            self.chat.lock().unwrap().is_some()
        }

        /// Lazily load the model on first use.
        pub fn load(&self) -> Result<()> {
            let mut guard = self.chat.lock().unwrap();
            if guard.is_some() {
                return Ok(());
            }
            info!(model = %self.path.display(), "loading GGUF model");
            if self.context_tokens > 0 {
                info!(
                    context_tokens = self.context_tokens,
                    threads = self.threads,
                    "context/thread overrides requested (applied at model level if supported)"
                );
            }
            let config = EngineConfig {
                model_path: self.path.to_string_lossy().to_string(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                use_gpu: self.n_gpu_layers > 0,
                ..Default::default()
            };
            let engine = Engine::load(config)
                .map_err(|e| AgentError::LlmUnavailable(format!("failed to load {}: {e}", self.path.display())))?;
            *guard = Some(ChatEngine::new(engine, None));
            Ok(())
        }

        pub fn unload(&self) {
            *self.chat.lock().unwrap() = None;
        }

        /// Run one chat turn on the blocking thread pool.
        pub async fn chat(&self, prompt: String) -> Result<String> {
            self.load()?;
            let slot_path = self.path.clone();
            let chat_mutex = Arc::clone(&self.chat);
            tokio::task::spawn_blocking(move || {
                let mut guard = chat_mutex.lock().unwrap();
                let engine = guard
                    .as_mut()
                    .ok_or_else(|| AgentError::LlmUnavailable("model not loaded".into()))?;
                engine
                    .chat(&prompt)
                    .map_err(|e| AgentError::LlmUnavailable(format!("inference failed ({}): {e}", slot_path.display())))
            })
            .await
            .map_err(|e| AgentError::Internal(format!("blocking task join error: {e}")))?
        }
    }
}

#[cfg(not(feature = "local"))]
mod imp {
    use std::path::PathBuf;

    use crate::error::{AgentError, Result};

    /// Stub used when the crate is compiled without the `local` feature.
    /// Every call fails with `LlmUnavailable` so callers degrade the same
    /// way they would if no GGUF files were found on disk.
    pub struct ModelSlot {
        path: PathBuf,
    }

    impl ModelSlot {
        pub fn new(
            path: PathBuf,
            _n_gpu_layers: i32,
            _context_tokens: usize,
            _threads: usize,
            _temperature: f32,
            _max_tokens: usize,
        ) -> Self {
            Self { path }
        }

        pub fn path(&self) -> &PathBuf {
            &self.path
        }

        pub fn is_loaded(&self) -> bool {
            false
        }

        pub fn load(&self) -> Result<()> {
            Err(AgentError::LlmUnavailable(
                "compiled without the `local` feature; no GGUF backend available".into(),
            ))
        }

        pub fn unload(&self) {}

        pub async fn chat(&self, _prompt: String) -> Result<String> {
            self.load()
        }
    }
}

pub use imp::ModelSlot;
