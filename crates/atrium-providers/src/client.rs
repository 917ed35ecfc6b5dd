use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Invocation parameters for a single completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 150,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Worth retrying, or falling back: rate limits, connection resets.
    #[error("transient model error: {0}")]
    Transient(String),
    /// The call exceeded its deadline.
    #[error("model invocation timed out")]
    Timeout,
    /// Misconfiguration or a broken transport; retrying will not help.
    #[error("fatal model error: {0}")]
    Fatal(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient(_) | LlmError::Timeout)
    }
}

/// The single capability the core requires from a language model. The real
/// transport (Ollama, HTTP, …) lives outside the core and is injected.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, LlmError>;

    fn model_id(&self) -> &str {
        "unknown"
    }
}

/// Always answers with the same text. Useful for wiring tests.
pub struct StaticClient {
    model_id: String,
    reply: String,
}

impl StaticClient {
    pub fn new(model_id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl LlmClient for StaticClient {
    async fn invoke(&self, _prompt: &str, _options: &InvokeOptions) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Replays a queue of canned outcomes, one per call; exhausted queues answer
/// with a transient error so callers exercise their fallback path.
pub struct ScriptedClient {
    model_id: String,
    script: Mutex<VecDeque<Result<String, LlmError>>>,
}

impl ScriptedClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.script.lock().await.push_back(Ok(reply.into()));
    }

    pub async fn push_error(&self, error: LlmError) {
        self.script.lock().await.push_back(Err(error));
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn invoke(&self, _prompt: &str, _options: &InvokeOptions) -> Result<String, LlmError> {
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transient("script exhausted".to_string())))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Fails every call with a transient error.
pub struct FailingClient;

#[async_trait]
impl LlmClient for FailingClient {
    async fn invoke(&self, _prompt: &str, _options: &InvokeOptions) -> Result<String, LlmError> {
        Err(LlmError::Transient("model unavailable".to_string()))
    }

    fn model_id(&self) -> &str {
        "failing"
    }
}
