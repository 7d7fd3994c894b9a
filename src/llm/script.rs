//! Scripted LLM client for tests and fixture runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{LlmClient, LlmResult};

/// An [`LlmClient`] that replays scripted responses in order, then falls
/// back to a default response. Records prompts and counts calls so tests
/// can assert the no-LLM-call properties.
#[derive(Debug)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    default_response: String,
    calls: AtomicUsize,
    latency: Option<Duration>,
}

impl ScriptedClient {
    /// A client that always answers with `default_response`.
    pub fn always(default_response: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            default_response: default_response.into(),
            calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// A client that always accepts with high confidence.
    pub fn accepting() -> Self {
        Self::always(r#"{"accept": true, "confidence": 0.9, "reason": "plausible reference"}"#)
    }

    /// Queue scripted responses consumed before the default kicks in.
    pub fn with_responses<S: Into<String>>(mut self, responses: impl IntoIterator<Item = S>) -> Self {
        self.responses = Mutex::new(responses.into_iter().map(Into::into).collect());
        self
    }

    /// Add artificial per-call latency (for cancellation tests).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of generate calls served.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn generate(&self, prompt: &str) -> LlmResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(prompt.to_string());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let next = self.responses.lock().await.pop_front();
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }
}
