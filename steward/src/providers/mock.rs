//! Scripted provider for testing.
//!
//! Returns a predefined sequence of responses and records every request
//! it receives, so tests can assert on the exact prompts the runtime
//! built. No network, no clocks.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::chat::{ChatRequest, ChatResponse, Provider};
use crate::error::ProviderError;

/// A scripted provider that replays canned responses in order.
///
/// Once the script is exhausted the last response is repeated, which keeps
/// multi-phase flows (commit, execute, assessment) easy to script without
/// counting every call.
pub struct MockProvider {
    name: String,
    responses: Vec<ChatResponse>,
    cursor: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
    fail_with: Option<String>,
}

impl MockProvider {
    /// Create a mock that replays the given responses in order.
    #[must_use]
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            name: "mock".to_string(),
            responses,
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    /// Create a mock that replays plain text responses.
    #[must_use]
    pub fn with_texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| ChatResponse::text(*t)).collect())
    }

    /// Create a mock whose every call fails with the given message.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            name: "mock".to_string(),
            responses: Vec::new(),
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    /// Set the provider name reported in logs.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of chat calls received so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Snapshot of every request received, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test-only type).
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("mock lock poisoned").clone()
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.name)
            .field("scripted", &self.responses.len())
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests
            .lock()
            .map_err(|_| ProviderError::request("mock lock poisoned"))?
            .push(request.clone());

        let index = self.cursor.fetch_add(1, Ordering::SeqCst);

        if let Some(ref message) = self.fail_with {
            return Err(ProviderError::request(message.clone()));
        }

        let response = match self.responses.get(index) {
            Some(r) => r.clone(),
            None => self
                .responses
                .last()
                .cloned()
                .ok_or_else(|| ProviderError::Malformed("mock has no responses".to_string()))?,
        };
        Ok(response)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
