use crate::session::SavedSession;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
    #[error("Navigation failed: {0}")]
    Navigation(String),
    #[error("Script evaluation failed: {0}")]
    Script(String),
    #[error("Unexpected script result: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Browser context error: {0}")]
    Context(String),
    #[error("Page already closed")]
    Closed,
}

impl PageError {
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        PageError::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// What a navigation landed on, as seen by the rate gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageState {
    pub final_url: String,
    pub title: Option<String>,
}

/// One rendered page inside an isolated browsing context.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Navigates and waits for DOM content, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<PageState, PageError>;

    /// Waits until `selector` matches at least one element.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), PageError>;

    /// Evaluates a script against the DOM and returns its JSON result.
    async fn evaluate(&self, script: &str) -> Result<Value, PageError>;

    /// Inner text of the first element matching `selector`.
    async fn text(&self, selector: &str) -> Result<Option<String>, PageError>;

    /// Inner text of every element matching `selector`, in document order.
    async fn texts(&self, selector: &str) -> Result<Vec<String>, PageError>;

    /// Attribute `name` of every element matching `selector`, in document order.
    async fn attributes(&self, selector: &str, name: &str) -> Result<Vec<String>, PageError>;

    async fn close(&self) -> Result<(), PageError>;

    /// Batched DOM query returning an array of strings.
    async fn evaluate_strings(&self, script: &str) -> Result<Vec<String>, PageError> {
        let value = self.evaluate(script).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Opens isolated browsing contexts; nothing is shared between two contexts.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_context(
        &self,
        session: Option<&SavedSession>,
    ) -> Result<Box<dyn PageSession>, PageError>;
}
