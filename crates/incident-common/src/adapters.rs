//! Local default adapters for the external-collaborator ports in [`crate::ports`]
//! (§6: cloud collectors, embedding/completion models, action handlers and the
//! notification transport are all out-of-scope integrations). These let the
//! process wiring stand up a runnable pipeline before any real backend is
//! configured, the way the teacher's `StandardModelEngine` falls back to a
//! local model when no remote endpoint is configured.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

use crate::error::Result;
use crate::ports::{ActionHandler, ActionOutcome, Completer, Embedder, NotificationTransport};

/// A fixed-width zero embedding. Keeps vector search well-typed without
/// requiring a real embedding backend; every pattern collides in this space,
/// so it is unsuitable for anything but local wiring smoke tests.
pub struct NoopEmbedder {
    dim: usize,
}

impl NoopEmbedder {
    pub fn new(dim: usize) -> Self {
        NoopEmbedder { dim }
    }
}

#[async_trait]
impl Embedder for NoopEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dim])
    }
}

/// A completer that always reports no informative completion. The RCA
/// cascade treats a low-confidence result as "insufficient evidence" rather
/// than failing outright, so this keeps the cascade's high-tier stage a safe
/// no-op until a real model id is configured.
pub struct NoopCompleter;

#[async_trait]
impl Completer for NoopCompleter {
    async fn complete(&self, _prompt: &str, _model_id: &str) -> Result<String> {
        Ok(String::new())
    }
}

/// Logs notifications instead of delivering them. Used until a real
/// transport (Slack, email, webhook) is wired in by the deployment.
pub struct TracingNotifier;

#[async_trait]
impl NotificationTransport for TracingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        info!(subject, body, "notification (no transport configured)");
        Ok(())
    }
}

/// An action handler that refuses every invocation. Registered for any
/// action id without a real handler so the executor's `UnknownAction`/
/// failure path stays well-defined rather than panicking.
pub struct RefusingActionHandler;

#[async_trait]
impl ActionHandler for RefusingActionHandler {
    async fn invoke(
        &self,
        _params: &HashMap<String, serde_json::Value>,
        _dry: bool,
    ) -> Result<ActionOutcome> {
        Ok(ActionOutcome {
            ok: false,
            output: None,
            error: Some("no action handler configured".to_string()),
        })
    }
}
