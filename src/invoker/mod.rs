//! Tool invokers
//!
//! The engine calls tools through the [`ToolInvoker`] trait and never knows
//! what sits behind it:
//! - `ToolRegistry`: in-process async handlers keyed by tool id
//! - `http`: tools exposed over HTTP, called with reqwest

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub mod http;

pub use http::{HttpInvokerConfig, HttpRetryConfig, HttpToolInvoker};

/// Errors raised by a tool invocation
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool failed: {0}")]
    Failed(String),

    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Capability to run a tool by id
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool_id: &str, params: &Map<String, Value>) -> Result<Value, ToolError>;
}

type ToolHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// In-process tool invoker backed by registered async handlers
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a tool id, replacing any previous one
    pub fn register<F, Fut>(&mut self, tool_id: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |params| Box::pin(handler(params)));
        self.handlers.insert(tool_id.into(), handler);
        self
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.handlers.contains_key(tool_id)
    }

    pub fn tool_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_ids())
            .finish()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, tool_id: &str, params: &Map<String, Value>) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .get(tool_id)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(tool_id.to_string()))?;
        handler(params.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registry_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", |params| async move { Ok(Value::Object(params)) });
        registry.register("fail", |_| async { Err(ToolError::Failed("declined".into())) });

        let mut params = Map::new();
        params.insert("k".to_string(), json!(1));

        let result = registry.invoke("echo", &params).await.unwrap();
        assert_eq!(result, json!({ "k": 1 }));

        let err = registry.invoke("fail", &params).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool failed: declined");

        let err = registry.invoke("missing", &params).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));

        assert_eq!(registry.tool_ids(), vec!["echo", "fail"]);
    }
}
