//! HTTP tool invoker
//!
//! Calls `POST {base_url}/tools/{toolId}` with the step params as the JSON
//! body and returns the JSON response body as the tool result. Supports:
//! - Default headers
//! - Request timeout
//! - Retry with exponential backoff on configured status codes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ToolError, ToolInvoker};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpInvokerConfig {
    /// Base URL of the tool service (e.g., "http://localhost:8080")
    pub base_url: String,

    /// Headers included in every request
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_http_timeout")]
    pub timeout_ms: u64,

    /// Retry configuration for failed requests
    #[serde(default)]
    pub retry: Option<HttpRetryConfig>,
}

fn default_http_timeout() -> u64 {
    30000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRetryConfig {
    /// Maximum number of attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between attempts in milliseconds
    #[serde(default = "default_retry_initial_delay")]
    pub initial_delay: u64,

    /// Maximum delay between attempts in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub max_delay: u64,

    /// HTTP status codes that should trigger a retry
    #[serde(default = "default_retry_status_codes")]
    pub retry_on_status: Vec<u16>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay() -> u64 {
    1000
}

fn default_retry_max_delay() -> u64 {
    10000
}

fn default_retry_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

#[derive(Debug)]
pub struct HttpToolInvoker {
    config: HttpInvokerConfig,
    client: reqwest::Client,
}

impl HttpToolInvoker {
    pub fn new(config: HttpInvokerConfig) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn from_config(config: &HttpInvokerConfig) -> Result<Self, ToolError> {
        Self::new(config.clone())
    }

    fn build_url(&self, tool_id: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{}/tools/{}", base, tool_id)
    }

    fn max_attempts(&self) -> u32 {
        self.config
            .retry
            .as_ref()
            .map(|r| r.max_attempts.max(1))
            .unwrap_or(1)
    }

    fn should_retry(&self, status: u16, attempt: u32) -> bool {
        match &self.config.retry {
            Some(retry) => attempt + 1 < self.max_attempts() && retry.retry_on_status.contains(&status),
            None => false,
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        match &self.config.retry {
            Some(retry) => {
                let delay = retry
                    .initial_delay
                    .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
                Duration::from_millis(delay.min(retry.max_delay))
            }
            None => Duration::from_millis(1000),
        }
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(&self, tool_id: &str, params: &Map<String, Value>) -> Result<Value, ToolError> {
        let url = self.build_url(tool_id);
        let max_attempts = self.max_attempts();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.retry_delay(attempt);
                warn!(
                    tool = %tool_id,
                    "Retrying tool call (attempt {}/{}) after {:?}",
                    attempt + 1,
                    max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&url).json(params);
            for (key, value) in &self.config.headers {
                request = request.header(key, value);
            }

            debug!("Invoking tool {} at {}", tool_id, url);

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(ToolError::Transport(e.to_string()));
                    if e.is_timeout() || e.is_connect() {
                        if attempt + 1 < max_attempts {
                            continue;
                        }
                    }
                    break;
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                let body = response
                    .text()
                    .await
                    .map_err(|e| ToolError::Transport(e.to_string()))?;
                if body.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return Ok(serde_json::from_str(&body)
                    .unwrap_or_else(|_| Value::String(body)));
            }

            let message = response.text().await.unwrap_or_default();
            last_error = Some(ToolError::Http { status, message });

            if !self.should_retry(status, attempt) {
                break;
            }
        }

        Err(last_error.unwrap_or_else(|| ToolError::Transport("no attempt made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(retry: Option<HttpRetryConfig>) -> HttpInvokerConfig {
        HttpInvokerConfig {
            base_url: "http://localhost:9999/".to_string(),
            headers: HashMap::new(),
            timeout_ms: 1000,
            retry,
        }
    }

    #[test]
    fn test_build_url() {
        let invoker = HttpToolInvoker::new(config(None)).unwrap();
        assert_eq!(
            invoker.build_url("payments.charge"),
            "http://localhost:9999/tools/payments.charge"
        );
    }

    #[test]
    fn test_retry_policy() {
        let retry: HttpRetryConfig = serde_yaml::from_str("max_attempts: 3").unwrap();
        let invoker = HttpToolInvoker::new(config(Some(retry))).unwrap();

        assert!(invoker.should_retry(503, 0));
        assert!(invoker.should_retry(503, 1));
        assert!(!invoker.should_retry(503, 2));
        assert!(!invoker.should_retry(400, 0));

        assert_eq!(invoker.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(invoker.retry_delay(2), Duration::from_millis(2000));
        assert_eq!(invoker.retry_delay(10), Duration::from_millis(10000));
    }

    #[test]
    fn test_no_retry_without_config() {
        let invoker = HttpToolInvoker::new(config(None)).unwrap();
        assert_eq!(invoker.max_attempts(), 1);
        assert!(!invoker.should_retry(503, 0));
    }
}
