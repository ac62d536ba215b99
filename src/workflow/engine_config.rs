//! Engine configuration
//!
//! Loaded from `toolflow.yaml`:
//!
//! ```yaml
//! mode: mock
//! concurrency_limit: 4
//! failure_policy: fail_run
//! step_timeout_ms: 30000
//! duplicate_workflows: overwrite
//!
//! context:
//!   currency: EUR
//!
//! mocks:
//!   payments.charge:
//!     result: { status: paid }
//!     delay_ms: 20
//!   sms.send:
//!     error: "rate limited"
//!
//! invoker:
//!   base_url: http://localhost:8080
//!   timeout_ms: 10000
//!   retry:
//!     max_attempts: 3
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::options::{DuplicatePolicy, ExecuteOptions, ExecutionMode, FailurePolicy};
use crate::engine::step_executor::MockResponse;
use crate::invoker::HttpInvokerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Overrides each workflow's own `concurrencyLimit`
    #[serde(default)]
    pub concurrency_limit: Option<usize>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Default per-step timeout; a step's `timeoutMs` takes precedence
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,

    #[serde(default)]
    pub duplicate_workflows: DuplicatePolicy,

    /// Variables merged under the caller's context
    #[serde(default)]
    pub context: Map<String, Value>,

    /// Canned tool responses for mock mode
    #[serde(default)]
    pub mocks: HashMap<String, MockResponse>,

    /// HTTP tool invoker for real mode
    #[serde(default)]
    pub invoker: Option<HttpInvokerConfig>,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, crate::workflow::LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|e| crate::workflow::LoadError::Yaml {
                file: path.display().to_string(),
                error: e,
            })?;
        Ok(config)
    }

    /// Per-run options derived from this config
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            mode: self.mode,
            concurrency_limit: self.concurrency_limit,
            failure_policy: self.failure_policy,
            step_timeout: self.step_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl From<&EngineConfig> for ExecuteOptions {
    fn from(config: &EngineConfig) -> Self {
        config.execute_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.mode, ExecutionMode::Mock);
        assert_eq!(config.failure_policy, FailurePolicy::FailRun);
        assert_eq!(config.duplicate_workflows, DuplicatePolicy::Overwrite);
        assert!(config.concurrency_limit.is_none());
        assert!(config.mocks.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: EngineConfig = serde_yaml::from_str("mode: real").unwrap();
        assert_eq!(config.mode, ExecutionMode::Real);
        assert!(config.invoker.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
mode: mock
concurrency_limit: 3
failure_policy: tolerate
step_timeout_ms: 250
duplicate_workflows: reject
context:
  currency: EUR
mocks:
  payments.charge:
    result: { status: paid }
    delay_ms: 20
  sms.send:
    error: rate limited
invoker:
  base_url: http://localhost:8080
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.concurrency_limit, Some(3));
        assert_eq!(config.failure_policy, FailurePolicy::Tolerate);
        assert_eq!(config.duplicate_workflows, DuplicatePolicy::Reject);
        assert_eq!(config.context.get("currency"), Some(&json!("EUR")));

        let charge = &config.mocks["payments.charge"];
        assert_eq!(charge.result, json!({ "status": "paid" }));
        assert_eq!(charge.delay_ms, Some(20));
        assert_eq!(config.mocks["sms.send"].error.as_deref(), Some("rate limited"));

        let options = ExecuteOptions::from(&config);
        assert_eq!(options.concurrency_limit, Some(3));
        assert_eq!(options.step_timeout, Some(Duration::from_millis(250)));

        assert_eq!(
            config.invoker.unwrap().base_url,
            "http://localhost:8080".to_string()
        );
    }
}
