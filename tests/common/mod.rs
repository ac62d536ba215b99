#![allow(dead_code)]

use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_workflow(dir: &Path, filename: &str, content: &str) {
    fs::write(dir.join(filename), content).expect("Failed to write workflow file");
}

pub fn write_engine_config(dir: &Path, content: &str) {
    fs::write(dir.join("toolflow.yaml"), content).expect("Failed to write toolflow.yaml");
}

/// Two steps, `second` depends on `first`
pub fn simple_workflow(id: &str) -> String {
    format!(
        r#"
id: {}
steps:
  - id: first
    type: tool_code
    toolId: orders.create
  - id: second
    type: tool_code
    toolId: payments.charge
    dependencies: [first]
"#,
        id
    )
}

/// Condition on `${{amount}}` branching to `large` or `small`
pub fn branching_workflow(id: &str) -> String {
    format!(
        r#"
id: {}
steps:
  - id: check
    type: condition
    expression: "${{amount}} > 100"
    onTrue: large
    onFalse: small
  - id: large
    type: tool_code
    toolId: review.manual
  - id: small
    type: tool_code
    toolId: payments.charge
"#,
        id
    )
}

pub fn cyclic_workflow(id: &str) -> String {
    format!(
        r#"
id: {}
steps:
  - id: a
    type: tool_code
    toolId: t
    dependencies: [b]
  - id: b
    type: tool_code
    toolId: t
    dependencies: [a]
"#,
        id
    )
}

/// Mocks for every tool used by the workflows above
pub fn mock_config() -> &'static str {
    r#"
mode: mock
mocks:
  orders.create:
    result: { id: ord_1 }
  payments.charge:
    result: { status: paid }
  review.manual:
    result: { queued: true }
"#
}

pub fn failing_mock_config() -> &'static str {
    r#"
mode: mock
mocks:
  orders.create:
    error: "database unavailable"
  payments.charge:
    result: { status: paid }
"#
}
