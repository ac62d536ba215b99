//! Workflow definition loader
//!
//! Load workflow definitions from `.json`, `.yaml` or `.yml` files.

use std::path::Path;

use super::WorkflowDefinition;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },

    #[error("JSON parse error in {file}: {error}")]
    Json {
        file: String,
        error: serde_json::Error,
    },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}

/// Config files that live next to workflows but are not workflows
const RESERVED_FILES: &[&str] = &["toolflow.yaml", "toolflow.yml"];

pub struct WorkflowLoader;

impl WorkflowLoader {
    /// Load every workflow file in a directory, sorted by file name
    pub fn load_directory(dir: &Path) -> Result<Vec<WorkflowDefinition>, LoadError> {
        let mut paths = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if RESERVED_FILES.contains(&filename) {
                continue;
            }

            if is_workflow_file(&path) {
                paths.push(path);
            }
        }

        paths.sort();
        paths.iter().map(|p| Self::load_file(p)).collect()
    }

    pub fn load_file(path: &Path) -> Result<WorkflowDefinition, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let file = path.display().to_string();

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|error| LoadError::Json { file, error })
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|error| LoadError::Yaml { file, error })
            }
            _ => Err(LoadError::UnsupportedFormat(file)),
        }
    }
}

fn is_workflow_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("yaml") | Some("yml")
    )
}
