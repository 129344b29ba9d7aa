//! User-supplied model catalog (`models.json`).
//!
//! Custom entries route to arbitrary OpenAI-compatible endpoints and are
//! overlaid on the static registry at startup.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

fn default_context_length() -> u32 {
    200_000
}

fn default_max_completion_tokens() -> u32 {
    4_096
}

fn default_owned_by() -> String {
    "custom".to_string()
}

/// One entry of the `custom_models` array. `id`, `base_url` and `api_key`
/// are required; the rest fall back to defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomModel {
    pub id: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_owned_by")]
    pub owned_by: String,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
    #[serde(default, alias = "vision")]
    pub supports_vision: bool,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    custom_models: Vec<serde_json::Value>,
}

/// Load and validate custom models. Missing file or invalid JSON yields an
/// empty list; individual invalid entries are skipped with a warning.
pub fn load_custom_models(path: &Path) -> Vec<CustomModel> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read custom model catalog");
            return Vec::new();
        }
    };

    let file: CatalogFile = match serde_json::from_str(&data) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse custom model catalog");
            return Vec::new();
        }
    };

    let mut models = Vec::new();
    for (idx, raw) in file.custom_models.into_iter().enumerate() {
        match serde_json::from_value::<CustomModel>(raw) {
            Ok(model) => models.push(model),
            Err(e) => {
                warn!(index = idx, error = %e, "skipping invalid custom model entry");
            }
        }
    }

    if !models.is_empty() {
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        info!(count = models.len(), ?ids, "loaded custom models");
    }
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_catalog(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_empty_list() {
        assert!(load_custom_models(Path::new("/nonexistent/models.json")).is_empty());
    }

    #[test]
    fn valid_entries_load_with_defaults() {
        let (_dir, path) = write_catalog(
            r#"{"custom_models": [
                {"id": "llama-local", "base_url": "http://localhost:11434/v1", "api_key": "none"}
            ]}"#,
        );
        let models = load_custom_models(&path);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "llama-local");
        assert_eq!(models[0].context_length, 200_000);
        assert_eq!(models[0].max_completion_tokens, 4_096);
        assert_eq!(models[0].owned_by, "custom");
    }

    #[test]
    fn entries_missing_required_fields_are_skipped() {
        let (_dir, path) = write_catalog(
            r#"{"custom_models": [
                {"id": "no-url", "api_key": "k"},
                {"id": "ok", "base_url": "https://api.example.com/v1", "api_key": "k"}
            ]}"#,
        );
        let models = load_custom_models(&path);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "ok");
    }

    #[test]
    fn invalid_json_yields_empty_list() {
        let (_dir, path) = write_catalog("{not json");
        assert!(load_custom_models(&path).is_empty());
    }
}
