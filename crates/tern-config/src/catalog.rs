// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::schema::ModelSpec;

/// The loaded model catalog: a plain list of [`ModelSpec`] entries.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    pub models: Vec<ModelSpec>,
}

impl ModelCatalog {
    /// Find a model by its catalog name.
    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }

    /// First entry, used as the default when the caller names no model.
    pub fn default_model(&self) -> Option<&ModelSpec> {
        self.models.first()
    }
}

/// Load the model catalog from a JSON file containing an array of
/// descriptors.
///
/// Duplicate names are rejected: catalog selection is by name, so a
/// duplicate would silently shadow a later entry.
pub fn load_models(path: &Path) -> anyhow::Result<ModelCatalog> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading model catalog {}", path.display()))?;
    let models: Vec<ModelSpec> = serde_json::from_str(&text)
        .with_context(|| format!("parsing model catalog {}", path.display()))?;

    for (i, m) in models.iter().enumerate() {
        if models[..i].iter().any(|prev| prev.name == m.name) {
            anyhow::bail!("duplicate model name '{}' in {}", m.name, path.display());
        }
    }

    debug!(count = models.len(), path = %path.display(), "loaded model catalog");
    Ok(ModelCatalog { models })
}

/// Convenience lookup: load the catalog and select one model by name, or the
/// first entry when `name` is `None`.
pub fn lookup(path: &Path, name: Option<&str>) -> anyhow::Result<ModelSpec> {
    let catalog = load_models(path)?;
    let spec = match name {
        Some(n) => catalog
            .get(n)
            .with_context(|| format!("model '{n}' not found in {}", path.display()))?,
        None => catalog
            .default_model()
            .with_context(|| format!("model catalog {} is empty", path.display()))?,
    };
    Ok(spec.clone())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_catalog(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    const TWO_MODELS: &str = r#"[
        {"name": "fast", "model_id": "gpt-4o-mini", "base_url": "https://api.openai.com/v1"},
        {"name": "think", "model_id": "gemini-2.5-pro", "base_url": "https://generativelanguage.googleapis.com"}
    ]"#;

    #[test]
    fn loads_and_indexes_by_name() {
        let (_d, path) = write_catalog(TWO_MODELS);
        let cat = load_models(&path).unwrap();
        assert_eq!(cat.models.len(), 2);
        assert_eq!(cat.get("think").unwrap().model_id, "gemini-2.5-pro");
        assert!(cat.get("nope").is_none());
    }

    #[test]
    fn default_model_is_first_entry() {
        let (_d, path) = write_catalog(TWO_MODELS);
        let cat = load_models(&path).unwrap();
        assert_eq!(cat.default_model().unwrap().name, "fast");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (_d, path) = write_catalog(
            r#"[
                {"name": "m", "model_id": "a", "base_url": "u"},
                {"name": "m", "model_id": "b", "base_url": "u"}
            ]"#,
        );
        let err = load_models(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate model name"));
    }

    #[test]
    fn missing_file_is_error_with_path() {
        let err = load_models(Path::new("/no/such/models.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/no/such/models.json"));
    }

    #[test]
    fn lookup_by_name_and_default() {
        let (_d, path) = write_catalog(TWO_MODELS);
        assert_eq!(lookup(&path, Some("think")).unwrap().name, "think");
        assert_eq!(lookup(&path, None).unwrap().name, "fast");
        assert!(lookup(&path, Some("missing")).is_err());
    }
}
