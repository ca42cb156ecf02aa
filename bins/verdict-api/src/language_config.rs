// Language configuration for the API
// Loads the installed languages from languages.json; the worker owns how they build and run

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use verdict_common::types::LanguageInfo;

#[derive(Debug, Clone, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageInfo>,
}

/// Registry of configured languages
/// This is the authoritative source for which language ids requests may use
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: Vec<LanguageInfo>,
    enabled: HashSet<String>,
}

impl LanguageRegistry {
    /// Load language configuration from languages.json
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read {}: {}", path.as_ref().display(), e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        let config: LanguagesFile = serde_json::from_str(content)
            .map_err(|e| format!("Failed to parse languages.json: {}", e))?;

        let mut enabled = HashSet::new();
        for language in &config.languages {
            if !enabled.insert(language.id.clone()) {
                return Err(format!("Language '{}' is defined twice in languages.json", language.id));
            }
        }

        if enabled.is_empty() {
            return Err("No languages configured in languages.json".to_string());
        }

        let mut languages = config.languages;
        languages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Self { languages, enabled })
    }

    /// Check if a language id is installed
    pub fn is_enabled(&self, language_id: &str) -> bool {
        self.enabled.contains(language_id)
    }

    /// All installed languages, sorted by id
    pub fn languages(&self) -> &[LanguageInfo] {
        &self.languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_registry() {
        let registry = LanguageRegistry::load_from_file(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json"),
        )
        .unwrap();

        assert!(registry.is_enabled("cpp"));
        assert!(registry.is_enabled("python3"));
        assert!(!registry.is_enabled("Python"));
        let ids: Vec<&str> = registry.languages().iter().map(|l| l.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(LanguageRegistry::from_json(r#"{"languages": []}"#).is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let json = r#"{"languages": [
            {"id": "c", "name": "C", "version": "11"},
            {"id": "c", "name": "C", "version": "17"}
        ]}"#;
        let err = LanguageRegistry::from_json(json).unwrap_err();
        assert!(err.contains("defined twice"));
    }
}
