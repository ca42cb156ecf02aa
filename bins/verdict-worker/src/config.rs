// Language configuration management for the Verdict worker
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use verdict_common::types::LanguageInfo;

/// How one installed language builds and runs programs.
///
/// `compile` and `run` are shell snippets executed inside `image` with the
/// program directory as working directory. `compile` receives the source file
/// names as positional parameters; `run` receives the program's extra
/// arguments. A language without `compile` is interpreted: its sources are
/// copied as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub id: String,
    pub name: String,
    pub version: String,
    pub image: String,
    #[serde(default)]
    pub compile: Option<String>,
    pub run: String,
    /// Memory available to the compiler container
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
}

impl LanguageConfig {
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }

    pub fn info(&self) -> LanguageInfo {
        LanguageInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            if lang.run.trim().is_empty() {
                bail!("Language '{}' has an empty run command", lang.id);
            }
            if let Some(previous) = configs.insert(lang.id.clone(), lang) {
                bail!("Language '{}' is defined twice", previous.id);
            }
        }

        Ok(Self { configs })
    }

    /// Get configuration for a language id
    pub fn get_config(&self, language_id: &str) -> Result<&LanguageConfig> {
        self.configs
            .get(language_id)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language_id))
    }

    /// List all installed languages, sorted by id
    pub fn list_languages(&self) -> Vec<LanguageInfo> {
        let mut languages: Vec<LanguageInfo> = self.configs.values().map(LanguageConfig::info).collect();
        languages.sort_by(|a, b| a.id.cmp(&b.id));
        languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "languages": [
            {
                "id": "cpp",
                "name": "C++",
                "version": "17",
                "image": "gcc:13",
                "compile": "g++ -O2 -std=c++17 -o main \"$@\"",
                "run": "./main",
                "memory_limit_mb": 1024,
                "cpu_limit": 1.0
            },
            {
                "id": "python3",
                "name": "Python",
                "version": "3.12",
                "image": "python:3.12-slim",
                "run": "python3 main.py",
                "memory_limit_mb": 512,
                "cpu_limit": 0.5
            }
        ]
    }"#;

    #[test]
    fn test_parse_languages() {
        let manager = LanguageConfigManager::from_json(SAMPLE).unwrap();
        let cpp = manager.get_config("cpp").unwrap();
        assert_eq!(cpp.image, "gcc:13");
        assert!(cpp.compile.is_some());
        assert_eq!(cpp.nano_cpus(), 1_000_000_000);

        let python = manager.get_config("python3").unwrap();
        assert!(python.compile.is_none());
        assert_eq!(python.nano_cpus(), 500_000_000);
    }

    #[test]
    fn test_list_languages_sorted() {
        let manager = LanguageConfigManager::from_json(SAMPLE).unwrap();
        let ids: Vec<String> = manager.list_languages().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["cpp", "python3"]);
    }

    #[test]
    fn test_unknown_language() {
        let manager = LanguageConfigManager::from_json(SAMPLE).unwrap();
        let err = manager.get_config("cobol").unwrap_err();
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn test_duplicate_language_rejected() {
        let json = r#"{"languages": [
            {"id": "c", "name": "C", "version": "11", "image": "gcc", "run": "./a", "memory_limit_mb": 1, "cpu_limit": 1.0},
            {"id": "c", "name": "C", "version": "17", "image": "gcc", "run": "./a", "memory_limit_mb": 1, "cpu_limit": 1.0}
        ]}"#;
        assert!(LanguageConfigManager::from_json(json).is_err());
    }

    #[test]
    fn test_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = LanguageConfigManager::load(&tmp.path().join("languages.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_repository_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json");
        let manager = LanguageConfigManager::load(&path).unwrap();
        assert!(!manager.list_languages().is_empty());
    }
}
