// Environment-driven settings shared by the worker and the API

use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub redis_url: String,
    /// Each submission gets `<submissions_root>/<submission_id>`.
    pub submissions_root: PathBuf,
    /// Compiled programs land under `<programs_root>/<identifier>` unless a request says otherwise.
    pub programs_root: PathBuf,
    pub languages_path: PathBuf,
    /// Executable invoked with the submission directory name after every sandboxed run.
    pub permission_fixer: Option<PathBuf>,
    pub validator_time_limit_ms: u64,
    pub validator_memory_limit_kb: u64,
    pub result_channel_capacity: usize,
    pub compile_cache_capacity: usize,
    pub compile_cache_ttl_secs: u64,
    pub compile_time_limit_ms: u64,
    pub api_listen_addr: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            submissions_root: PathBuf::from("/var/lib/verdict/submissions"),
            programs_root: PathBuf::from("/var/lib/verdict/programs"),
            languages_path: PathBuf::from("config/languages.json"),
            permission_fixer: None,
            validator_time_limit_ms: 60_000,
            validator_memory_limit_kb: 1000 * 1000,
            result_channel_capacity: 10,
            compile_cache_capacity: 512,
            compile_cache_ttl_secs: 3600,
            compile_time_limit_ms: 30_000,
            api_listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl JudgeConfig {
    /// Read settings from the environment, falling back to defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str, default| parse_or(lookup(key), default);

        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            submissions_root: lookup("JUDGE_SUBMISSIONS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.submissions_root),
            programs_root: lookup("JUDGE_PROGRAMS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.programs_root),
            languages_path: lookup("JUDGE_LANGUAGES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.languages_path),
            permission_fixer: lookup("JUDGE_PERMISSION_FIXER")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            validator_time_limit_ms: parsed("VALIDATOR_TIME_LIMIT_MS", defaults.validator_time_limit_ms),
            validator_memory_limit_kb: parsed("VALIDATOR_MEMORY_LIMIT_KB", defaults.validator_memory_limit_kb),
            result_channel_capacity: parse_or(
                lookup("RESULT_CHANNEL_CAPACITY"),
                defaults.result_channel_capacity,
            )
            .max(1),
            compile_cache_capacity: parse_or(
                lookup("COMPILE_CACHE_CAPACITY"),
                defaults.compile_cache_capacity,
            ),
            compile_cache_ttl_secs: parsed("COMPILE_CACHE_TTL_SECS", defaults.compile_cache_ttl_secs),
            compile_time_limit_ms: parsed("COMPILE_TIME_LIMIT_MS", defaults.compile_time_limit_ms),
            api_listen_addr: lookup("API_LISTEN_ADDR").unwrap_or(defaults.api_listen_addr),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
