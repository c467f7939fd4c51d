use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Attempts are never allowed past this, whatever the configuration says.
pub const HARD_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MendConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub imports: ImportsConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Program and leading arguments; the script path is appended.
    #[serde(default = "default_runner_command")]
    pub command: Vec<String>,
    #[serde(default = "default_visible_flag")]
    pub visible_flag: Option<String>,
    #[serde(default)]
    pub headless_flag: Option<String>,
    /// Where the script text is written, relative to the work dir.
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
    #[serde(default = "default_runner_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            visible_flag: default_visible_flag(),
            headless_flag: None,
            script_path: default_script_path(),
            timeout_secs: default_runner_timeout_secs(),
        }
    }
}

fn default_runner_command() -> Vec<String> {
    vec!["npx".to_string(), "playwright".to_string(), "test".to_string()]
}

fn default_visible_flag() -> Option<String> {
    Some("--headed".to_string())
}

fn default_script_path() -> PathBuf {
    PathBuf::from("tests").join("generated.spec.ts")
}

fn default_runner_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryConfig {
    /// Configured attempts, clamped to `1..=HARD_MAX_ATTEMPTS`.
    pub fn effective_max_attempts(&self) -> usize {
        self.max_attempts.clamp(1, HARD_MAX_ATTEMPTS)
    }
}

fn default_max_attempts() -> usize {
    HARD_MAX_ATTEMPTS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Directories (relative to the work dir) holding locator and page-object sources.
    #[serde(default = "default_locator_dirs")]
    pub locator_dirs: Vec<PathBuf>,
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
    /// Visible text longer than this is not turned into a text selector.
    #[serde(default = "default_text_length_limit")]
    pub text_length_limit: usize,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            locator_dirs: default_locator_dirs(),
            source_extensions: default_source_extensions(),
            text_length_limit: default_text_length_limit(),
        }
    }
}

fn default_locator_dirs() -> Vec<PathBuf> {
    ["locators", "pages", "page-objects", "tests/locators", "tests/pages"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

fn default_source_extensions() -> Vec<String> {
    ["ts", "js", "mjs", "cjs", "tsx", "jsx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_text_length_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportsConfig {
    /// Suffix appended to extensionless relative imports.
    #[serde(default = "default_import_extension")]
    pub extension: String,
}

impl Default for ImportsConfig {
    fn default() -> Self {
        Self {
            extension: default_import_extension(),
        }
    }
}

fn default_import_extension() -> String {
    ".js".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Chat-completions endpoint. No endpoint disables the rewrite fallback.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_assistant_timeout_secs")]
    pub timeout_secs: u64,
    /// Tail of the full log sent along with the context excerpt.
    #[serde(default = "default_max_log_chars")]
    pub max_log_chars: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_assistant_timeout_secs(),
            max_log_chars: default_max_log_chars(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "MEND_API_KEY".to_string()
}

fn default_assistant_timeout_secs() -> u64 {
    60
}

fn default_max_log_chars() -> usize {
    4000
}
