use crate::category::ErrorCategory;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Custom deserializer for HashMap<String, String> that filters out null values.
/// Recorders emit every known attribute key, with null for the ones the element lacks.
fn deserialize_nullable_string_map<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: Option<HashMap<String, Option<String>>> = Option::deserialize(deserializer)?;
    Ok(map
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| v.map(|val| (k, val)))
        .collect())
}

/// Whether the runner shows the browser window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Headless,
    Visible,
}

/// One request to run a generated script until it passes or the loop gives up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialExecutionRequest {
    pub script: String,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub recorder_actions: Vec<RecorderAction>,
    /// Per-run timeout override for the external runner, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl TrialExecutionRequest {
    pub fn new(script: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            work_dir: work_dir.into(),
            mode: ExecutionMode::default(),
            env: HashMap::new(),
            recorder_actions: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_recorder_actions(mut self, actions: Vec<RecorderAction>) -> Self {
        self.recorder_actions = actions;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Fill,
    Input,
    Select,
    Check,
    Press,
    Navigate,
    #[serde(other)]
    Other,
}

/// A user interaction captured by the recorder, read-only to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderAction {
    pub kind: ActionKind,
    pub element: ElementDescriptor,
    #[serde(default)]
    pub selectors: SelectorSet,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub page_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub tag_name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub accessible_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Raw outer markup fragment of the element.
    #[serde(default)]
    pub markup: Option<String>,
    #[serde(default, deserialize_with = "deserialize_nullable_string_map")]
    pub attributes: HashMap<String, String>,
}

/// Alternative selectors recorded for one element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    /// Path-based: XPath or nth-child CSS chains.
    pub structural: Vec<String>,
    /// Attribute-based CSS such as `[data-testid='save']`.
    pub attribute: Vec<String>,
    /// Role/label based engine selectors such as `role=button[name='Save']`.
    pub semantic: Vec<String>,
}

impl SelectorSet {
    pub fn contains(&self, selector: &str) -> bool {
        self.structural
            .iter()
            .chain(&self.attribute)
            .chain(&self.semantic)
            .any(|s| s == selector)
    }

    pub fn is_empty(&self) -> bool {
        self.structural.is_empty() && self.attribute.is_empty() && self.semantic.is_empty()
    }
}

/// Result of mapping a runner log onto the category taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    /// The substring the winning pattern matched.
    pub matched: String,
    /// A few log lines around the first match.
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub attempt: usize,
    pub category: ErrorCategory,
    pub description: String,
    pub script_changed: bool,
    pub files_changed: bool,
    #[serde(default)]
    pub files_touched: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    SuggestedByRunner,
    AttributeSubset,
    RecorderAlternative,
    TextBased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorCandidate {
    pub selector: String,
    pub origin: CandidateOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LocatorCandidate {
    pub fn new(selector: impl Into<String>, origin: CandidateOrigin) -> Self {
        Self {
            selector: selector.into(),
            origin,
            score: None,
            reason: None,
        }
    }

    pub fn scored(mut self, score: f64, reason: impl Into<String>) -> Self {
        self.score = Some(score);
        self.reason = Some(reason.into());
        self
    }
}

/// How a retry loop ended. All variants are legitimate results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Succeeded,
    ExhaustedNoClassification,
    ConvergedNoFix,
    ExhaustedMaxAttempts,
    Cancelled,
}

impl TerminalState {
    pub fn code(&self) -> &'static str {
        match self {
            TerminalState::Succeeded => "SUCCEEDED",
            TerminalState::ExhaustedNoClassification => "EXHAUSTED_NO_CLASSIFICATION",
            TerminalState::ConvergedNoFix => "CONVERGED_NO_FIX",
            TerminalState::ExhaustedMaxAttempts => "EXHAUSTED_MAX_ATTEMPTS",
            TerminalState::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialExecutionResult {
    pub success: bool,
    pub state: TerminalState,
    /// Logs of every attempt, each preceded by an attempt header.
    pub logs: String,
    pub attempts: usize,
    pub fixes: Vec<FixAttempt>,
    pub final_script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<String>,
}
