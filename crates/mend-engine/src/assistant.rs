//! Authoring assistant client used as the last-resort fix.
//!
//! The assistant receives the current script plus error context and answers
//! with free text that may contain a rewritten script. The client is built by
//! the caller and injected into the dispatcher.

use crate::config::schema::AssistantConfig;
use async_trait::async_trait;
use mend_common::ErrorCategory;
use mend_common::protocol::ErrorClassification;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[\w+.-]*[ \t]*\r?\n(.*?)```").unwrap());

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Authoring assistant is not configured")]
    Disabled,
    #[error("Invalid assistant endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Assistant request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Assistant returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Assistant returned no content")]
    EmptyResponse,
}

/// What the assistant is asked to repair.
#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub script: String,
    pub category: ErrorCategory,
    pub context: String,
    pub log_excerpt: String,
}

impl RewriteRequest {
    pub fn new(
        script: &str,
        classification: &ErrorClassification,
        full_log: &str,
        max_log_chars: usize,
    ) -> Self {
        Self {
            script: script.to_string(),
            category: classification.category,
            context: classification.context.clone(),
            log_excerpt: tail_chars(full_log, max_log_chars).to_string(),
        }
    }

    /// The single textual request sent to the assistant.
    pub fn prompt(&self) -> String {
        format!(
            "The following test script failed because {}.\n\
             Return the complete corrected script in one fenced code block.\n\n\
             Script:\n```\n{}\n```\n\nError context:\n```\n{}\n```\n\nLog (tail):\n```\n{}\n```\n",
            self.category.description(),
            self.script,
            self.context,
            self.log_excerpt
        )
    }
}

#[async_trait]
pub trait AuthoringAssistant: Send + Sync {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String, AssistantError>;
}

/// Stand-in used when no endpoint is configured; every rewrite is "no fix".
#[derive(Debug, Default)]
pub struct DisabledAssistant;

#[async_trait]
impl AuthoringAssistant for DisabledAssistant {
    async fn rewrite(&self, _request: &RewriteRequest) -> Result<String, AssistantError> {
        Err(AssistantError::Disabled)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct HttpAssistant {
    client: reqwest::Client,
    endpoint: url::Url,
    model: String,
    api_key: Option<String>,
}

impl HttpAssistant {
    pub fn from_config(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let endpoint = config.endpoint.as_deref().ok_or(AssistantError::Disabled)?;
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| AssistantError::InvalidEndpoint(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }
}

#[async_trait]
impl AuthoringAssistant for HttpAssistant {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String, AssistantError> {
        let prompt = request.prompt();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You repair browser automation test scripts.",
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.0,
        };

        let mut builder = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        debug!(endpoint = %self.endpoint, category = %request.category, "requesting rewrite");
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Status {
                status: status.as_u16(),
                body: tail_chars(&body, 500).to_string(),
            });
        }
        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AssistantError::EmptyResponse)
    }
}

/// Pull a script out of a free-form reply.
///
/// The first fenced block wins; otherwise the whole reply is used when it
/// reads like code. `None` means the reply held nothing usable.
pub fn extract_code_block(reply: &str) -> Option<String> {
    if let Some(caps) = FENCED_BLOCK_RE.captures(reply) {
        let code = caps[1].trim_end();
        return (!code.trim().is_empty()).then(|| format!("{}\n", code));
    }
    looks_like_code(reply).then(|| format!("{}\n", reply.trim()))
}

fn looks_like_code(text: &str) -> bool {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return false;
    }
    let anchored = ["import ", "test(", "await ", "export ", "describe("]
        .iter()
        .any(|kw| text.contains(kw));
    let code_lines = lines
        .iter()
        .filter(|l| {
            l.ends_with(';')
                || l.ends_with('{')
                || l.ends_with('}')
                || l.ends_with("});")
                || l.starts_with("//")
                || l.starts_with("import ")
                || l.starts_with("const ")
                || l.starts_with("let ")
                || l.starts_with("await ")
        })
        .count();
    anchored && code_lines * 2 >= lines.len()
}

/// The last `max` characters of `s`, on a char boundary.
pub fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    let skip = count - max;
    let start = s.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(s.len());
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_block() {
        let reply = "Here you go:\n```typescript\nimport { test } from '@playwright/test';\ntest('x', async () => {});\n```\nGood luck";
        assert_eq!(
            extract_code_block(reply).unwrap(),
            "import { test } from '@playwright/test';\ntest('x', async () => {});\n"
        );
    }

    #[test]
    fn test_extract_raw_code_reply() {
        let reply = "import { test } from '@playwright/test';\n\ntest('x', async ({ page }) => {\n  await page.goto('/');\n});";
        assert!(extract_code_block(reply).unwrap().starts_with("import"));
    }

    #[test]
    fn test_extract_prose_is_none() {
        assert_eq!(
            extract_code_block("I could not determine what is wrong with the script."),
            None
        );
        assert_eq!(extract_code_block("```\n\n```"), None);
    }

    #[test]
    fn test_tail_chars_respects_char_boundaries() {
        assert_eq!(tail_chars("héllo", 3), "llo");
        assert_eq!(tail_chars("héllo", 4), "éllo");
        assert_eq!(tail_chars("abc", 10), "abc");
    }

    #[test]
    fn test_prompt_mentions_category_and_script() {
        let classification = ErrorClassification {
            category: ErrorCategory::SyntaxError,
            matched: "SyntaxError: Unexpected token".into(),
            context: "SyntaxError: Unexpected token".into(),
            file: None,
            line: None,
        };
        let request = RewriteRequest::new("test('a')", &classification, &"x".repeat(50), 10);
        assert_eq!(request.log_excerpt.len(), 10);
        let prompt = request.prompt();
        assert!(prompt.contains("syntax error"));
        assert!(prompt.contains("test('a')"));
    }

    #[test]
    fn test_from_config_without_endpoint_is_disabled() {
        let err = HttpAssistant::from_config(&AssistantConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, AssistantError::Disabled));
    }
}
