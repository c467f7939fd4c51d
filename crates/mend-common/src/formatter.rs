use crate::protocol::{ErrorClassification, LocatorCandidate, TrialExecutionResult};
use std::collections::HashMap;

/// Environment keys whose values are masked in output.
const SENSITIVE_KEYS: &[&str] = &["password", "secret", "token", "key", "credential"];

pub fn format_result(result: &TrialExecutionResult) -> String {
    let mut output = format!(
        "{} after {} attempt{} [{}]\n",
        if result.success { "PASSED" } else { "FAILED" },
        result.attempts,
        if result.attempts == 1 { "" } else { "s" },
        result.state.code()
    );

    for fix in &result.fixes {
        // e.g. #1 LOCATOR_NOT_FOUND: healed locator ... (files: pages/login.ts)
        output.push_str(&format!("  #{} {}: {}", fix.attempt, fix.category, fix.description));
        if !fix.files_touched.is_empty() {
            output.push_str(&format!(" (files: {})", fix.files_touched.join(", ")));
        }
        output.push('\n');
    }

    if let Some(note) = &result.terminal_error {
        output.push_str(&format!("Stopped: {}\n", note));
    }

    output
}

pub fn format_classification(classification: &ErrorClassification) -> String {
    let mut output = format!(
        "{} ({})\nmatched: {:?}\n",
        classification.category,
        classification.category.description(),
        classification.matched
    );
    if let Some(file) = &classification.file {
        match classification.line {
            Some(line) => output.push_str(&format!("at {}:{}\n", file, line)),
            None => output.push_str(&format!("at {}\n", file)),
        }
    }
    output.push_str("---\n");
    output.push_str(&classification.context);
    output.push('\n');
    output
}

pub fn format_candidates(candidates: &[LocatorCandidate]) -> String {
    let mut output = String::new();
    for (i, c) in candidates.iter().enumerate() {
        output.push_str(&format!("[{}] {} ({:?})", i + 1, c.selector, c.origin));
        if let Some(score) = c.score {
            output.push_str(&format!(" score={:.2}", score));
        }
        if let Some(reason) = &c.reason {
            output.push_str(&format!(" - {}", reason));
        }
        output.push('\n');
    }
    output
}

/// Render environment overrides as `KEY=value` lines, masking secrets.
pub fn format_env(env: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = env.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{}={}", k, mask_sensitive(k, &env[k])))
        .collect::<Vec<_>>()
        .join("\n")
}

fn mask_sensitive(key: &str, value: &str) -> String {
    let lower = key.to_lowercase();
    if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
        "••••••••".to_string()
    } else {
        value.to_string()
    }
}
