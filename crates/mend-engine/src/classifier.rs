//! Error Classification
//!
//! Maps raw runner output onto the closed `ErrorCategory` taxonomy using an
//! ordered table of regex signatures. The first signature that matches wins,
//! so specific shapes must sit above the generic ones that would also match.
//!
//! The table lives behind the `ErrorClassifier` trait; the retry loop only
//! ever sees `Option<ErrorClassification>`.

use mend_common::ErrorCategory;
use mend_common::protocol::ErrorClassification;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Lines of log kept on each side of the first match.
pub const CONTEXT_LINES: usize = 3;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Invalid pattern for {category}: {source}")]
    InvalidPattern {
        category: ErrorCategory,
        #[source]
        source: regex::Error,
    },
}

pub trait ErrorClassifier: Send + Sync {
    /// `None` means the log is unclassifiable, which is an ordinary outcome.
    fn classify(&self, log: &str) -> Option<ErrorClassification>;
}

/// One row of the signature table.
#[derive(Debug, Clone)]
pub struct Signature {
    pub category: ErrorCategory,
    pub pattern: Regex,
    /// Must also match inside the context excerpt of a pattern hit.
    pub guard: Option<Regex>,
}

impl Signature {
    pub fn new(
        category: ErrorCategory,
        pattern: &str,
        guard: Option<&str>,
    ) -> Result<Self, ClassifierError> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|source| ClassifierError::InvalidPattern { category, source })
        };
        Ok(Self {
            category,
            pattern: compile(pattern)?,
            guard: guard.map(compile).transpose()?,
        })
    }
}

const SEMANTIC_LOCATOR_METHODS: &str =
    r"\bgetBy(?:Role|TestId|Label|Text|Placeholder|AltText|Title)\b";

const SYNTAX_PATTERN: &str = r"SyntaxError:[^\n]*|Unexpected token[^\n]*";

static BUILTIN_SIGNATURES: LazyLock<Vec<Signature>> = LazyLock::new(|| {
    let rows: [(ErrorCategory, &str, Option<&str>); 10] = [
        (
            ErrorCategory::ImportResolution,
            r#"Cannot find (?:module|package) '[^']+'|ERR_MODULE_NOT_FOUND|Relative import paths need explicit file extensions|Failed to resolve import "[^"]+""#,
            None,
        ),
        (
            ErrorCategory::ExportConstructor,
            r"\b\w+ is not a constructor|does not provide an export named '\w+'|has no exported member '\w+'",
            None,
        ),
        (
            ErrorCategory::LocatorNotFound,
            r"Timeout \d+ms exceeded|TimeoutError|element\(s\) not found|No element found for selector",
            None,
        ),
        (
            ErrorCategory::SelectorAmbiguity,
            r"strict mode violation|resolved to \d+ elements",
            None,
        ),
        (
            ErrorCategory::MissingDataFile,
            r"ENOENT: no such file or directory,? \w+ '[^']*\.(?:csv|json|xlsx|xls|txt|ya?ml)'|[Dd]ata file not found",
            None,
        ),
        (ErrorCategory::TypeError, r"TypeError:[^\n]*", None),
        // A syntax error around a semantic locator builder is a malformed
        // locator expression, not a language error.
        (
            ErrorCategory::LocatorNotFound,
            SYNTAX_PATTERN,
            Some(SEMANTIC_LOCATOR_METHODS),
        ),
        (ErrorCategory::SyntaxError, SYNTAX_PATTERN, None),
        (
            ErrorCategory::MissingMethod,
            r"is not a function|Cannot read propert(?:y|ies) of (?:undefined|null)|Property '\w+' does not exist on type|undefined is not an object",
            None,
        ),
        (
            ErrorCategory::Compilation,
            r"error TS\d+:|Transform failed|Compilation failed|Build failed",
            None,
        ),
    ];
    rows.into_iter()
        .map(|(category, pattern, guard)| Signature::new(category, pattern, guard).unwrap())
        .collect()
});

static SOURCE_LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[A-Za-z]:)?[\w@.~/\\-]+\.(?:ts|tsx|js|jsx|mjs|cjs)):(\d+)(?::\d+)?").unwrap()
});

/// Ordered signature table matcher.
#[derive(Debug, Clone)]
pub struct SignatureClassifier {
    signatures: Vec<Signature>,
}

impl Default for SignatureClassifier {
    fn default() -> Self {
        Self::new(BUILTIN_SIGNATURES.clone())
    }
}

impl SignatureClassifier {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }
}

impl ErrorClassifier for SignatureClassifier {
    fn classify(&self, log: &str) -> Option<ErrorClassification> {
        for signature in &self.signatures {
            for m in signature.pattern.find_iter(log) {
                let context = context_window(log, m.start(), CONTEXT_LINES);
                if let Some(guard) = &signature.guard
                    && !guard.is_match(&context)
                {
                    continue;
                }
                let (file, line) = source_location(&context)
                    .or_else(|| source_location(log))
                    .map_or((None, None), |(f, l)| (Some(f), Some(l)));
                return Some(ErrorClassification {
                    category: signature.category,
                    matched: m.as_str().to_string(),
                    context,
                    file,
                    line,
                });
            }
        }
        None
    }
}

/// Convenience wrapper over the builtin table.
pub fn classify(log: &str) -> Option<ErrorClassification> {
    SignatureClassifier::default().classify(log)
}

/// The line containing `offset` plus up to `radius` lines either side.
fn context_window(log: &str, offset: usize, radius: usize) -> String {
    let line_index = log[..offset].matches('\n').count();
    let lines: Vec<&str> = log.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let line_index = line_index.min(lines.len() - 1);
    let start = line_index.saturating_sub(radius);
    let end = (line_index + radius + 1).min(lines.len());
    lines[start..end].join("\n")
}

/// First `file.ext:line` fragment, preferring project files over dependencies.
fn source_location(text: &str) -> Option<(String, u32)> {
    let mut fallback = None;
    for caps in SOURCE_LOCATION_RE.captures_iter(text) {
        let file = caps[1].to_string();
        let Ok(line) = caps[2].parse::<u32>() else {
            continue;
        };
        if !file.contains("node_modules") {
            return Some((file, line));
        }
        fallback.get_or_insert((file, line));
    }
    fallback
}
