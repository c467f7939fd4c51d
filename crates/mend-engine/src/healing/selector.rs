//! Selector string helpers shared by candidate generation and patching.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static DEGENERATE_XPATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\.|/{1,2}|/{1,2}html(?:\[1\])?(?:/body(?:\[1\])?)?/?|/{1,2}body(?:\[1\])?/?)$")
        .unwrap()
});

static FAILING_LOCATOR_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"locator\('((?:[^'\\]|\\.)*)'\)"#,
        r#"locator\("((?:[^"\\]|\\.)*)"\)"#,
        r#"waiting for selector "((?:[^"\\]|\\.)*)""#,
        r#"waiting for selector '((?:[^'\\]|\\.)*)'"#,
        r#"No element found for selector:? "((?:[^"\\]|\\.)*)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static GET_BY_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bgetBy(?:Role|TestId|Label|Text|Placeholder|AltText|Title)\((?:[^()\n]|\([^()\n]*\))*\)")
        .unwrap()
});

static MARKUP_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#).unwrap()
});

static MARKUP_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<([A-Za-z][\w-]*)").unwrap());

/// Words that say nothing about which element is meant.
const STOP_TOKENS: &[&str] = &[
    "data", "type", "testid", "test", "automation", "class", "aria", "label", "name", "role",
    "xpath", "css", "text", "div", "span", "button", "input", "html", "body", "the", "and",
    "for", "nth", "child", "contains", "submit", "reset", "checkbox", "radio", "hidden",
    "true", "false",
];

/// Selectors that resolve to the document root or the whole page.
pub fn is_degenerate(selector: &str) -> bool {
    let s = selector.trim();
    if s.is_empty() {
        return true;
    }
    let lower = s.to_ascii_lowercase();
    if matches!(lower.as_str(), "html" | "body" | ":root" | "*" | "html > body") {
        return true;
    }
    let xpath = lower
        .strip_prefix("xpath=")
        .map(str::trim)
        .unwrap_or(lower.as_str());
    (xpath.starts_with('/') || xpath == ".") && DEGENERATE_XPATH_RE.is_match(xpath)
}

/// A CSS selector of the shape `tag[pred][pred]...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSelector {
    pub base: String,
    /// Predicate bodies without brackets, e.g. `type='submit'`.
    pub predicates: Vec<String>,
}

impl AttributeSelector {
    /// Returns `None` unless the whole selector is a base followed by bracketed predicates.
    pub fn parse(selector: &str) -> Option<Self> {
        let s = selector.trim();
        let open = s.find('[')?;
        let base = s[..open].trim().to_string();
        if base.contains(|c: char| c.is_whitespace() || c == '>' || c == '+' || c == '~') {
            return None;
        }

        let mut predicates = Vec::new();
        let mut rest = &s[open..];
        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return None;
            }
            let close = find_predicate_end(rest)?;
            predicates.push(rest[1..close].trim().to_string());
            rest = &rest[close + 1..];
        }
        Some(Self { base, predicates })
    }

    /// The base alone, with a predicate appended when given.
    pub fn with_predicate(&self, predicate: Option<&str>) -> String {
        match predicate {
            Some(p) => format!("{}[{}]", self.base, p),
            None => self.base.clone(),
        }
    }

    /// `(name, value)` pairs for predicates that compare a value.
    pub fn attribute_pairs(&self) -> Vec<(String, String)> {
        self.predicates
            .iter()
            .filter_map(|p| parse_predicate(p))
            .collect()
    }
}

/// Index of the `]` closing the predicate that opens at byte 0, honouring quotes.
fn find_predicate_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_predicate(predicate: &str) -> Option<(String, String)> {
    let eq = predicate.find('=')?;
    let name = predicate[..eq]
        .trim_end_matches(['~', '^', '$', '*', '|'])
        .trim()
        .to_string();
    let value = unquote(predicate[eq + 1..].trim());
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

fn unquote(value: &str) -> String {
    let trimmed = value
        .strip_suffix(" i")
        .or_else(|| value.strip_suffix(" s"))
        .unwrap_or(value)
        .trim();
    for q in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(q) && trimmed.ends_with(q) {
            return trimmed[1..trimmed.len() - 1].replace(&format!("\\{}", q), &q.to_string());
        }
    }
    trimmed.to_string()
}

/// Element tag the selector targets, if it names one.
pub fn base_tag(selector: &str) -> Option<String> {
    let s = selector.trim();
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(s.len());
    let tag = &s[..end];
    if tag.is_empty() || !tag.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    // Engine prefixes like `role=` or `text=` are not tags.
    if s[end..].starts_with('=') {
        return None;
    }
    Some(tag.to_ascii_lowercase())
}

/// Attributes declared in a markup fragment's opening tag.
pub fn markup_attributes(markup: &str) -> HashMap<String, String> {
    let opening = markup.split('>').next().unwrap_or("");
    MARKUP_ATTR_RE
        .captures_iter(opening)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (caps[1].to_ascii_lowercase(), value)
        })
        .collect()
}

pub fn markup_tag(markup: &str) -> Option<String> {
    MARKUP_TAG_RE
        .captures(markup)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Lowercased keyword tokens, split on punctuation and camelCase boundaries.
pub fn keyword_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if current.len() >= 3 {
            let token = current.to_lowercase();
            if !STOP_TOKENS.contains(&token.as_str()) && !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        current.clear();
    };

    for c in text.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower {
                flush(&mut current, &mut tokens);
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        } else {
            flush(&mut current, &mut tokens);
            prev_lower = false;
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

/// The first non-degenerate selector a runner log reports as failing.
///
/// A `getBy*(...)` call is returned verbatim as written in the log; calls the
/// runner offers as alternatives (`aka getBy...`) are not failures.
pub fn extract_failing_selector(log: &str) -> Option<String> {
    let mut found: Vec<(usize, String)> = FAILING_LOCATOR_RES
        .iter()
        .flat_map(|re| {
            re.captures_iter(log).filter_map(|caps| {
                let m = caps.get(1)?;
                Some((m.start(), unescape(m.as_str())))
            })
        })
        .collect();
    found.extend(
        GET_BY_CALL_RE
            .find_iter(log)
            .filter(|m| !log[..m.start()].trim_end().ends_with("aka"))
            .map(|m| (m.start(), m.as_str().to_string())),
    );
    found.sort_by_key(|(pos, _)| *pos);
    found
        .into_iter()
        .map(|(_, s)| s)
        .find(|s| !is_degenerate(s))
}

/// Whether `s` is a `getBy*(...)` call rather than an engine selector.
pub fn is_locator_call(s: &str) -> bool {
    GET_BY_CALL_RE
        .find(s)
        .is_some_and(|m| m.start() == 0 && m.end() == s.len())
}

fn unescape(s: &str) -> String {
    s.replace("\\'", "'").replace("\\\"", "\"").replace("\\\\", "\\")
}
