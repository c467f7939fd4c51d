//! Replacement locator candidates, highest priority first:
//! runner suggestions, attribute subsets, recorder alternatives, visible text.

use super::selector::{
    AttributeSelector, base_tag, is_degenerate, keyword_tokens, markup_attributes, markup_tag,
};
use mend_common::protocol::{CandidateOrigin, LocatorCandidate, RecorderAction};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static SUGGESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\baka\s+(getByTestId|getByPlaceholder|getByLabel|getByAltText|getByTitle|getByText|getByRole|locator)\(([^\n]*)\)",
    )
    .unwrap()
});

static ROLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name:\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#).unwrap());

/// Build the full, de-duplicated candidate list for a failing selector.
pub fn generate(
    failing: &str,
    actions: &[RecorderAction],
    error_text: &str,
    text_length_limit: usize,
) -> Vec<LocatorCandidate> {
    let matches = match_recorder_actions(failing, actions);

    let mut all = suggested_by_runner(error_text);
    all.extend(attribute_subsets(failing));
    all.extend(matches.iter().filter_map(|m| {
        best_selector(m.action, failing).map(|selector| {
            LocatorCandidate::new(selector, CandidateOrigin::RecorderAlternative)
                .scored(m.score, m.reason.clone())
        })
    }));
    all.extend(text_candidates(&matches, text_length_limit));

    let mut seen = HashSet::new();
    all.into_iter()
        .filter(|c| c.selector != failing && !is_degenerate(&c.selector))
        .filter(|c| seen.insert(c.selector.clone()))
        .collect()
}

/// Alternatives the runner's own diagnostic names, e.g. `aka getByTestId('x')`.
pub fn suggested_by_runner(error_text: &str) -> Vec<LocatorCandidate> {
    SUGGESTION_RE
        .captures_iter(error_text)
        .filter_map(|caps| normalize_suggestion(&caps[1], &caps[2]))
        .map(|selector| LocatorCandidate::new(selector, CandidateOrigin::SuggestedByRunner))
        .collect()
}

fn normalize_suggestion(method: &str, args: &str) -> Option<String> {
    let (value, rest) = first_string_arg(args)?;
    let attr = |name: &str| format!("[{}='{}']", name, escape_single(&value));
    let selector = match method {
        "getByTestId" => attr("data-testid"),
        "getByPlaceholder" => attr("placeholder"),
        "getByLabel" => attr("aria-label"),
        "getByAltText" => attr("alt"),
        "getByTitle" => attr("title"),
        "getByText" => format!("text=\"{}\"", value.replace('"', "\\\"")),
        "getByRole" => match ROLE_NAME_RE.captures(rest) {
            Some(caps) => {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| unescape_js(m.as_str()))
                    .unwrap_or_default();
                format!("role={}[name='{}']", value, escape_single(&name))
            }
            None => format!("role={}", value),
        },
        "locator" => value,
        _ => return None,
    };
    Some(selector)
}

/// The first quoted argument and whatever follows it.
fn first_string_arg(args: &str) -> Option<(String, &str)> {
    let args = args.trim_start();
    let quote = args.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
    let mut escaped = false;
    for (i, c) in args.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some((unescape_js(&args[1..i]), &args[i + 1..]));
        }
    }
    None
}

fn unescape_js(s: &str) -> String {
    s.replace("\\'", "'").replace("\\\"", "\"").replace("\\`", "`")
}

fn escape_single(s: &str) -> String {
    s.replace('\'', "\\'")
}

/// One candidate per bracketed predicate, then the bare element type.
pub fn attribute_subsets(failing: &str) -> Vec<LocatorCandidate> {
    let Some(parsed) = AttributeSelector::parse(failing) else {
        return Vec::new();
    };
    if parsed.predicates.len() < 2 {
        return Vec::new();
    }

    let mut out: Vec<LocatorCandidate> = parsed
        .predicates
        .iter()
        .map(|p| {
            LocatorCandidate::new(
                parsed.with_predicate(Some(p)),
                CandidateOrigin::AttributeSubset,
            )
        })
        .collect();
    if !parsed.base.is_empty() && !is_degenerate(&parsed.base) {
        out.push(LocatorCandidate::new(
            parsed.with_predicate(None),
            CandidateOrigin::AttributeSubset,
        ));
    }
    out
}

/// A recorder action judged to target the same element as the failing selector.
#[derive(Debug, Clone)]
pub struct ActionMatch<'a> {
    pub action: &'a RecorderAction,
    pub score: f64,
    pub reason: String,
    pub exact: bool,
}

/// Exact signature matches in recording order, then semantic matches by score.
pub fn match_recorder_actions<'a>(
    failing: &str,
    actions: &'a [RecorderAction],
) -> Vec<ActionMatch<'a>> {
    let failing_tag = base_tag(failing);
    let failing_pairs = AttributeSelector::parse(failing)
        .map(|p| p.attribute_pairs())
        .unwrap_or_default();
    let failing_tokens = keyword_tokens(failing);

    let mut exact = Vec::new();
    let mut semantic = Vec::new();

    for action in actions {
        let element = &action.element;
        let tag = element_tag(action);
        let attributes = element_attributes(action);
        let same_tag = failing_tag.as_deref().is_none_or(|t| t == tag);

        let pairs_match = !failing_pairs.is_empty()
            && failing_pairs
                .iter()
                .all(|(name, value)| attributes.get(&name.to_ascii_lowercase()) == Some(value));

        if same_tag && (pairs_match || action.selectors.contains(failing)) {
            exact.push(ActionMatch {
                action,
                score: 1.0,
                reason: "same tag and attributes".to_string(),
                exact: true,
            });
            continue;
        }

        // Semantic matching needs an element type to compare against.
        if failing_tag.as_deref() != Some(tag.as_str()) || failing_tokens.is_empty() {
            continue;
        }
        let mut haystack = String::new();
        for part in [&element.markup, &element.accessible_name, &element.text]
            .into_iter()
            .flatten()
        {
            haystack.push_str(part);
            haystack.push(' ');
        }
        for value in attributes.values() {
            haystack.push_str(value);
            haystack.push(' ');
        }
        let element_tokens = keyword_tokens(&haystack);
        let shared: Vec<&String> = failing_tokens
            .iter()
            .filter(|t| element_tokens.contains(t))
            .collect();
        if shared.is_empty() {
            continue;
        }

        let overlap = shared.len() as f64 / failing_tokens.len() as f64;
        let similarity = element
            .accessible_name
            .as_deref()
            .map(|name| strsim::jaro_winkler(&failing_tokens.join(" "), &name.to_lowercase()))
            .unwrap_or(0.0);
        semantic.push(ActionMatch {
            action,
            score: (0.6 * overlap + 0.3 * similarity).min(0.95),
            reason: format!(
                "same tag, shared keywords: {}",
                shared
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            exact: false,
        });
    }

    semantic.sort_by(|a, b| b.score.total_cmp(&a.score));
    exact.extend(semantic);
    exact
}

fn element_tag(action: &RecorderAction) -> String {
    let tag = action.element.tag_name.trim().to_ascii_lowercase();
    if tag.is_empty() {
        action
            .element
            .markup
            .as_deref()
            .and_then(markup_tag)
            .unwrap_or_default()
    } else {
        tag
    }
}

fn element_attributes(action: &RecorderAction) -> HashMap<String, String> {
    let mut attributes = action
        .element
        .markup
        .as_deref()
        .map(markup_attributes)
        .unwrap_or_default();
    for (k, v) in &action.element.attributes {
        attributes.insert(k.to_ascii_lowercase(), v.clone());
    }
    attributes
}

/// Attribute-based first, then semantic, then structural.
pub fn best_selector(action: &RecorderAction, failing: &str) -> Option<String> {
    let set = &action.selectors;
    set.attribute
        .iter()
        .chain(&set.semantic)
        .chain(&set.structural)
        .find(|s| s.as_str() != failing && !is_degenerate(s))
        .cloned()
}

fn text_candidates(matches: &[ActionMatch<'_>], limit: usize) -> Vec<LocatorCandidate> {
    matches
        .iter()
        .filter_map(|m| {
            let text = m.action.element.text.as_deref()?.trim();
            if text.is_empty() || text.contains('\n') || text.chars().count() > limit {
                return None;
            }
            Some(
                LocatorCandidate::new(
                    format!("text=\"{}\"", text.replace('"', "\\\"")),
                    CandidateOrigin::TextBased,
                )
                .scored(m.score, format!("visible text of matched {}", element_tag(m.action))),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_common::protocol::{ActionKind, ElementDescriptor, SelectorSet};

    fn action(tag: &str, markup: &str, name: Option<&str>, attribute: &[&str]) -> RecorderAction {
        RecorderAction {
            kind: ActionKind::Click,
            element: ElementDescriptor {
                tag_name: tag.to_string(),
                accessible_name: name.map(String::from),
                text: name.map(String::from),
                markup: Some(markup.to_string()),
                ..Default::default()
            },
            selectors: SelectorSet {
                attribute: attribute.iter().map(|s| s.to_string()).collect(),
                structural: vec!["/html/body/form/button".to_string()],
                ..Default::default()
            },
            timestamp: None,
            page_id: None,
        }
    }

    #[test]
    fn test_attribute_subsets_order() {
        let selectors: Vec<String> =
            attribute_subsets("button[type='submit'][data-automation-id='signInButton']")
                .into_iter()
                .map(|c| c.selector)
                .collect();
        assert_eq!(
            selectors,
            vec![
                "button[type='submit']",
                "button[data-automation-id='signInButton']",
                "button"
            ]
        );
    }

    #[test]
    fn test_attribute_subsets_needs_two_predicates() {
        assert!(attribute_subsets("button[type='submit']").is_empty());
        assert!(attribute_subsets("#login").is_empty());
    }

    #[test]
    fn test_strict_mode_suggestion_comes_first() {
        let error = "Error: strict mode violation: locator('button') resolved to 3 elements:\n    1) <button data-testid=\"login-button\">Log in</button> aka getByTestId('login-button')\n    2) <button>Cancel</button> aka getByRole('button', { name: 'Cancel' })";
        let candidates = generate("button", &[], error, 50);
        assert_eq!(candidates[0].selector, "[data-testid='login-button']");
        assert_eq!(candidates[0].origin, CandidateOrigin::SuggestedByRunner);
        assert_eq!(candidates[1].selector, "role=button[name='Cancel']");
    }

    #[test]
    fn test_suggestion_normalization() {
        let cases = [
            ("getByPlaceholder", "'Email'", "[placeholder='Email']"),
            ("getByLabel", "\"Password\"", "[aria-label='Password']"),
            ("getByText", "'Sign in', { exact: true }", "text=\"Sign in\""),
            ("getByRole", "'link'", "role=link"),
            ("locator", "'#save'", "#save"),
            ("getByTitle", "'it\\'s'", "[title='it\\'s']"),
        ];
        for (method, args, expected) in cases {
            assert_eq!(normalize_suggestion(method, args).as_deref(), Some(expected));
        }
        assert_eq!(normalize_suggestion("getByTestId", "someVar"), None);
    }

    #[test]
    fn test_recorder_exact_match_before_semantic() {
        let actions = vec![
            action(
                "button",
                r#"<button type="submit" class="primary">Continue</button>"#,
                Some("Continue"),
                &["[data-qa='continue']"],
            ),
            action(
                "button",
                r#"<button type="submit" data-automation-id="signInButton">Sign in</button>"#,
                Some("Sign in"),
                &["[data-automation-id='signInButton']"],
            ),
        ];
        let matches = match_recorder_actions(
            "button[type='submit'][data-automation-id='signInButton']",
            &actions,
        );
        assert_eq!(matches.len(), 1);
        assert!(matches[0].exact);
        assert_eq!(
            best_selector(matches[0].action, "x").as_deref(),
            Some("[data-automation-id='signInButton']")
        );
    }

    #[test]
    fn test_recorder_semantic_match_on_keyword() {
        let actions = vec![action(
            "button",
            r#"<button id="signin-btn">Sign in</button>"#,
            Some("Sign in"),
            &["#signin-btn"],
        )];
        let matches = match_recorder_actions("button[data-automation-id='signInButton']", &actions);
        assert_eq!(matches.len(), 1);
        assert!(!matches[0].exact);
        assert!(matches[0].reason.contains("sign"));
        assert!(matches[0].score > 0.0 && matches[0].score < 1.0);
    }

    #[test]
    fn test_semantic_match_requires_same_tag() {
        let actions = vec![action("a", r#"<a href="/signin">Sign in</a>"#, Some("Sign in"), &[])];
        let matches = match_recorder_actions("button[data-automation-id='signInButton']", &actions);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_generate_full_order_with_text_candidate() {
        let actions = vec![action(
            "button",
            r#"<button type="submit" data-automation-id="signInButton">Sign in</button>"#,
            Some("Sign in"),
            &["[data-automation-id='signInButton']"],
        )];
        let selectors: Vec<String> = generate(
            "button[type='submit'][data-automation-id='signInButton']",
            &actions,
            "Timeout 30000ms exceeded",
            50,
        )
        .into_iter()
        .map(|c| c.selector)
        .collect();
        assert_eq!(
            selectors,
            vec![
                "button[type='submit']",
                "button[data-automation-id='signInButton']",
                "button",
                "[data-automation-id='signInButton']",
                "text=\"Sign in\"",
            ]
        );
    }

    #[test]
    fn test_long_text_is_not_a_candidate() {
        let long = "x".repeat(80);
        let actions = vec![action(
            "button",
            r#"<button data-x="1">"#,
            Some(&long),
            &["[data-x='1']"],
        )];
        let candidates = generate("button[data-x='1'][type='button']", &actions, "", 50);
        assert!(candidates.iter().all(|c| c.origin != CandidateOrigin::TextBased));
    }

    #[test]
    fn test_degenerate_candidates_are_dropped() {
        let actions = vec![RecorderAction {
            selectors: SelectorSet {
                structural: vec!["/html/body".to_string()],
                ..Default::default()
            },
            ..action("div", "<div>", None, &[])
        }];
        let candidates = generate("div[data-x='1'][data-y='2']", &actions, "aka locator('body')", 50);
        assert!(candidates.iter().all(|c| !is_degenerate(&c.selector)));
    }
}
