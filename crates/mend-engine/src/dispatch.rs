//! Fix Dispatch
//!
//! Maps a classified failure onto one repair strategy. Each strategy returns
//! the (possibly unchanged) script text and the auxiliary files it rewrote.
//! Strategy errors never escape: they are logged and reported as "no fix",
//! which lets the retry loop stop cleanly.

use crate::assistant::{AuthoringAssistant, RewriteRequest, extract_code_block};
use crate::config::schema::{ImportsConfig, MendConfig};
use crate::healing::patch::{self, PatchError, display_relative};
use crate::healing::{HealError, LocatorHealer, TriedLocatorRegistry, selector};
use mend_common::ErrorCategory;
use mend_common::protocol::{ErrorClassification, RecorderAction};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

static CLASS_NAME_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(\w+) is not a constructor",
        r"does not provide an export named '(\w+)'",
        r"has no exported member '(\w+)'",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RELATIVE_IMPORT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(\bfrom\s*|\bimport\s*\(\s*|\bimport\s+)'(\.{1,2}/[^'\n]*)'"#,
        r#"(\bfrom\s*|\bimport\s*\(\s*|\bimport\s+)"(\.{1,2}/[^"\n]*)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Extensions that make a relative specifier resolvable as written.
const KNOWN_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "ts", "mts", "cts", "tsx", "jsx", "json", "css", "svg", "png",
];

#[derive(Debug, Error)]
pub enum FixError {
    #[error("No class name found in the error output")]
    ClassNameNotFound,
    #[error("No relative import of '{0}' in the script")]
    ImportNotFound(String),
    #[error("Imported module '{0}' not found on disk")]
    ModuleNotFound(String),
    #[error("'{class}' is not declared in {path}")]
    ClassNotDeclared { class: String, path: PathBuf },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No failing selector found in the error output")]
    NoFailingSelector,
    #[error(transparent)]
    Heal(#[from] HealError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Assistant(#[from] crate::assistant::AssistantError),
    #[error("Assistant did not answer within {0}s")]
    AssistantTimeout(u64),
    #[error("Assistant reply contained no code")]
    NoCodeBlock,
}

/// Output of one fix strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct FixOutcome {
    pub script: String,
    /// Auxiliary files rewritten, relative to the work dir.
    pub files_touched: Vec<String>,
    pub description: String,
}

impl FixOutcome {
    pub fn unchanged(script: &str, description: impl Into<String>) -> Self {
        Self {
            script: script.to_string(),
            files_touched: Vec::new(),
            description: description.into(),
        }
    }
}

/// Per-request state the strategies read and extend.
pub struct FixContext<'a> {
    pub work_dir: &'a Path,
    /// Script location relative to `work_dir`.
    pub script_path: &'a Path,
    pub recorder_actions: &'a [RecorderAction],
    pub registry: &'a mut TriedLocatorRegistry,
}

pub struct FixDispatcher {
    healer: LocatorHealer,
    assistant: Arc<dyn AuthoringAssistant>,
    imports: ImportsConfig,
    max_log_chars: usize,
    assistant_timeout: Duration,
}

impl FixDispatcher {
    pub fn new(config: &MendConfig, assistant: Arc<dyn AuthoringAssistant>) -> Self {
        Self {
            healer: LocatorHealer::new(config.healing.clone()),
            assistant,
            imports: config.imports.clone(),
            max_log_chars: config.assistant.max_log_chars,
            assistant_timeout: Duration::from_secs(config.assistant.timeout_secs),
        }
    }

    pub async fn apply_fix(
        &self,
        script: &str,
        classification: &ErrorClassification,
        full_log: &str,
        ctx: &mut FixContext<'_>,
    ) -> FixOutcome {
        let category = classification.category;
        let result = match category {
            ErrorCategory::ExportConstructor => self.fix_export(script, full_log, ctx),
            ErrorCategory::ImportResolution => Ok(self.fix_imports(script)),
            ErrorCategory::LocatorNotFound | ErrorCategory::SelectorAmbiguity => {
                self.fix_locator(script, full_log, ctx)
            }
            ErrorCategory::MissingDataFile => Ok(FixOutcome::unchanged(
                script,
                "missing data file is not repaired automatically",
            )),
            ErrorCategory::TypeError
            | ErrorCategory::SyntaxError
            | ErrorCategory::MissingMethod
            | ErrorCategory::Compilation => {
                self.fix_with_assistant(script, classification, full_log)
                    .await
            }
        };

        match result {
            Ok(outcome) => {
                info!(
                    category = %category,
                    files = outcome.files_touched.len(),
                    description = %outcome.description,
                    "fix strategy finished"
                );
                outcome
            }
            Err(e) => {
                warn!(category = %category, error = %e, "fix strategy produced no fix");
                FixOutcome::unchanged(script, format!("no fix: {}", e))
            }
        }
    }

    fn fix_export(
        &self,
        script: &str,
        full_log: &str,
        ctx: &FixContext<'_>,
    ) -> Result<FixOutcome, FixError> {
        let class = class_name_from_log(full_log).ok_or(FixError::ClassNameNotFound)?;
        let specifier = import_specifier(script, &class)
            .ok_or_else(|| FixError::ImportNotFound(class.clone()))?;
        let script_dir = ctx
            .work_dir
            .join(ctx.script_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ctx.work_dir.to_path_buf());
        let module = resolve_module(&script_dir, &specifier)
            .ok_or_else(|| FixError::ModuleNotFound(specifier.clone()))?;

        match ensure_exported(&module, &class)? {
            true => {
                let name = display_relative(&module, ctx.work_dir);
                Ok(FixOutcome {
                    script: script.to_string(),
                    description: format!("exported {} from {}", class, name),
                    files_touched: vec![name],
                })
            }
            false => Ok(FixOutcome::unchanged(
                script,
                format!("{} is already exported", class),
            )),
        }
    }

    fn fix_imports(&self, script: &str) -> FixOutcome {
        let (rewritten, count) = add_import_extensions(script, &self.imports.extension);
        FixOutcome {
            script: rewritten,
            files_touched: Vec::new(),
            description: format!(
                "added {} to {} relative import{}",
                self.imports.extension,
                count,
                if count == 1 { "" } else { "s" }
            ),
        }
    }

    fn fix_locator(
        &self,
        script: &str,
        full_log: &str,
        ctx: &mut FixContext<'_>,
    ) -> Result<FixOutcome, FixError> {
        let failing = selector::extract_failing_selector(full_log).ok_or(FixError::NoFailingSelector)?;
        let Some(outcome) = self.healer.heal(
            &failing,
            ctx.registry,
            ctx.recorder_actions,
            full_log,
            ctx.work_dir,
        )?
        else {
            return Ok(FixOutcome::unchanged(
                script,
                format!("no untried locator candidate for '{}'", failing),
            ));
        };

        let new_selector = &outcome.candidate.selector;
        let script_file = ctx.work_dir.join(ctx.script_path);
        let files_touched = outcome
            .patched_files
            .iter()
            .filter(|p| **p != script_file)
            .map(|p| display_relative(p, ctx.work_dir))
            .collect();
        let new_script =
            patch::replace_locator(script, &failing, new_selector).unwrap_or_else(|| script.to_string());

        Ok(FixOutcome {
            script: new_script,
            files_touched,
            description: format!(
                "replaced locator '{}' with '{}' ({:?})",
                failing, new_selector, outcome.candidate.origin
            ),
        })
    }

    async fn fix_with_assistant(
        &self,
        script: &str,
        classification: &ErrorClassification,
        full_log: &str,
    ) -> Result<FixOutcome, FixError> {
        let request = RewriteRequest::new(script, classification, full_log, self.max_log_chars);
        let reply = tokio::time::timeout(self.assistant_timeout, self.assistant.rewrite(&request))
            .await
            .map_err(|_| FixError::AssistantTimeout(self.assistant_timeout.as_secs()))??;
        let code = extract_code_block(&reply).ok_or(FixError::NoCodeBlock)?;
        Ok(FixOutcome {
            script: code,
            files_touched: Vec::new(),
            description: "rewrote script with the authoring assistant".to_string(),
        })
    }
}

/// The class the runner complained about.
pub fn class_name_from_log(log: &str) -> Option<String> {
    CLASS_NAME_RES
        .iter()
        .filter_map(|re| re.captures(log).map(|caps| (caps.get(0).map_or(0, |m| m.start()), caps[1].to_string())))
        .filter(|(_, name)| name != "default")
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, name)| name)
}

/// The module specifier the script imports `class` from.
pub fn import_specifier(script: &str, class: &str) -> Option<String> {
    let name = regex::escape(class);
    let patterns = [
        format!(r#"import\s*(?:type\s+)?\{{[^}}]*\b{name}\b[^}}]*\}}\s*from\s*['"]([^'"]+)['"]"#),
        format!(r#"import\s+{name}\s*(?:,\s*\{{[^}}]*\}})?\s*from\s*['"]([^'"]+)['"]"#),
        format!(r#"\b{name}\b[^\n=]*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#),
    ];
    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .find_map(|re| re.captures(script).map(|caps| caps[1].to_string()))
        .filter(|s| s.starts_with("./") || s.starts_with("../"))
}

/// The file a relative specifier points at, trying TypeScript's `.js`-for-`.ts` convention.
pub fn resolve_module(base_dir: &Path, specifier: &str) -> Option<PathBuf> {
    let raw = base_dir.join(specifier);
    let mut candidates = vec![raw.clone()];
    if let Some(stem) = specifier.strip_suffix(".js") {
        candidates.push(base_dir.join(format!("{}.ts", stem)));
        candidates.push(base_dir.join(format!("{}.tsx", stem)));
    }
    for ext in ["ts", "js", "tsx", "mjs"] {
        candidates.push(base_dir.join(format!("{}.{}", specifier, ext)));
    }
    candidates.push(raw.join("index.ts"));
    candidates.push(raw.join("index.js"));
    candidates
        .into_iter()
        .map(|p| normalize(&p))
        .find(|p| p.is_file())
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Append an export for `class` unless one exists. Returns whether the file changed.
pub fn ensure_exported(path: &Path, class: &str) -> Result<bool, FixError> {
    let source = std::fs::read_to_string(path).map_err(|source| FixError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let name = regex::escape(class);
    let exported = [
        format!(r"\bexport\s+(?:default\s+)?(?:abstract\s+)?class\s+{name}\b"),
        format!(r"\bexport\s*\{{[^}}]*\b{name}\b[^}}]*\}}"),
        format!(r"\bexport\s+default\s+{name}\b"),
        format!(r"\bmodule\.exports\s*=\s*\{{?[^;]*\b{name}\b"),
        format!(r"\b(?:module\.)?exports\.{name}\s*="),
    ];
    if exported
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .any(|re| re.is_match(&source))
    {
        return Ok(false);
    }
    let declared = Regex::new(&format!(r"\bclass\s+{name}\b"))
        .map(|re| re.is_match(&source))
        .unwrap_or(false);
    if !declared {
        return Err(FixError::ClassNotDeclared {
            class: class.to_string(),
            path: path.to_path_buf(),
        });
    }

    let commonjs = source.contains("require(") && !source.contains("import ");
    let mut updated = source;
    if !updated.ends_with('\n') {
        updated.push('\n');
    }
    if commonjs {
        updated.push_str(&format!("module.exports.{0} = {0};\n", class));
    } else {
        updated.push_str(&format!("export {{ {} }};\n", class));
    }
    patch::write_atomic(path, &updated)?;
    Ok(true)
}

/// Suffix extensionless relative specifiers. Returns the new text and how many changed.
pub fn add_import_extensions(script: &str, extension: &str) -> (String, usize) {
    let mut count = 0;
    let mut text = script.to_string();
    for (re, quote) in RELATIVE_IMPORT_RES.iter().zip(['\'', '"']) {
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                let specifier = &caps[2];
                if has_known_extension(specifier) || specifier.ends_with('/') {
                    return caps[0].to_string();
                }
                count += 1;
                format!("{}{q}{}{}{q}", &caps[1], specifier, extension, q = quote)
            })
            .into_owned();
    }
    (text, count)
}

fn has_known_extension(specifier: &str) -> bool {
    let last = specifier.rsplit('/').next().unwrap_or(specifier);
    if last == "." || last == ".." {
        return true;
    }
    last.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && KNOWN_EXTENSIONS.contains(&ext))
}
