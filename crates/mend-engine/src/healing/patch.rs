//! In-place selector substitution across locator and page-object sources.
//!
//! A patch is staged: every changed file is first written to a temp file in
//! its own directory, and only once all of them are written are they renamed
//! over the originals. If a rename fails the files already replaced are
//! restored, so a multi-file patch is either fully applied or not at all.

use super::selector::is_locator_call;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

const QUOTES: [char; 3] = ['\'', '"', '`'];

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Escape `s` for a JS string literal delimited by `quote`.
fn js_escape(s: &str, quote: char) -> String {
    s.replace('\\', "\\\\")
        .replace(quote, &format!("\\{}", quote))
}

/// Replace every quoted occurrence of `old` with `new`. `None` when nothing matched.
pub fn replace_quoted(text: &str, old: &str, new: &str) -> Option<String> {
    let mut out = text.to_string();
    let mut changed = false;
    for q in QUOTES {
        let replacement = format!("{q}{}{q}", js_escape(new, q));
        let mut variants = vec![format!("{q}{}{q}", old), format!("{q}{}{q}", js_escape(old, q))];
        variants.dedup();
        for variant in variants {
            if variant != replacement && out.contains(&variant) {
                out = out.replace(&variant, &replacement);
                changed = true;
            }
        }
    }
    changed.then_some(out)
}

/// Replace a failing locator in source text.
///
/// Engine selectors are swapped inside their string literal. A failing
/// `getBy*(...)` call is swapped as a whole for `locator('<new>')`.
pub fn replace_locator(text: &str, old: &str, new: &str) -> Option<String> {
    if is_locator_call(old) {
        let call = format!("locator('{}')", js_escape(new, '\''));
        return text.contains(old).then(|| text.replace(old, &call));
    }
    replace_quoted(text, old, new)
}

/// Source files under the locator directories with one of the given extensions.
pub fn locator_sources(
    work_dir: &Path,
    dirs: &[PathBuf],
    extensions: &[String],
) -> Result<Vec<PathBuf>, PatchError> {
    let mut files = BTreeSet::new();
    for dir in dirs {
        let base = work_dir.join(dir);
        if !base.is_dir() {
            continue;
        }
        let escaped = glob::Pattern::escape(&base.to_string_lossy());
        for ext in extensions {
            let pattern = format!("{}/**/*.{}", escaped, ext);
            for entry in glob::glob(&pattern)? {
                match entry {
                    Ok(path) if path.is_file() => {
                        files.insert(path);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "skipping unreadable path"),
                }
            }
        }
    }
    Ok(files.into_iter().collect())
}

struct Staged {
    /// Path as listed by the caller, used for reporting.
    path: PathBuf,
    /// File actually replaced, with symlinks resolved.
    target: PathBuf,
    original: String,
    temp: NamedTempFile,
}

/// Rewrite `old` to `new` in every matching file; returns the files changed.
pub fn patch_files(files: &[PathBuf], old: &str, new: &str) -> Result<Vec<PathBuf>, PatchError> {
    commit(stage_patch(files, old, new)?)
}

fn stage_patch(files: &[PathBuf], old: &str, new: &str) -> Result<Vec<Staged>, PatchError> {
    let mut staged: Vec<Staged> = Vec::new();
    for path in files {
        let target = resolve_target(path);
        if staged.iter().any(|s| s.target == target) {
            continue;
        }
        let original = std::fs::read_to_string(&target).map_err(|source| PatchError::Read {
            path: path.clone(),
            source,
        })?;
        let Some(updated) = replace_locator(&original, old, new) else {
            continue;
        };
        let temp = stage(&target, &updated)?;
        staged.push(Staged {
            path: path.clone(),
            target,
            original,
            temp,
        });
    }
    Ok(staged)
}

fn commit(staged: Vec<Staged>) -> Result<Vec<PathBuf>, PatchError> {
    // Dropping `staged` on an early return removes the temp files.
    let mut committed: Vec<(PathBuf, PathBuf, String)> = Vec::new();
    for Staged {
        path,
        target,
        original,
        temp,
    } in staged
    {
        if let Err(e) = temp.persist(&target) {
            rollback(&committed);
            return Err(PatchError::Write {
                path,
                source: e.error,
            });
        }
        debug!(file = %path.display(), "patched selector");
        committed.push((path, target, original));
    }
    Ok(committed.into_iter().map(|(path, _, _)| path).collect())
}

/// Symlinks are followed so the link survives and its target is patched.
fn resolve_target(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Temp file next to `target` holding `contents`, with `target`'s permissions.
fn stage(target: &Path, contents: &str) -> Result<NamedTempFile, PatchError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let write_err = |source| PatchError::Write {
        path: target.to_path_buf(),
        source,
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
    temp.write_all(contents.as_bytes()).map_err(write_err)?;
    temp.flush().map_err(write_err)?;
    if let Ok(meta) = std::fs::metadata(target) {
        temp.as_file()
            .set_permissions(meta.permissions())
            .map_err(write_err)?;
    }
    Ok(temp)
}

/// Replace a single file's contents through a temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), PatchError> {
    let target = resolve_target(path);
    stage(&target, contents)?
        .persist(&target)
        .map_err(|e| PatchError::Write {
            path: path.to_path_buf(),
            source: e.error,
        })?;
    Ok(())
}

fn rollback(committed: &[(PathBuf, PathBuf, String)]) {
    for (path, target, original) in committed {
        if let Err(e) = std::fs::write(target, original) {
            warn!(file = %path.display(), error = %e, "failed to restore file after partial patch");
        }
    }
}

/// `path` relative to `root` with forward slashes, for reporting.
pub fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
