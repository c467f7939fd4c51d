//! Concurrent execution of independent requests.
//!
//! Every request runs against its own copy of its work dir and its own
//! locator registry, so patches made by one run are invisible to the others.

use crate::controller::RetryController;
use mend_common::protocol::{TrialExecutionRequest, TrialExecutionResult};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Directories never copied into an isolated work dir.
const SHARED_DIRS: &[&str] = &["node_modules"];

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Failed to copy {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Batch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A finished run and the private work dir it ran in.
pub struct IsolatedRun {
    pub result: TrialExecutionResult,
    pub work_dir: TempDir,
}

/// Run every request concurrently; results are returned in request order.
pub async fn run_isolated(
    controller: &RetryController,
    requests: Vec<TrialExecutionRequest>,
    cancel: CancellationToken,
) -> Result<Vec<IsolatedRun>, BatchError> {
    let total = requests.len();
    let mut join_set = JoinSet::new();

    for (index, mut request) in requests.into_iter().enumerate() {
        let source = request.work_dir.clone();
        let copy = tokio::task::spawn_blocking(move || isolate(&source)).await??;
        debug!(
            index,
            source = %request.work_dir.display(),
            copy = %copy.path().display(),
            "isolated work dir"
        );
        request.work_dir = copy.path().to_path_buf();

        let controller = controller.clone();
        let cancel = cancel.child_token();
        join_set.spawn(async move {
            let result = controller.run_with_cancel(request, cancel).await;
            (
                index,
                IsolatedRun {
                    result,
                    work_dir: copy,
                },
            )
        });
    }

    let mut slots: Vec<Option<IsolatedRun>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        let (index, run) = joined?;
        slots[index] = Some(run);
    }
    let runs: Vec<IsolatedRun> = slots.into_iter().flatten().collect();
    info!(
        total,
        succeeded = runs.iter().filter(|r| r.result.success).count(),
        "batch finished"
    );
    Ok(runs)
}

/// Copy `source` into a fresh temp dir.
pub fn isolate(source: &Path) -> Result<TempDir, BatchError> {
    let dir = tempfile::Builder::new()
        .prefix("mend-")
        .tempdir()
        .map_err(|e| copy_err(source, e))?;
    copy_tree(source, dir.path())?;
    Ok(dir)
}

/// Copy a tree without following symlinks; links are recreated as links.
fn copy_tree(from: &Path, to: &Path) -> Result<(), BatchError> {
    let root = from.canonicalize().map_err(|e| copy_err(from, e))?;
    let mut entries = WalkDir::new(from).follow_links(false).min_depth(1).into_iter();
    while let Some(entry) = entries.next() {
        let entry = entry.map_err(|e| walk_err(from, e))?;
        let path = entry.path();
        let target = to.join(path.strip_prefix(from).unwrap_or(path));
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if SHARED_DIRS.iter().any(|d| entry.file_name() == *d) {
                link_shared(path, &target)?;
                entries.skip_current_dir();
                continue;
            }
            std::fs::create_dir_all(&target).map_err(|e| copy_err(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(&root, path, &target)?;
        } else {
            std::fs::copy(path, &target).map_err(|e| copy_err(path, e))?;
        }
    }
    Ok(())
}

/// Relative links that stay inside the tree are kept as written; ones that
/// leave it are pointed at their absolute destination.
#[cfg(unix)]
fn copy_symlink(root: &Path, path: &Path, target: &Path) -> Result<(), BatchError> {
    let link = std::fs::read_link(path).map_err(|e| copy_err(path, e))?;
    let resolved = path
        .parent()
        .map(|dir| dir.join(&link))
        .and_then(|p| p.canonicalize().ok());
    let destination = match resolved {
        Some(resolved) if link.is_relative() && !resolved.starts_with(root) => resolved,
        _ => link,
    };
    std::os::unix::fs::symlink(&destination, target).map_err(|e| copy_err(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(_root: &Path, path: &Path, target: &Path) -> Result<(), BatchError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => std::fs::copy(path, target)
            .map(|_| ())
            .map_err(|e| copy_err(path, e)),
        _ => {
            debug!(link = %path.display(), "not copying symlink on this platform");
            Ok(())
        }
    }
}

#[cfg(unix)]
fn link_shared(path: &Path, target: &Path) -> Result<(), BatchError> {
    let absolute = path.canonicalize().map_err(|e| copy_err(path, e))?;
    std::os::unix::fs::symlink(&absolute, target).map_err(|e| copy_err(target, e))
}

#[cfg(not(unix))]
fn link_shared(path: &Path, _target: &Path) -> Result<(), BatchError> {
    debug!(dir = %path.display(), "not linking shared dir on this platform");
    Ok(())
}

fn walk_err(root: &Path, e: walkdir::Error) -> BatchError {
    let path = e.path().unwrap_or(root).to_path_buf();
    copy_err(&path, e.into())
}

fn copy_err(path: &Path, source: std::io::Error) -> BatchError {
    BatchError::Copy {
        path: path.to_path_buf(),
        source,
    }
}
