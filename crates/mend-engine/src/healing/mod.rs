//! Locator Healing
//!
//! Picks a replacement for a failing selector and writes it into the
//! project's locator and page-object sources.

pub mod candidates;
pub mod patch;
pub mod registry;
pub mod selector;

pub use patch::PatchError;
pub use registry::TriedLocatorRegistry;

use crate::config::schema::HealingConfig;
use mend_common::protocol::{LocatorCandidate, RecorderAction};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HealError {
    #[error("Refusing to heal degenerate selector '{0}'")]
    DegenerateSelector(String),
    #[error(transparent)]
    Patch(#[from] PatchError),
}

#[derive(Debug, Clone)]
pub struct HealOutcome {
    pub candidate: LocatorCandidate,
    /// Absolute paths of the locator files rewritten.
    pub patched_files: Vec<PathBuf>,
}

pub struct LocatorHealer {
    config: HealingConfig,
}

impl LocatorHealer {
    pub fn new(config: HealingConfig) -> Self {
        Self { config }
    }

    pub fn candidates(
        &self,
        failing: &str,
        actions: &[RecorderAction],
        error_text: &str,
    ) -> Vec<LocatorCandidate> {
        candidates::generate(failing, actions, error_text, self.config.text_length_limit)
    }

    /// The first candidate not yet tried for `failing`, recorded as tried.
    ///
    /// `Ok(None)` once the pool is exhausted.
    pub fn select(
        &self,
        failing: &str,
        registry: &mut TriedLocatorRegistry,
        actions: &[RecorderAction],
        error_text: &str,
    ) -> Result<Option<LocatorCandidate>, HealError> {
        if selector::is_degenerate(failing) {
            return Err(HealError::DegenerateSelector(failing.to_string()));
        }

        let pool = self.candidates(failing, actions, error_text);
        let pool_size = pool.len();
        let chosen = pool.into_iter().find(|c| {
            !registry.has_tried(failing, &c.selector) && !registry.has_failed(&c.selector)
        });

        match &chosen {
            Some(candidate) => {
                registry.record(failing, &candidate.selector);
                debug!(
                    failing,
                    candidate = %candidate.selector,
                    origin = ?candidate.origin,
                    pool_size,
                    "selected locator candidate"
                );
            }
            None => info!(failing, pool_size, "no untried locator candidate left"),
        }
        Ok(chosen)
    }

    /// Select a candidate and write it into every locator source that quotes `failing`.
    pub fn heal(
        &self,
        failing: &str,
        registry: &mut TriedLocatorRegistry,
        actions: &[RecorderAction],
        error_text: &str,
        work_dir: &Path,
    ) -> Result<Option<HealOutcome>, HealError> {
        let Some(candidate) = self.select(failing, registry, actions, error_text)? else {
            return Ok(None);
        };
        let files = patch::locator_sources(
            work_dir,
            &self.config.locator_dirs,
            &self.config.source_extensions,
        )?;
        let patched_files = patch::patch_files(&files, failing, &candidate.selector)?;
        Ok(Some(HealOutcome {
            candidate,
            patched_files,
        }))
    }
}
