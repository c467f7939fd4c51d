//! Retry Controller
//!
//! Drives one request through execute, classify, fix, retry until the runner
//! passes or the loop reaches a terminal state. Runner and assistant failures
//! are folded into the result as data; the controller itself never errors.

use crate::assistant::AuthoringAssistant;
use crate::classifier::{ErrorClassifier, SignatureClassifier};
use crate::config::MendConfig;
use crate::dispatch::{FixContext, FixDispatcher};
use crate::healing::TriedLocatorRegistry;
use crate::runner::{RunInvocation, RunOutcome, RunnerError, TestRunner};
use mend_common::protocol::{
    ErrorClassification, FixAttempt, TerminalState, TrialExecutionRequest, TrialExecutionResult,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum State {
    Ready,
    Executing,
    Classifying(RunOutcome),
    Fixing(ErrorClassification, String),
    Done(TerminalState),
}

/// Mutable bookkeeping for one request.
struct Run {
    script: String,
    logs: String,
    attempts: usize,
    fixes: Vec<FixAttempt>,
    registry: TriedLocatorRegistry,
    terminal_error: Option<String>,
}

impl Run {
    fn append_log(&mut self, log: &str) {
        self.logs
            .push_str(&format!("=== attempt {} ===\n", self.attempts));
        self.logs.push_str(log);
        if !log.ends_with('\n') {
            self.logs.push('\n');
        }
    }
}

#[derive(Clone)]
pub struct RetryController {
    config: Arc<MendConfig>,
    runner: Arc<dyn TestRunner>,
    classifier: Arc<dyn ErrorClassifier>,
    dispatcher: Arc<FixDispatcher>,
}

impl RetryController {
    pub fn new(
        config: MendConfig,
        runner: Arc<dyn TestRunner>,
        assistant: Arc<dyn AuthoringAssistant>,
    ) -> Self {
        let dispatcher = Arc::new(FixDispatcher::new(&config, assistant));
        Self {
            config: Arc::new(config),
            runner,
            classifier: Arc::new(SignatureClassifier::default()),
            dispatcher,
        }
    }

    /// Swap the matching strategy.
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &MendConfig {
        &self.config
    }

    pub async fn run(&self, request: TrialExecutionRequest) -> TrialExecutionResult {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        request: TrialExecutionRequest,
        cancel: CancellationToken,
    ) -> TrialExecutionResult {
        let max_attempts = self.config.retry.effective_max_attempts();
        let script_path = self.config.runner.script_path.clone();
        let timeout = Duration::from_secs(
            request
                .timeout_secs
                .unwrap_or(self.config.runner.timeout_secs),
        );

        let mut run = Run {
            script: request.script.clone(),
            logs: String::new(),
            attempts: 0,
            fixes: Vec::new(),
            registry: TriedLocatorRegistry::new(),
            terminal_error: None,
        };

        info!(
            work_dir = %request.work_dir.display(),
            max_attempts,
            recorded_actions = request.recorder_actions.len(),
            "starting trial execution"
        );

        let mut state = State::Ready;
        let terminal = loop {
            state = match state {
                State::Ready => State::Executing,

                State::Executing => {
                    if cancel.is_cancelled() {
                        State::Done(TerminalState::Cancelled)
                    } else {
                        run.attempts += 1;
                        debug!(attempt = run.attempts, "executing");
                        match self
                            .execute(&request, &script_path, &run.script, timeout, &cancel)
                            .await
                        {
                            None => State::Done(TerminalState::Cancelled),
                            Some(outcome) => {
                                run.append_log(&outcome.log);
                                if outcome.success {
                                    State::Done(TerminalState::Succeeded)
                                } else {
                                    State::Classifying(outcome)
                                }
                            }
                        }
                    }
                }

                State::Classifying(outcome) => match self.classifier.classify(&outcome.log) {
                    None => {
                        run.terminal_error = Some(format!(
                            "attempt {} failed with an unrecognised error",
                            run.attempts
                        ));
                        State::Done(TerminalState::ExhaustedNoClassification)
                    }
                    Some(classification) => {
                        info!(
                            attempt = run.attempts,
                            category = %classification.category,
                            matched = %classification.matched,
                            "classified failure"
                        );
                        if run.attempts >= max_attempts {
                            run.terminal_error = Some(format!(
                                "still failing after {} attempts: {}",
                                run.attempts, classification.category
                            ));
                            State::Done(TerminalState::ExhaustedMaxAttempts)
                        } else {
                            State::Fixing(classification, outcome.log)
                        }
                    }
                },

                State::Fixing(classification, log) => {
                    let mut ctx = FixContext {
                        work_dir: &request.work_dir,
                        script_path: &script_path,
                        recorder_actions: &request.recorder_actions,
                        registry: &mut run.registry,
                    };
                    let fixed = tokio::select! {
                        outcome = self.dispatcher.apply_fix(&run.script, &classification, &log, &mut ctx) => Some(outcome),
                        () = cancel.cancelled() => None,
                    };

                    match fixed {
                        None => State::Done(TerminalState::Cancelled),
                        Some(outcome) => {
                            let script_changed = outcome.script != run.script;
                            let files_changed = !outcome.files_touched.is_empty();
                            if !script_changed && !files_changed {
                                run.terminal_error = Some(format!(
                                    "{}: {}",
                                    classification.category.description(),
                                    outcome.description
                                ));
                                State::Done(TerminalState::ConvergedNoFix)
                            } else {
                                run.fixes.push(FixAttempt {
                                    attempt: run.attempts,
                                    category: classification.category,
                                    description: outcome.description,
                                    script_changed,
                                    files_changed,
                                    files_touched: outcome.files_touched,
                                });
                                run.script = outcome.script;
                                State::Executing
                            }
                        }
                    }
                }

                State::Done(terminal) => break terminal,
            };
        };

        if terminal == TerminalState::Cancelled {
            run.terminal_error = Some("run cancelled".to_string());
        }
        info!(
            state = terminal.code(),
            attempts = run.attempts,
            fixes = run.fixes.len(),
            "trial execution finished"
        );

        TrialExecutionResult {
            success: terminal == TerminalState::Succeeded,
            state: terminal,
            logs: run.logs,
            attempts: run.attempts,
            fixes: run.fixes,
            final_script: run.script,
            terminal_error: run.terminal_error,
        }
    }

    /// Materialise the script and run it once. `None` when cancelled.
    async fn execute(
        &self,
        request: &TrialExecutionRequest,
        script_path: &Path,
        script: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<RunOutcome> {
        if let Err(e) = write_script(&request.work_dir.join(script_path), script).await {
            warn!(error = %e, "failed to write script");
            return Some(RunOutcome::failed(format!(
                "[mend] failed to write {}: {}\n",
                script_path.display(),
                e
            )));
        }

        let invocation = RunInvocation {
            work_dir: request.work_dir.clone(),
            script_path: script_path.to_path_buf(),
            mode: request.mode,
            env: request.env.clone(),
            timeout,
        };
        match self.runner.run(&invocation, cancel).await {
            Ok(outcome) => Some(outcome),
            Err(RunnerError::Cancelled) => None,
            Err(e) => {
                warn!(error = %e, "runner failed");
                Some(RunOutcome::failed(format!("[mend] {}\n", e)))
            }
        }
    }
}

async fn write_script(path: &Path, script: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, script).await
}
