use anyhow::{Context, bail};
use mend_common::formatter::{format_candidates, format_classification, format_env, format_result};
use mend_common::protocol::{ExecutionMode, RecorderAction, TrialExecutionRequest};
use mend_engine::assistant::{AuthoringAssistant, DisabledAssistant, HttpAssistant};
use mend_engine::classifier;
use mend_engine::config::{ConfigLoader, MendConfig};
use mend_engine::controller::RetryController;
use mend_engine::healing::{LocatorHealer, selector};
use mend_engine::runner::ProcessRunner;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct RunOptions {
    pub script: PathBuf,
    pub work_dir: PathBuf,
    pub visible: bool,
    pub recording: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Option<u64>,
    pub json: bool,
}

pub fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

pub async fn load_config(path: Option<&Path>) -> anyhow::Result<MendConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from(path).await,
        None => ConfigLoader::load_default().await,
    };
    config.context("failed to load configuration")
}

async fn load_recording(path: Option<&Path>) -> anyhow::Result<Vec<RecorderAction>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read recording {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid recording {}", path.display()))
}

fn build_assistant(config: &MendConfig) -> Arc<dyn AuthoringAssistant> {
    if config.assistant.endpoint.is_none() {
        return Arc::new(DisabledAssistant);
    }
    match HttpAssistant::from_config(&config.assistant) {
        Ok(assistant) => Arc::new(assistant),
        Err(e) => {
            warn!(error = %e, "authoring assistant unavailable");
            Arc::new(DisabledAssistant)
        }
    }
}

/// Returns whether the script ended up passing.
pub async fn run(config: MendConfig, options: RunOptions) -> anyhow::Result<bool> {
    if !options.work_dir.is_dir() {
        bail!("work dir {} does not exist", options.work_dir.display());
    }
    let script = tokio::fs::read_to_string(&options.script)
        .await
        .with_context(|| format!("failed to read script {}", options.script.display()))?;
    let actions = load_recording(options.recording.as_deref()).await?;

    let mode = if options.visible {
        ExecutionMode::Visible
    } else {
        ExecutionMode::Headless
    };
    let mut request = TrialExecutionRequest::new(script, &options.work_dir)
        .with_mode(mode)
        .with_recorder_actions(actions);
    request.env = options.env;
    request.timeout_secs = options.timeout;
    if !request.env.is_empty() {
        info!("runner environment:\n{}", format_env(&request.env));
    }

    let runner = Arc::new(ProcessRunner::new(config.runner.clone()));
    let assistant = build_assistant(&config);
    let controller = RetryController::new(config, runner, assistant);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; stopping");
            ctrl_c.cancel();
        }
    });

    let result = controller.run_with_cancel(request, cancel).await;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", format_result(&result));
    }
    Ok(result.success)
}

/// Returns whether any signature matched.
pub async fn classify(log_file: &Path, json: bool) -> anyhow::Result<bool> {
    let log = tokio::fs::read_to_string(log_file)
        .await
        .with_context(|| format!("failed to read log {}", log_file.display()))?;
    let classification = classifier::classify(&log);
    match (&classification, json) {
        (_, true) => println!("{}", serde_json::to_string_pretty(&classification)?),
        (Some(c), false) => println!("{}", format_classification(c)),
        (None, false) => println!("No known error signature matched."),
    }
    Ok(classification.is_some())
}

pub async fn candidates(
    config: &MendConfig,
    failing: &str,
    log_file: Option<&Path>,
    recording: Option<&Path>,
) -> anyhow::Result<()> {
    if selector::is_degenerate(failing) {
        bail!("'{}' is too generic to heal", failing);
    }
    let error_text = match log_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read log {}", path.display()))?,
        None => String::new(),
    };
    let actions = load_recording(recording).await?;
    let healer = LocatorHealer::new(config.healing.clone());
    let candidates = healer.candidates(failing, &actions, &error_text);
    if candidates.is_empty() {
        println!("No replacement candidates for '{}'.", failing);
    } else {
        print!("{}", format_candidates(&candidates));
    }
    Ok(())
}
