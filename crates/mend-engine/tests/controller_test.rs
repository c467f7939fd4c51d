use async_trait::async_trait;
use mend_engine::assistant::{AssistantError, AuthoringAssistant, DisabledAssistant, RewriteRequest};
use mend_engine::config::MendConfig;
use mend_engine::controller::RetryController;
use mend_engine::protocol::{TerminalState, TrialExecutionRequest};
use mend_engine::runner::{RunInvocation, RunOutcome, RunnerError, TestRunner};
use mend_engine::ErrorCategory;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn passed(log: &str) -> RunOutcome {
    RunOutcome {
        success: true,
        exit_code: Some(0),
        log: log.to_string(),
        timed_out: false,
        duration: Duration::from_millis(10),
    }
}

fn failed(log: &str) -> RunOutcome {
    RunOutcome {
        success: false,
        exit_code: Some(1),
        ..passed(log)
    }
}

/// Decides each run's outcome from the files on disk at run time.
struct FnRunner<F> {
    decide: F,
    scripts: Mutex<Vec<String>>,
}

impl<F> FnRunner<F>
where
    F: Fn(&Path, &str) -> RunOutcome + Send + Sync,
{
    fn new(decide: F) -> Self {
        Self {
            decide,
            scripts: Mutex::new(Vec::new()),
        }
    }

    fn runs(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl<F> TestRunner for FnRunner<F>
where
    F: Fn(&Path, &str) -> RunOutcome + Send + Sync,
{
    async fn run(
        &self,
        invocation: &RunInvocation,
        _cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunnerError> {
        let script =
            std::fs::read_to_string(invocation.work_dir.join(&invocation.script_path)).unwrap();
        self.scripts.lock().unwrap().push(script.clone());
        Ok((self.decide)(&invocation.work_dir, &script))
    }
}

/// Answers every rewrite with a new revision of the script.
#[derive(Default)]
struct RevisingAssistant {
    calls: AtomicUsize,
}

#[async_trait]
impl AuthoringAssistant for RevisingAssistant {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String, AssistantError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("```ts\n// revision {}\n{}```", n, request.script))
    }
}

fn controller(runner: Arc<dyn TestRunner>) -> RetryController {
    RetryController::new(MendConfig::default(), runner, Arc::new(DisabledAssistant))
}

#[tokio::test]
async fn test_success_on_first_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FnRunner::new(|_: &Path, _: &str| passed("  1 passed (1.2s)\n")));
    let result = controller(runner.clone())
        .run(TrialExecutionRequest::new("test('a', async () => {});\n", dir.path()))
        .await;

    assert!(result.success);
    assert_eq!(result.state, TerminalState::Succeeded);
    assert_eq!(result.attempts, 1);
    assert!(result.fixes.is_empty());
    assert!(result.terminal_error.is_none());
    assert!(result.logs.starts_with("=== attempt 1 ===\n"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("tests/generated.spec.ts")).unwrap(),
        "test('a', async () => {});\n"
    );
    assert_eq!(runner.runs(), 1);
}

#[tokio::test]
async fn test_unclassifiable_failure_stops_after_one_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FnRunner::new(|_: &Path, _: &str| {
        failed("Something odd happened in the browser\n")
    }));
    let result = controller(runner.clone())
        .run(TrialExecutionRequest::new("x", dir.path()))
        .await;

    assert!(!result.success);
    assert_eq!(result.state, TerminalState::ExhaustedNoClassification);
    assert_eq!(result.attempts, 1);
    assert!(result.terminal_error.is_some());
    assert_eq!(runner.runs(), 1);
}

#[tokio::test]
async fn test_attempts_never_exceed_hard_cap() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FnRunner::new(|_: &Path, _: &str| {
        failed("SyntaxError: Unexpected token '}'\n    at tests/generated.spec.ts:3:1\n")
    }));
    let mut config = MendConfig::default();
    config.retry.max_attempts = 50;
    let controller = RetryController::new(
        config,
        runner.clone(),
        Arc::new(RevisingAssistant::default()),
    );

    let result = controller
        .run(TrialExecutionRequest::new("test('a');\n", dir.path()))
        .await;

    assert_eq!(result.state, TerminalState::ExhaustedMaxAttempts);
    assert_eq!(result.attempts, 5);
    assert_eq!(runner.runs(), 5);
    assert_eq!(result.fixes.len(), 4);
    assert!(result.fixes.iter().all(|f| f.category == ErrorCategory::SyntaxError));
    assert!(result.fixes.iter().all(|f| f.script_changed && !f.files_changed));
    assert!(result.final_script.starts_with("// revision 4\n"));
    for n in 1..=5 {
        assert!(result.logs.contains(&format!("=== attempt {} ===", n)));
    }
}

#[tokio::test]
async fn test_lower_configured_limit_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FnRunner::new(|_: &Path, _: &str| {
        failed("SyntaxError: Unexpected token\n")
    }));
    let mut config = MendConfig::default();
    config.retry.max_attempts = 2;
    let controller = RetryController::new(
        config,
        runner.clone(),
        Arc::new(RevisingAssistant::default()),
    );

    let result = controller
        .run(TrialExecutionRequest::new("a", dir.path()))
        .await;
    assert_eq!(result.attempts, 2);
    assert_eq!(result.fixes.len(), 1);
    assert_eq!(result.state, TerminalState::ExhaustedMaxAttempts);
}

#[tokio::test]
async fn test_unexported_page_class_is_fixed_in_module() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("pages")).unwrap();
    let module = dir.path().join("pages/LoginPage.ts");
    std::fs::write(
        &module,
        "import { Page } from '@playwright/test';\n\nclass LoginPage {\n  constructor(readonly page: Page) {}\n}\n",
    )
    .unwrap();

    let runner = Arc::new(FnRunner::new(|work_dir: &Path, _: &str| {
        let source = std::fs::read_to_string(work_dir.join("pages/LoginPage.ts")).unwrap();
        if source.contains("export { LoginPage };") {
            passed("  1 passed\n")
        } else {
            failed(
                "TypeError: _LoginPage.LoginPage is not a constructor\n    at tests/generated.spec.ts:5:17\n",
            )
        }
    }));
    let script = "import { test } from '@playwright/test';\nimport { LoginPage } from '../pages/LoginPage';\n\ntest('login', async ({ page }) => {\n  const login = new LoginPage(page);\n});\n";

    let result = controller(runner)
        .run(TrialExecutionRequest::new(script, dir.path()))
        .await;

    assert!(result.success);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.fixes.len(), 1);
    let fix = &result.fixes[0];
    assert_eq!(fix.category, ErrorCategory::ExportConstructor);
    assert!(!fix.script_changed);
    assert!(fix.files_changed);
    assert_eq!(fix.files_touched, vec!["pages/LoginPage.ts".to_string()]);
    assert_eq!(result.final_script, script);
}

#[tokio::test]
async fn test_missing_data_file_converges_without_fix() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FnRunner::new(|_: &Path, _: &str| {
        failed("Error: ENOENT: no such file or directory, open 'data/users.csv'\n")
    }));
    let result = controller(runner.clone())
        .run(TrialExecutionRequest::new("x", dir.path()))
        .await;

    assert_eq!(result.state, TerminalState::ConvergedNoFix);
    assert_eq!(result.attempts, 1);
    assert!(result.fixes.is_empty());
    assert_eq!(result.final_script, "x");
    assert_eq!(runner.runs(), 1);
}

#[tokio::test]
async fn test_assistant_failure_is_no_fix() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FnRunner::new(|_: &Path, _: &str| {
        failed("Error: foo is not a function\n")
    }));
    let result = controller(runner)
        .run(TrialExecutionRequest::new("x", dir.path()))
        .await;

    assert_eq!(result.state, TerminalState::ConvergedNoFix);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_locator_is_healed_from_runner_suggestion() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("locators")).unwrap();
    std::fs::write(
        dir.path().join("locators/login.ts"),
        "export const signIn = '#signin';\n",
    )
    .unwrap();

    let runner = Arc::new(FnRunner::new(|_: &Path, script: &str| {
        if script.contains("login-button") {
            passed("  1 passed\n")
        } else {
            failed(
                "Error: locator.click: Timeout 5000ms exceeded.\nCall log:\n  - waiting for locator('#signin')\n  - locator resolved to <button data-testid=\"login-button\">Sign in</button> aka getByTestId('login-button')\n",
            )
        }
    }));
    let script = "test('login', async ({ page }) => {\n  await page.locator('#signin').click();\n});\n";

    let result = controller(runner)
        .run(TrialExecutionRequest::new(script, dir.path()))
        .await;

    assert!(result.success);
    assert_eq!(result.attempts, 2);
    let fix = &result.fixes[0];
    assert_eq!(fix.category, ErrorCategory::LocatorNotFound);
    assert!(fix.script_changed);
    assert_eq!(fix.files_touched, vec!["locators/login.ts".to_string()]);
    assert!(
        std::fs::read_to_string(dir.path().join("locators/login.ts"))
            .unwrap()
            .contains("login-button")
    );
}

#[tokio::test]
async fn test_runner_error_is_captured_in_logs() {
    struct BrokenRunner;

    #[async_trait]
    impl TestRunner for BrokenRunner {
        async fn run(
            &self,
            _invocation: &RunInvocation,
            _cancel: &CancellationToken,
        ) -> Result<RunOutcome, RunnerError> {
            Err(RunnerError::Spawn {
                program: "npx".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let result = controller(Arc::new(BrokenRunner))
        .run(TrialExecutionRequest::new("x", dir.path()))
        .await;

    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert!(result.logs.contains("Failed to start runner 'npx'"));
    assert_eq!(result.state, TerminalState::ExhaustedNoClassification);
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    struct HangingRunner;

    #[async_trait]
    impl TestRunner for HangingRunner {
        async fn run(
            &self,
            _invocation: &RunInvocation,
            cancel: &CancellationToken,
        ) -> Result<RunOutcome, RunnerError> {
            cancel.cancelled().await;
            Err(RunnerError::Cancelled)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = controller(Arc::new(HangingRunner))
        .run_with_cancel(TrialExecutionRequest::new("x", dir.path()), cancel)
        .await;

    assert!(!result.success);
    assert_eq!(result.state, TerminalState::Cancelled);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_cancellation_during_fix_leaves_script_untouched() {
    /// Takes far longer than the test is willing to wait.
    struct SlowAssistant;

    #[async_trait]
    impl AuthoringAssistant for SlowAssistant {
        async fn rewrite(&self, _request: &RewriteRequest) -> Result<String, AssistantError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("```ts\n// rewritten\n```".into())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FnRunner::new(|_: &Path, _: &str| {
        failed("SyntaxError: Unexpected token '}'\n")
    }));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let script = "test('a', async () => {\n});\n";
    let controller = RetryController::new(MendConfig::default(), runner.clone(), Arc::new(SlowAssistant));
    let started = std::time::Instant::now();
    let result = controller
        .run_with_cancel(TrialExecutionRequest::new(script, dir.path()), cancel)
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.state, TerminalState::Cancelled);
    assert_eq!(result.attempts, 1);
    assert!(result.fixes.is_empty());
    assert_eq!(result.final_script, script);
    assert_eq!(runner.runs(), 1);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("tests/generated.spec.ts")).unwrap(),
        script
    );
}
