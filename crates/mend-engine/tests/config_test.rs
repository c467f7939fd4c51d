use mend_engine::config::schema::MendConfig;
use mend_engine::config::{ConfigError, ConfigLoader, HARD_MAX_ATTEMPTS};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

#[test]
fn test_default_values() {
    let config = MendConfig::default();
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.effective_max_attempts(), HARD_MAX_ATTEMPTS);
    assert_eq!(config.healing.text_length_limit, 50);
    assert_eq!(config.imports.extension, ".js");
    assert_eq!(config.runner.command, vec!["npx", "playwright", "test"]);
    assert_eq!(
        config.runner.script_path,
        PathBuf::from("tests/generated.spec.ts")
    );
    assert_eq!(config.runner.timeout_secs, 300);
    assert!(config.assistant.endpoint.is_none());
    assert_eq!(config.assistant.timeout_secs, 60);
}

#[tokio::test]
async fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
runner:
  command: ["pnpm", "exec", "playwright", "test"]
  timeout_secs: 90
retry:
  max_attempts: 3
healing:
  locator_dirs:
    - "e2e/pages"
assistant:
  endpoint: "http://localhost:8080/v1/chat/completions"
    "#
    )
    .unwrap();

    let config = ConfigLoader::load_from(file.path())
        .await
        .expect("Failed to load config from file");

    assert_eq!(config.runner.command[0], "pnpm");
    assert_eq!(config.runner.timeout_secs, 90);
    // Unset fields keep their defaults.
    assert_eq!(config.runner.visible_flag.as_deref(), Some("--headed"));
    assert_eq!(config.retry.effective_max_attempts(), 3);
    assert_eq!(config.healing.locator_dirs, vec![PathBuf::from("e2e/pages")]);
    assert_eq!(config.healing.text_length_limit, 50);
    assert_eq!(config.imports.extension, ".js");
    assert!(config.assistant.endpoint.is_some());
}

#[test]
fn test_attempts_are_clamped() {
    let mut config = MendConfig::default();
    config.retry.max_attempts = 12;
    assert_eq!(config.retry.effective_max_attempts(), 5);
    config.retry.max_attempts = 0;
    assert_eq!(config.retry.effective_max_attempts(), 1);
}

#[tokio::test]
async fn test_load_from_nonexistent_file() {
    let result =
        ConfigLoader::load_from(std::path::Path::new("/nonexistent/path/mend.yaml")).await;
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[tokio::test]
async fn test_invalid_yaml_is_parse_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "retry: [not, a, map").unwrap();
    let result = ConfigLoader::load_from(file.path()).await;
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[tokio::test]
async fn test_validation_rejects_bad_values() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "runner:\n  command: []").unwrap();
    assert!(matches!(
        ConfigLoader::load_from(file.path()).await,
        Err(ConfigError::Invalid(_))
    ));

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "assistant:\n  endpoint: \"not a url\"").unwrap();
    assert!(matches!(
        ConfigLoader::load_from(file.path()).await,
        Err(ConfigError::Invalid(_))
    ));
}
