use super::schema::MendConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./mend.yaml
    /// 2. ~/.mend/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<MendConfig, ConfigError> {
        let local_config = PathBuf::from("./mend.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".mend").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(MendConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<MendConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: MendConfig = serde_yaml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &MendConfig) -> Result<(), ConfigError> {
    if config.runner.command.is_empty() {
        return Err(ConfigError::Invalid("runner.command must not be empty".into()));
    }
    if config.runner.script_path.is_absolute() {
        return Err(ConfigError::Invalid(
            "runner.script_path must be relative to the work dir".into(),
        ));
    }
    if let Some(endpoint) = &config.assistant.endpoint {
        url::Url::parse(endpoint)
            .map_err(|e| ConfigError::Invalid(format!("assistant.endpoint: {}", e)))?;
    }
    Ok(())
}
