use super::schema::WorkflowConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./reel.yaml
    /// 2. ~/.reel/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<WorkflowConfig, ConfigError> {
        let local_config = PathBuf::from("./reel.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".reel").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(WorkflowConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<WorkflowConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: WorkflowConfig = serde_yaml::from_str(&content)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Explicit path if given, else the default lookup.
    pub async fn load(path: Option<&Path>) -> Result<WorkflowConfig, ConfigError> {
        match path {
            Some(path) => Self::load_from(path).await,
            None => Self::load_default().await,
        }
    }
}
