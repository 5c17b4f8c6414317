use super::schema::RetraceConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./retrace.yaml
    /// 2. ~/.retrace/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<RetraceConfig, ConfigError> {
        let local_config = PathBuf::from("./retrace.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home_config) = Self::home_config()
            && home_config.exists()
        {
            return Self::load_from(&home_config).await;
        }

        Ok(RetraceConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<RetraceConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// An empty document yields the defaults.
    pub fn parse(content: &str) -> Result<RetraceConfig, ConfigError> {
        if content.trim().is_empty() {
            return Ok(RetraceConfig::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn home_config() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".retrace").join("config.yaml"))
    }
}
