use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Staging profile id cannot be empty")]
    EmptyProfileId,

    #[error("max_retries must be at least 1")]
    InvalidMaxRetries,

    #[error("max_connections must be at least 1")]
    InvalidMaxConnections,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Client-facing listener
    pub listener: Listener,
    /// Remote staging service
    pub staging: StagingConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.staging.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Remote staging service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StagingConfig {
    /// Base URL of the staging service
    ///
    /// Note: Uses the `url::Url` type for compile-time URL validation.
    /// Invalid URLs will be rejected during config deserialization.
    pub url: Url,
    /// Staging profile to open sessions against
    pub profile_id: String,
    /// HTTP Basic credentials
    pub username: String,
    pub password: String,
    /// Bounds how many consecutive failures are tolerated in one upload
    /// cycle before reporting permanent failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bound on concurrent uploads to the staging service. The target
    /// service tolerates little concurrency, so this stays small.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl StagingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.profile_id.is_empty() {
            return Err(ValidationError::EmptyProfileId);
        }
        if self.max_retries == 0 {
            return Err(ValidationError::InvalidMaxRetries);
        }
        if self.max_connections == 0 {
            return Err(ValidationError::InvalidMaxConnections);
        }
        Ok(())
    }
}

fn default_max_retries() -> u32 {
    8
}

fn default_max_connections() -> usize {
    5
}
