use std::time::Duration;

use anyhow::{Context, Error};
use config::Config;

use crate::domain::{retry::ConflictRetry, wait::WaitConfig, ClientConfig};

#[derive(Debug, Clone, Copy, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Kubernetes,
    Memory,
}

#[derive(Debug, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub namespace: String,
    pub listen_address: String,
    pub backend: Backend,
    /// Deadline of a whole wait, stream restarts included.
    pub watch_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub retry_backoff_millis: u64,
    pub update_retries: u32,
    pub conflict_backoff_millis: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            listen_address: "0.0.0.0:3000".to_string(),
            backend: Backend::Kubernetes,
            watch_timeout_seconds: 120,
            poll_interval_seconds: 5,
            retry_backoff_millis: 250,
            update_retries: 5,
            conflict_backoff_millis: 10,
        }
    }
}

impl AppConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            wait: WaitConfig {
                timeout: Duration::from_secs(self.watch_timeout_seconds),
                retry_backoff: Duration::from_millis(self.retry_backoff_millis),
            },
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            conflict_retry: ConflictRetry {
                attempts: self.update_retries.max(1),
                backoff: Duration::from_millis(self.conflict_backoff_millis),
            },
        }
    }
}

pub fn load_config() -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(config::Environment::with_prefix("rokku").try_parsing(true))
        .build()
        .context("Can't load configuration")?;

    config
        .try_deserialize()
        .context("Can't deserialize AppConfig from loaded configuration")
}
