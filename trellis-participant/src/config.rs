//! Runtime configuration.

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use trellis_core::models::participant::participant_id_from_host_port;
use trellis_core::models::{is_valid_id, ClusterId, ParticipantId};

/// The default path to use for data storage.
pub const DEFAULT_DATA_PATH: &str = "/usr/local/trellis/data";
/// The default interval in milliseconds at which pending messages are processed.
const DEFAULT_MESSAGE_POLL_INTERVAL_MS: u64 = 100;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The cluster this participant belongs to.
    pub cluster_id: String,
    /// The ID of this participant, defaulting to `{host}_{port}`.
    #[serde(default)]
    pub participant_id: Option<String>,
    /// The host name this participant advertises.
    pub host: String,
    /// The port this participant advertises.
    pub port: u16,

    /// The path to the database on disk.
    #[serde(default = "default_data_path")]
    pub storage_data_path: String,
    /// Join the cluster on connect if this participant is not yet part of it.
    #[serde(default)]
    pub auto_join: bool,
    /// Create the cluster with the builtin state models if it does not exist.
    #[serde(default)]
    pub bootstrap_cluster: bool,
    /// The interval in milliseconds at which pending messages are processed.
    #[serde(default = "default_message_poll_interval_ms")]
    pub message_poll_interval_ms: u64,
}

impl Config {
    /// Create a new config instance from the runtime environment.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the identifiers and intervals of this config.
    pub fn validate(&self) -> Result<()> {
        ensure!(is_valid_id(&self.cluster_id), "invalid CLUSTER_ID `{}`", self.cluster_id);
        let participant_id = self.participant_id();
        ensure!(is_valid_id(participant_id.as_str()), "invalid participant ID `{}`", participant_id);
        ensure!(self.message_poll_interval_ms > 0, "MESSAGE_POLL_INTERVAL_MS must be greater than 0");
        Ok(())
    }

    pub fn cluster_id(&self) -> ClusterId {
        ClusterId::new(self.cluster_id.as_str())
    }

    /// The ID of this participant.
    pub fn participant_id(&self) -> ParticipantId {
        match self.participant_id.as_deref() {
            Some(id) => ParticipantId::new(id),
            None => participant_id_from_host_port(&self.host, self.port),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.message_poll_interval_ms)
    }
}

fn default_data_path() -> String {
    DEFAULT_DATA_PATH.to_string()
}

fn default_message_poll_interval_ms() -> u64 {
    DEFAULT_MESSAGE_POLL_INTERVAL_MS
}
