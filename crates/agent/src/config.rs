//! Agent configuration

use anyhow::Result;
use serde::Deserialize;

/// Binary-level configuration, loaded from `COOLING_`-prefixed environment
/// variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Identifier used in status messages and logs
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Act-observe-train cadence in milliseconds
    #[serde(default = "default_action_interval")]
    pub action_interval_ms: u64,

    /// Passive environment tick cadence in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Outside-conditions polling cadence in seconds
    #[serde(default = "default_external_interval")]
    pub external_interval_secs: u64,

    /// Checkpoint directory
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Resume from the latest checkpoint when one exists
    #[serde(default = "default_resume")]
    pub resume: bool,
}

fn default_agent_id() -> String {
    std::env::var("AGENT_ID").unwrap_or_else(|_| "data_center".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_action_interval() -> u64 {
    1000
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_external_interval() -> u64 {
    30
}

fn default_checkpoint_dir() -> String {
    "./checkpoints".to_string()
}

fn default_resume() -> bool {
    true
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("COOLING"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| AgentConfig {
            agent_id: default_agent_id(),
            api_port: default_api_port(),
            action_interval_ms: default_action_interval(),
            metrics_interval_secs: default_metrics_interval(),
            external_interval_secs: default_external_interval(),
            checkpoint_dir: default_checkpoint_dir(),
            resume: default_resume(),
        }))
    }
}
