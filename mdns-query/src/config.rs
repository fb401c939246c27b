use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEFAULT_DOMAIN;
use crate::client::{ClientConfig, QueryParam, DEFAULT_QUEUE_CAPACITY, DEFAULT_TIMEOUT};
use crate::mdns::correlator::Completeness;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default, rename = "query")]
    pub queries: Vec<QuerySection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_enabled")]
    pub ipv4: bool,
    #[serde(default = "default_enabled")]
    pub ipv6: bool,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub completeness: Completeness,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuerySection {
    pub service: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub want_unicast_response: bool,
    #[serde(default)]
    pub disable_ipv4: bool,
    #[serde(default)]
    pub disable_ipv6: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            ipv4: default_enabled(),
            ipv6: default_enabled(),
            interface: None,
            completeness: Completeness::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl From<&ClientSection> for ClientConfig {
    fn from(section: &ClientSection) -> Self {
        ClientConfig {
            ipv4: section.ipv4,
            ipv6: section.ipv6,
            interface: section.interface.clone(),
            completeness: section.completeness,
            queue_capacity: section.queue_capacity,
        }
    }
}

impl From<&QuerySection> for QueryParam {
    fn from(section: &QuerySection) -> Self {
        QueryParam {
            service: section.service.clone(),
            domain: section.domain.clone(),
            timeout: Duration::from_millis(section.timeout_ms),
            interface: section.interface.clone(),
            want_unicast_response: section.want_unicast_response,
            disable_ipv4: section.disable_ipv4,
            disable_ipv6: section.disable_ipv6,
        }
        .with_defaults()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::from(&self.client)
    }

    pub fn query_params(&self) -> Vec<QueryParam> {
        self.queries.iter().map(QueryParam::from).collect()
    }
}
