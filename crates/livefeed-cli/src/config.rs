//! Configuration file for the CLI.

use anyhow::Context;
use livefeed_client::ClientConfig;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_BASE: &str = "ws://127.0.0.1:8000/ws";
pub const DEFAULT_TYPE: &str = "processing_event";

/// Contents of the TOML file passed with `--config`.
///
/// ```toml
/// base = "wss://pipeline.example.com/ws"
/// types = ["processing_event"]
///
/// [client]
/// connect_timeout_ms = 5000
///
/// [client.reconnect]
/// base_delay_ms = 500
/// max_attempts = 8
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub base: Option<String>,
    pub types: Vec<String>,
    pub client: ClientConfig,
}

/// Effective settings after merging flags over the file over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base: String,
    pub types: Vec<String>,
    pub client: ClientConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn resolve(self, base: Option<String>, types: Vec<String>) -> Settings {
        let types = if !types.is_empty() {
            types
        } else if !self.types.is_empty() {
            self.types
        } else {
            vec![DEFAULT_TYPE.to_string()]
        };
        Settings {
            base: base
                .or(self.base)
                .unwrap_or_else(|| DEFAULT_BASE.to_string()),
            types,
            client: self.client,
        }
    }
}
