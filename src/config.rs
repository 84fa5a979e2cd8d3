use crate::result::{ConduitError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;

/// Backend provider selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Sqlite,
    Postgresql,
}

impl FromStr for Provider {
    type Err = ConduitError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Provider::Sqlite),
            "postgresql" | "postgres" => Ok(Provider::Postgresql),
            _ => Err(ConduitError::UnsupportedProvider(s.to_string())),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provider::Sqlite => "sqlite",
            Provider::Postgresql => "postgresql",
        };
        write!(f, "{s}")
    }
}

/// Settings for an execution layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConduitConfig {
    pub provider: Provider,
    /// Opaque to this crate; interpreted by the provider
    pub connection_string: String,
    /// Identity of the calling user, carried as context only
    #[serde(default)]
    pub caller_id: Option<String>,
}

impl ConduitConfig {
    pub fn new(provider: Provider, connection_string: impl Into<String>) -> Self {
        ConduitConfig {
            provider,
            connection_string: connection_string.into(),
            caller_id: None,
        }
    }

    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    /// Load from a JSON object: `{"provider": "sqlite", "connection_string": "app.db"}`
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(json)?)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let json_str = fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&json_str)?;
        Self::from_json(json)
    }
}
