use namio_core::{NamioError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub directive: DirectiveConfig,
}

/// Client-facing listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_bind")]
    pub bind_addr: String,
}

/// Storage-node-facing listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_registration_bind")]
    pub bind_addr: String,
}

/// Outbound create/delete calls to storage nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveConfig {
    #[serde(default = "default_directive_timeout")]
    pub timeout_secs: u64,
}

fn default_service_bind() -> String {
    "127.0.0.1:6000".to_string()
}

fn default_registration_bind() -> String {
    "127.0.0.1:6001".to_string()
}

fn default_directive_timeout() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_service_bind(),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_registration_bind(),
        }
    }
}

impl Default for DirectiveConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_directive_timeout(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("NAMIO"))
            .build()
            .map_err(|e| NamioError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| NamioError::Config(e.to_string()))?;

        Ok(config)
    }
}
