//! Environment-backed runtime configuration for `vane-term`.

use std::{env, error::Error, fmt};

use vane_core::{ChatBackend, DisplayZone};
use vane_http::{Endpoints, RuntimeConfig};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5678/";
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Runtime configuration used by the terminal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermConfig {
    /// Resolved login, event and chat endpoints.
    pub endpoints: Endpoints,
    /// Backend selection and channel sizing forwarded to the runtime.
    pub runtime: RuntimeConfig,
}

impl TermConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = optional_trimmed_env("VANE_BASE_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let backend = parse_backend(&mut lookup)?;
        let chat_endpoint = optional_trimmed_env("VANE_CHAT_ENDPOINT", &mut lookup);
        let zone = parse_zone(&mut lookup)?;
        let event_buffer =
            parse_optional_usize("VANE_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VANE_EVENT_BUFFER",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let mut endpoints =
            Endpoints::from_base(&base_url).map_err(|err| ConfigError::InvalidValue {
                key: "VANE_BASE_URL",
                value: base_url.clone(),
                reason: err.message,
            })?;

        match (backend, chat_endpoint) {
            (ChatBackend::SyncReply, None) => {
                return Err(ConfigError::InvalidValue {
                    key: "VANE_CHAT_ENDPOINT",
                    value: String::new(),
                    reason: "required when VANE_CHAT_BACKEND=sync-reply".to_owned(),
                });
            }
            (_, Some(endpoint)) => {
                endpoints = endpoints.with_chat_endpoint(&endpoint).map_err(|err| {
                    ConfigError::InvalidValue {
                        key: "VANE_CHAT_ENDPOINT",
                        value: endpoint.clone(),
                        reason: err.message,
                    }
                })?;
            }
            (ChatBackend::Acknowledge, None) => {}
        }

        Ok(Self {
            endpoints,
            runtime: RuntimeConfig {
                backend,
                zone,
                event_buffer,
                ..RuntimeConfig::default()
            },
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_backend<F>(lookup: &mut F) -> Result<ChatBackend, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env("VANE_CHAT_BACKEND", lookup) else {
        return Ok(ChatBackend::default());
    };
    match value.to_ascii_lowercase().as_str() {
        "acknowledge" => Ok(ChatBackend::Acknowledge),
        "sync-reply" => Ok(ChatBackend::SyncReply),
        _ => Err(ConfigError::InvalidValue {
            key: "VANE_CHAT_BACKEND",
            value,
            reason: "expected 'acknowledge' or 'sync-reply'".to_owned(),
        }),
    }
}

fn parse_zone<F>(lookup: &mut F) -> Result<DisplayZone, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env("VANE_DISPLAY_ZONE", lookup) else {
        return Ok(DisplayZone::default());
    };
    match value.to_ascii_lowercase().as_str() {
        "local" => Ok(DisplayZone::Local),
        "utc" => Ok(DisplayZone::Utc),
        _ => Err(ConfigError::InvalidValue {
            key: "VANE_DISPLAY_ZONE",
            value,
            reason: "expected 'local' or 'utc'".to_owned(),
        }),
    }
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
