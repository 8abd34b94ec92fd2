//! Environment configuration for the formchat binary

use crate::interpret::COMPLETION_DIRECTIVE;
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::session::{CompletedPolicy, SessionOptions};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_LOCALE: &str = "en";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be true or false, got {value:?}")]
    InvalidBool { key: &'static str, value: String },
    #[error("{key} must be a number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
}

/// Where the form schema comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// JSON schema file
    File(PathBuf),
    /// Field names turned into a schema by the model
    Fields(Vec<String>),
    /// Built-in contact form
    Builtin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub model: String,
    pub locale: String,
    pub schema: SchemaSource,
    pub stream: bool,
    pub reject_after_complete: bool,
    pub temperature: Option<f32>,
}

impl AppConfig {
    /// Read configuration from the process environment
    ///
    /// # Errors
    /// Fails when a boolean or numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; empty values count as unset.
    ///
    /// # Errors
    /// Fails when a boolean or numeric variable cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let schema = if let Some(path) = get("FORMCHAT_SCHEMA_PATH") {
            SchemaSource::File(PathBuf::from(path))
        } else if let Some(fields) = get("FORMCHAT_FIELDS") {
            SchemaSource::Fields(
                fields
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(ToString::to_string)
                    .collect(),
            )
        } else {
            SchemaSource::Builtin
        };

        let temperature = match get("FORMCHAT_TEMPERATURE") {
            Some(value) => Some(value.parse::<f32>().map_err(|_| ConfigError::InvalidNumber {
                key: "FORMCHAT_TEMPERATURE",
                value,
            })?),
            None => None,
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            model: get("FORMCHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            locale: get("FORMCHAT_LOCALE").unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            schema,
            stream: parse_bool("FORMCHAT_STREAM", get("FORMCHAT_STREAM"), true)?,
            reject_after_complete: parse_bool(
                "FORMCHAT_REJECT_AFTER_COMPLETE",
                get("FORMCHAT_REJECT_AFTER_COMPLETE"),
                false,
            )?,
            temperature,
        })
    }

    /// # Errors
    /// Fails when no API key is configured.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            locale: self.locale.clone(),
            directive_name: COMPLETION_DIRECTIVE.to_string(),
            completed_policy: if self.reject_after_complete {
                CompletedPolicy::Reject
            } else {
                CompletedPolicy::AllowFurtherTurns
            },
            temperature: self.temperature,
        }
    }
}

fn parse_bool(
    key: &'static str,
    value: Option<String>,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value }),
    }
}
