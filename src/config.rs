use crate::dispatch::ConduitCapacity;
use secrecy::{ExposeSecret, SecretBox};
use std::env;
use strum::{Display, EnumString};
use thiserror::Error;

/// Default AssemblyAI real-time endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://api.assemblyai.com/v2/realtime/ws";

const API_KEY_VAR: &str = "ASSEMBLYAI_API_KEY";
const TOKEN_VAR: &str = "ASSEMBLYAI_TOKEN";
const ENDPOINT_VAR: &str = "ASSEMBLYAI_REALTIME_URL";
const SAMPLE_RATE_VAR: &str = "ASSEMBLYAI_SAMPLE_RATE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No credential configured: set either an API key or a temporary token")]
    MissingCredential,
    #[error("Both an API key and a temporary token are configured; use exactly one")]
    ConflictingCredentials,
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Audio encodings accepted by the real-time service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum AudioEncoding {
    #[strum(serialize = "pcm_s16le")]
    PcmS16le,
    #[strum(serialize = "pcm_mulaw")]
    PcmMulaw,
}

/// The credential selected for a session.
///
/// A long-lived API key travels in the `Authorization` header, a short-lived
/// token travels as the `token` query parameter. Never both.
#[derive(Clone, Copy)]
pub enum Credential<'a> {
    ApiKey(&'a str),
    Token(&'a str),
}

impl std::fmt::Debug for Credential<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Credential::Token(_) => f.write_str("Token([REDACTED])"),
        }
    }
}

/// Stream configuration and credentials for a transcription session
#[derive(Debug)]
pub struct TranscriberConfig {
    pub endpoint: String,
    /// Omitted from the connection URL when `None` or zero
    pub sample_rate: Option<u32>,
    pub word_boost: Vec<String>,
    pub encoding: Option<AudioEncoding>,
    pub api_key: Option<SecretBox<String>>,
    pub token: Option<SecretBox<String>>,
    pub conduit_capacity: ConduitCapacity,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            sample_rate: None,
            word_boost: Vec::new(),
            encoding: None,
            api_key: None,
            token: None,
            conduit_capacity: ConduitCapacity::Unbounded,
        }
    }
}

impl TranscriberConfig {
    /// Configuration authenticated with a long-lived API key
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(SecretBox::new(Box::new(api_key.into()))),
            ..Self::default()
        }
    }

    /// Configuration authenticated with a short-lived temporary token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(SecretBox::new(Box::new(token.into()))),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_word_boost<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.word_boost = words.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_encoding(mut self, encoding: AudioEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_conduit_capacity(mut self, capacity: ConduitCapacity) -> Self {
        self.conduit_capacity = capacity;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let api_key = Self::load_secret(API_KEY_VAR)?;
        let token = Self::load_secret(TOKEN_VAR)?;
        if api_key.is_none() && token.is_none() {
            return Err(ConfigError::MissingEnvVar(API_KEY_VAR.to_string()));
        }

        let mut config = Self {
            api_key,
            token,
            ..Self::default()
        };

        if let Ok(endpoint) = env::var(ENDPOINT_VAR) {
            if endpoint.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: ENDPOINT_VAR.to_string(),
                    reason: "endpoint cannot be empty".to_string(),
                });
            }
            config.endpoint = endpoint;
        }

        if let Ok(raw) = env::var(SAMPLE_RATE_VAR) {
            let rate = raw.trim().parse::<u32>().map_err(|e| ConfigError::InvalidValue {
                name: SAMPLE_RATE_VAR.to_string(),
                reason: e.to_string(),
            })?;
            config.sample_rate = Some(rate);
        }

        config.validate()?;
        Ok(config)
    }

    /// Read an optional secret, rejecting present-but-empty values
    fn load_secret(env_var: &str) -> Result<Option<SecretBox<String>>, ConfigError> {
        match env::var(env_var) {
            Ok(value) if value.trim().is_empty() => Err(ConfigError::InvalidValue {
                name: env_var.to_string(),
                reason: "value cannot be empty".to_string(),
            }),
            Ok(value) => Ok(Some(SecretBox::new(Box::new(value)))),
            Err(_) => Ok(None),
        }
    }

    /// Select the single configured credential
    pub fn validate(&self) -> Result<Credential<'_>, ConfigError> {
        match (&self.api_key, &self.token) {
            (Some(key), None) => Ok(Credential::ApiKey(key.expose_secret())),
            (None, Some(token)) => Ok(Credential::Token(token.expose_secret())),
            (None, None) => Err(ConfigError::MissingCredential),
            (Some(_), Some(_)) => Err(ConfigError::ConflictingCredentials),
        }
    }
}
