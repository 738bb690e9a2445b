//! Configuration loading and validation for the `fieldcrypt` binary and
//! library builders.
//!
//! Values are read from `FIELDCRYPT_*` environment variables. Invalid values
//! are rejected up front with a message naming the variable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::backend::BackendKind;

const ENV_PREFIX: &str = "FIELDCRYPT";

/// Validated configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend for new encryption: `aes-gcm-siv`, `aes-gcm` or
    /// `xchacha20poly1305`.
    #[serde(default = "default_encryptor")]
    pub encryptor: String,

    /// Directory holding one key file per backend kind.
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// Secret from which the `V1` legacy backend's key is derived. Legacy
    /// decryption is disabled when absent.
    #[serde(default)]
    pub legacy_key: Option<String>,

    /// Try unmarked values against the legacy backend on read.
    #[serde(default)]
    pub convert_unmarked: bool,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP/gRPC endpoint for span export. Export is disabled when absent.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_encryptor() -> String {
    "aes-gcm-siv".into()
}
fn default_key_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encryptor: default_encryptor(),
            key_dir: default_key_dir(),
            legacy_key: None,
            convert_unmarked: false,
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load(source: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(source.try_parsing(true))
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        if self.key_dir.as_os_str().is_empty() {
            anyhow::bail!("FIELDCRYPT_KEY_DIR must not be empty");
        }
        self.backend_kind()?;
        if let Some(secret) = &self.legacy_key {
            ensure_non_empty(secret, "FIELDCRYPT_LEGACY_KEY")?;
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            ensure_non_empty(endpoint, "FIELDCRYPT_OTLP_ENDPOINT")?;
        }
        Ok(())
    }

    /// The configured backend kind.
    ///
    /// # Errors
    ///
    /// Returns an error if `encryptor` names no known backend.
    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.encryptor
            .parse::<BackendKind>()
            .map_err(|e| anyhow::anyhow!("FIELDCRYPT_ENCRYPTOR: {e}"))
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} must not be empty when set");
    }
    Ok(())
}
