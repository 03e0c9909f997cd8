use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tess_engine::Schema;

/// Errors loading a [`GateConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for an [`AccessGate`](crate::AccessGate).
///
/// ```toml
/// directory = "./data"
/// command_buffer = 64
///
/// [model]
/// version = 1
///
/// [[model.entities]]
/// name = "Book"
/// attributes = [{ name = "title", kind = "string", optional = false }]
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Data model every store opened by the gate is validated against.
    pub model: Schema,
    /// Directory holding file-backed stores.
    pub directory: PathBuf,
    /// Depth of the command queue in front of the worker.
    pub command_buffer: usize,
    /// Adapt stores written under an older model version on open.
    pub automatic_migration: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            model: Schema::default(),
            directory: PathBuf::from("."),
            command_buffer: 64,
            automatic_migration: true,
        }
    }
}

impl GateConfig {
    /// Default settings around `model`.
    pub fn with_model(model: Schema) -> Self {
        Self {
            model,
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
