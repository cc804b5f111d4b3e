//! Errors raised while loading, validating or saving configuration.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A config file exists but cannot be read
    #[error("cannot read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file is not valid TOML for [`GraphConfig`](crate::GraphConfig)
    #[error("config file '{path}' is not valid: {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot encode config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create config directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The merged configuration lists no mirror to fetch from
    #[error("no repository mirrors configured; add a [[repository.mirrors]] entry")]
    NoMirrors,

    /// A mirror URL the fetcher cannot talk to
    #[error("mirror '{id}' has unsupported URL '{url}' (expected http:// or https://)")]
    UnsupportedMirrorUrl { id: String, url: String },

    /// `logging.level` names no tracing level
    #[error("unknown log level '{0}' (expected trace, debug, info, warn or error)")]
    UnknownLogLevel(String),

    /// Any other setting outside its accepted range
    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFile {
            path: path.into(),
            source,
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported_mirror(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::UnsupportedMirrorUrl {
            id: id.into(),
            url: url.into(),
        }
    }

    /// A numeric setting that must be at least one.
    pub fn zero(key: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: "must be at least 1".to_string(),
        }
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}
