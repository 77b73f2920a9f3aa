use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },

    #[error("server '{server}' is declared more than once")]
    DuplicateServer { server: String },

    #[error("server name '{server}' is invalid: {reason}")]
    InvalidServerName { server: String, reason: String },

    #[error("server '{server}' uses the {transport} transport but has no '{field}'")]
    MissingTransportField {
        server: String,
        transport: String,
        field: &'static str,
    },

    #[error("server '{server}' has an invalid url '{url}': {reason}")]
    InvalidUrl {
        server: String,
        url: String,
        reason: String,
    },
}
