use super::error::ConfigError;
use crate::tooling::NAMESPACE_SEPARATOR;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-call ceiling when a server declares no sandbox policy.
pub const DEFAULT_MAX_EXECUTION_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
    #[serde(alias = "streamable_http", alias = "http")]
    StreamableHttp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
        })
    }
}

/// How to reach a tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Stdio {
        command: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        workdir: Option<PathBuf>,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
            TransportConfig::StreamableHttp { .. } => TransportKind::StreamableHttp,
        }
    }

    /// Remote transports need network access by construction.
    pub fn is_remote(&self) -> bool {
        !matches!(self, TransportConfig::Stdio { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub max_execution_ms: u64,
    pub allow_network: bool,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            max_execution_ms: DEFAULT_MAX_EXECUTION_MS,
            allow_network: true,
        }
    }
}

impl SandboxPolicy {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.max_execution_ms)
    }
}

/// A tool server the runtime may connect to. Treat as immutable once a
/// connection is established; reconnect to apply changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDefinition {
    pub name: String,
    pub transport: TransportConfig,
    pub allowed_tools: Vec<String>,
    pub blocked_tools: Vec<String>,
    pub status: ServerStatus,
    pub sandbox: SandboxPolicy,
}

impl ServerDefinition {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            allowed_tools: Vec::new(),
            blocked_tools: Vec::new(),
            status: ServerStatus::Active,
            sandbox: SandboxPolicy::default(),
        }
    }

    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: HashMap::new(),
                workdir: None,
            },
        )
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            TransportConfig::Sse {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            TransportConfig::StreamableHttp {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    pub fn with_allowed_tools<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_blocked_tools<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_tools = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: ServerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ServerStatus::Active
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawSandbox {
    #[serde(default)]
    max_execution_ms: Option<u64>,
    #[serde(default)]
    allow_network: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawServer {
    pub(crate) name: String,
    #[serde(default)]
    transport: TransportKind,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    blocked_tools: Vec<String>,
    #[serde(default)]
    status: ServerStatus,
    #[serde(default)]
    sandbox: Option<RawSandbox>,
}

pub(crate) fn expand(value: &str) -> String {
    shellexpand::full(value)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

pub(crate) fn validate_server_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.trim().is_empty() {
        "name must not be empty"
    } else if name.contains(NAMESPACE_SEPARATOR) {
        "name must not contain the '__' namespace separator"
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidServerName {
        server: name.to_string(),
        reason: reason.to_string(),
    })
}

fn expand_map(map: HashMap<String, String>) -> HashMap<String, String> {
    map.into_iter()
        .map(|(key, value)| {
            let value = expand(&value);
            (key, value)
        })
        .collect()
}

fn remote_url(name: &str, kind: TransportKind, url: Option<String>) -> Result<String, ConfigError> {
    let raw = url.ok_or_else(|| ConfigError::MissingTransportField {
        server: name.to_string(),
        transport: kind.to_string(),
        field: "url",
    })?;
    let url = expand(&raw);
    Url::parse(&url).map_err(|err| ConfigError::InvalidUrl {
        server: name.to_string(),
        url: url.clone(),
        reason: err.to_string(),
    })?;
    Ok(url)
}

impl TryFrom<RawServer> for ServerDefinition {
    type Error = ConfigError;

    fn try_from(raw: RawServer) -> Result<Self, Self::Error> {
        validate_server_name(&raw.name)?;

        let transport = match raw.transport {
            TransportKind::Stdio => {
                let command = raw.command.ok_or_else(|| ConfigError::MissingTransportField {
                    server: raw.name.clone(),
                    transport: raw.transport.to_string(),
                    field: "command",
                })?;
                TransportConfig::Stdio {
                    command: PathBuf::from(expand(&command)),
                    args: raw.args.iter().map(|arg| expand(arg)).collect(),
                    env: expand_map(raw.env),
                    workdir: raw.workdir.map(|dir| PathBuf::from(expand(&dir))),
                }
            }
            TransportKind::Sse => TransportConfig::Sse {
                url: remote_url(&raw.name, raw.transport, raw.url)?,
                headers: expand_map(raw.headers),
            },
            TransportKind::StreamableHttp => TransportConfig::StreamableHttp {
                url: remote_url(&raw.name, raw.transport, raw.url)?,
                headers: expand_map(raw.headers),
            },
        };

        let defaults = SandboxPolicy::default();
        let sandbox = raw
            .sandbox
            .map(|sandbox| SandboxPolicy {
                max_execution_ms: sandbox
                    .max_execution_ms
                    .unwrap_or(defaults.max_execution_ms),
                allow_network: sandbox.allow_network.unwrap_or(defaults.allow_network),
            })
            .unwrap_or(defaults);

        Ok(Self {
            name: raw.name,
            transport,
            allowed_tools: raw.allowed_tools,
            blocked_tools: raw.blocked_tools,
            status: raw.status,
            sandbox,
        })
    }
}
