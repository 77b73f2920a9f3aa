//! Built-in tool server presets.
//!
//! Presets are plain data: callers turn one into a [`ServerDefinition`] and may
//! adjust it before connecting. Environment placeholders are expanded at that
//! point, so secrets stay in the environment.

use super::server::{SandboxPolicy, ServerDefinition, TransportConfig, TransportKind, expand};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub transport: TransportKind,
    pub command: &'static str,
    pub args: &'static [&'static str],
    pub env: &'static [(&'static str, &'static str)],
    pub sandbox: SandboxPolicy,
}

const PRESETS: &[ServerPreset] = &[
    ServerPreset {
        name: "filesystem",
        description: "Read and write files under the working directory",
        transport: TransportKind::Stdio,
        command: "npx",
        args: &["-y", "@modelcontextprotocol/server-filesystem", "."],
        env: &[],
        sandbox: SandboxPolicy {
            max_execution_ms: 30_000,
            allow_network: false,
        },
    },
    ServerPreset {
        name: "github",
        description: "Repositories, issues and pull requests on GitHub",
        transport: TransportKind::Stdio,
        command: "npx",
        args: &["-y", "@modelcontextprotocol/server-github"],
        env: &[(
            "GITHUB_PERSONAL_ACCESS_TOKEN",
            "${GITHUB_PERSONAL_ACCESS_TOKEN}",
        )],
        sandbox: SandboxPolicy {
            max_execution_ms: 60_000,
            allow_network: true,
        },
    },
    ServerPreset {
        name: "postgres",
        description: "Read-only SQL queries against a PostgreSQL database",
        transport: TransportKind::Stdio,
        command: "npx",
        args: &[
            "-y",
            "@modelcontextprotocol/server-postgres",
            "${DATABASE_URL}",
        ],
        env: &[],
        sandbox: SandboxPolicy {
            max_execution_ms: 30_000,
            allow_network: true,
        },
    },
    ServerPreset {
        name: "fetch",
        description: "Fetch web pages and convert them to markdown",
        transport: TransportKind::Stdio,
        command: "uvx",
        args: &["mcp-server-fetch"],
        env: &[],
        sandbox: SandboxPolicy {
            max_execution_ms: 45_000,
            allow_network: true,
        },
    },
    ServerPreset {
        name: "brave-search",
        description: "Web and local search through the Brave Search API",
        transport: TransportKind::Stdio,
        command: "npx",
        args: &["-y", "@modelcontextprotocol/server-brave-search"],
        env: &[("BRAVE_API_KEY", "${BRAVE_API_KEY}")],
        sandbox: SandboxPolicy {
            max_execution_ms: 30_000,
            allow_network: true,
        },
    },
    ServerPreset {
        name: "memory",
        description: "Knowledge-graph backed persistent memory",
        transport: TransportKind::Stdio,
        command: "npx",
        args: &["-y", "@modelcontextprotocol/server-memory"],
        env: &[],
        sandbox: SandboxPolicy {
            max_execution_ms: 15_000,
            allow_network: false,
        },
    },
];

pub fn presets() -> &'static [ServerPreset] {
    PRESETS
}

pub fn find_preset(name: &str) -> Option<&'static ServerPreset> {
    PRESETS.iter().find(|preset| preset.name == name)
}

impl ServerPreset {
    pub fn to_definition(&self) -> ServerDefinition {
        let env: HashMap<String, String> = self
            .env
            .iter()
            .map(|(key, value)| (key.to_string(), expand(value)))
            .collect();
        let transport = TransportConfig::Stdio {
            command: PathBuf::from(self.command),
            args: self.args.iter().map(|arg| expand(arg)).collect(),
            env,
            workdir: None,
        };
        ServerDefinition::new(self.name, transport).with_sandbox(self.sandbox)
    }
}
