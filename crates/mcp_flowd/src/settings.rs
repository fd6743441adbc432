//! Environment-driven settings snapshot.
//!
//! Every knob is read once from an `MCP_…` environment variable at startup.
//! The snapshot is immutable for the lifetime of the supervisor; the
//! `settings.json` written next to the flow store records the effective
//! gateway layout but is never read back.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::FlowdError;

/// Default well-known port of the inspector's proxy server.
pub const DEFAULT_INSPECTOR_SERVER_PORT: u16 = 6277;

/// Read-only runtime settings for the supervisor.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Bind host advertised in gateway base URLs.
    pub host: String,
    /// Port of the streamable-http gateway.
    pub stream_port: u16,
    /// Port of the SSE gateway.
    pub sse_port: u16,
    /// Port of the OpenAPI (`mcpo`) gateway.
    pub openapi_port: u16,
    /// Host substituted for loopback upstreams and used in inspector URLs.
    pub inspector_public_host: String,
    /// `mcp-proxy` invocation.
    pub proxy_bin: String,
    /// `mcpo` invocation, split on whitespace before use.
    pub openapi_bin: String,
    /// OpenAPI-to-MCP helper invocation, split on whitespace before use.
    pub helper_bin: String,
    /// Inspector invocation, split on whitespace before use.
    pub inspector_bin: String,
    /// Host the inspector binds.
    pub inspector_host: String,
    /// Inspector UI port.
    pub inspector_client_port: u16,
    /// Inspector proxy-server port.
    pub inspector_server_port: u16,
    /// Path of the JSON flow store; `runtime/` and `settings.json` live beside it.
    pub data_path: PathBuf,
}

impl Settings {
    /// Loads the snapshot from `MCP_…` environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env_string("MCP_HOST", "0.0.0.0"),
            stream_port: env_port("MCP_STREAM_PORT", 8001),
            sse_port: env_port("MCP_SSE_PORT", 8002),
            openapi_port: env_port("MCP_OPENAPI_PORT", 8003),
            inspector_public_host: env_string("MCP_INSPECTOR_PUBLIC_HOST", "localhost"),
            proxy_bin: env_string("MCP_PROXY_BIN", "mcp-proxy"),
            openapi_bin: env_string("MCP_OPENAPI_BIN", "uvx mcpo"),
            helper_bin: env_string(
                "MCP_OPENAPI_HELPER_BIN",
                "npx -y @ivotoby/openapi-mcp-server",
            ),
            inspector_bin: env_string(
                "MCP_INSPECTOR_BIN",
                "npx -y @modelcontextprotocol/inspector",
            ),
            inspector_host: env_string("MCP_INSPECTOR_HOST", "0.0.0.0"),
            inspector_client_port: env_port("MCP_INSPECTOR_PORT", 6275),
            inspector_server_port: env_port("MCP_INSPECTOR_SERVER_PORT", 6285),
            data_path: PathBuf::from(env_string("MCP_DASH_DATA", "data/flows.json")),
        }
    }

    /// Directory holding generated gateway config files.
    pub fn runtime_dir(&self) -> PathBuf {
        self.data_dir().join("runtime")
    }

    /// Path of the recorded settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir().join("settings.json")
    }

    fn data_dir(&self) -> PathBuf {
        self.data_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Serialized view of the gateway layout, written once for operators.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettingsFile {
    pub host: String,
    pub sse_port: u16,
    pub stream_port: u16,
    pub openapi_port: u16,
    pub inspector_public_host: String,
}

impl From<&Settings> for SettingsFile {
    fn from(settings: &Settings) -> Self {
        Self {
            host: settings.host.clone(),
            sse_port: settings.sse_port,
            stream_port: settings.stream_port,
            openapi_port: settings.openapi_port,
            inspector_public_host: settings.inspector_public_host.clone(),
        }
    }
}

/// Settings provider. Writes the default `settings.json` once; reads always
/// return the environment snapshot, so the file is informational only.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    settings: Settings,
}

impl SettingsStore {
    /// Records the effective settings beside the flow store if absent.
    pub fn new(settings: Settings) -> Result<Self, FlowdError> {
        let path = settings.settings_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| FlowdError::PrepareData {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        if !path.exists() {
            let body = serde_json::to_string_pretty(&SettingsFile::from(&settings))?;
            fs::write(&path, body).map_err(|source| FlowdError::StoreWrite { path, source })?;
        }
        Ok(Self { settings })
    }

    /// Current settings snapshot.
    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Settings are fixed at startup; updates are ignored.
    pub fn set(&self, _requested: SettingsFile) -> &Settings {
        &self.settings
    }
}

fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_port(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_layout() {
        let settings = Settings::from_env();
        assert_eq!(settings.stream_port, 8001);
        assert_eq!(settings.sse_port, 8002);
        assert_eq!(settings.openapi_port, 8003);
        assert_eq!(settings.inspector_client_port, 6275);
        assert_eq!(settings.inspector_server_port, 6285);
    }

    #[test]
    fn runtime_dir_sits_beside_the_store() {
        let mut settings = Settings::from_env();
        settings.data_path = PathBuf::from("/srv/flowd/flows.json");
        assert_eq!(settings.runtime_dir(), PathBuf::from("/srv/flowd/runtime"));
        assert_eq!(
            settings.settings_path(),
            PathBuf::from("/srv/flowd/settings.json")
        );
    }
}
