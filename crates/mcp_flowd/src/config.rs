//! Gateway config documents and argv synthesis.
//!
//! Two document families exist: `mcp-proxy` ports get a `mcpProxy` +
//! `mcpServers` document, the `mcpo` port gets a bare `mcpServers` document.
//! The serializer is the stripping contract: keys whose values would be
//! null, an empty map, or an empty list are omitted. Header shapes differ by
//! role and deliberately stay that way: `mcp-proxy` documents carry a list of
//! single-entry maps, `mcpo` documents an object map.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use url::Url;

use crate::{
    flow::{non_empty, EndpointType, Flow, Transport},
    settings::Settings,
    FlowdError,
};

/// Role a gateway port plays, selecting the emitted document family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PortRole {
    Sse,
    Stream,
    Openapi,
}

impl PortRole {
    pub(crate) fn for_port(settings: &Settings, port: u16) -> PortRole {
        if port == settings.openapi_port {
            PortRole::Openapi
        } else if port == settings.stream_port {
            PortRole::Stream
        } else {
            PortRole::Sse
        }
    }

    fn proxy_type(self) -> &'static str {
        match self {
            PortRole::Stream => "streamable-http",
            _ => "sse",
        }
    }
}

/// Gateway port a flow attaches to, determined by its target type.
pub(crate) fn port_for_flow(settings: &Settings, flow: &Flow) -> u16 {
    match flow.target_type {
        EndpointType::Openapi => settings.openapi_port,
        EndpointType::StreamableHttp => settings.stream_port,
        _ => settings.sse_port,
    }
}

/// Program plus arguments of a gateway invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GatewayCommand {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
}

impl GatewayCommand {
    /// Full argv, program first, for display and event payloads.
    pub(crate) fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// `[<proxy_bin>, "-config", <path>]`.
pub(crate) fn proxy_command(settings: &Settings, config_path: &Path) -> GatewayCommand {
    GatewayCommand {
        program: settings.proxy_bin.clone(),
        args: vec![
            "-config".to_string(),
            config_path.display().to_string(),
        ],
    }
}

/// `<openapi_bin> --port <P> --config <path> --hot-reload`, binary split on
/// whitespace so wrapper invocations like `uvx mcpo` work.
pub(crate) fn mcpo_command(settings: &Settings, port: u16, config_path: &Path) -> GatewayCommand {
    let mut words = settings.openapi_bin.split_whitespace().map(String::from);
    let program = words.next().unwrap_or_else(|| "mcpo".to_string());
    let mut args: Vec<String> = words.collect();
    args.extend([
        "--port".to_string(),
        port.to_string(),
        "--config".to_string(),
        config_path.display().to_string(),
        "--hot-reload".to_string(),
    ]);
    GatewayCommand { program, args }
}

/// Config file path for a gateway port.
pub(crate) fn port_config_path(runtime_dir: &Path, port: u16, role: PortRole) -> PathBuf {
    match role {
        PortRole::Openapi => runtime_dir.join(format!("port-{port}-openapi.config.json")),
        _ => runtime_dir.join(format!("port-{port}.config.json")),
    }
}

/// Config file path of the deprecated per-flow preview.
pub(crate) fn flow_config_path(runtime_dir: &Path, flow_id: &str) -> PathBuf {
    runtime_dir.join(format!("{flow_id}.config.json"))
}

/// `mcpProxy` front matter of a non-OpenAPI port document.
#[derive(Debug, Serialize)]
pub(crate) struct ProxyFrontend {
    #[serde(rename = "baseURL")]
    pub(crate) base_url: String,
    pub(crate) addr: String,
    pub(crate) name: String,
    pub(crate) version: String,
    #[serde(rename = "type")]
    pub(crate) proxy_type: String,
    pub(crate) options: ProxyOptions,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProxyOptions {
    #[serde(rename = "panicIfInvalid")]
    pub(crate) panic_if_invalid: bool,
    #[serde(rename = "logEnabled")]
    pub(crate) log_enabled: bool,
}

/// One upstream entry in an `mcp-proxy` document.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ProxyServerEntry {
    Stdio {
        command: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    Remote {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        headers: Option<Vec<BTreeMap<String, String>>>,
        #[serde(rename = "transportType")]
        transport_type: &'static str,
    },
}

/// One upstream entry in an `mcpo` document.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum McpoServerEntry {
    Stdio {
        command: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    Remote {
        #[serde(rename = "type")]
        transport_type: &'static str,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
}

/// Full document for a non-OpenAPI gateway port.
#[derive(Debug, Serialize)]
pub(crate) struct ProxyDocument {
    #[serde(rename = "mcpProxy")]
    pub(crate) proxy: ProxyFrontend,
    #[serde(rename = "mcpServers")]
    pub(crate) servers: BTreeMap<String, ProxyServerEntry>,
}

/// Full document for the OpenAPI (`mcpo`) port.
#[derive(Debug, Serialize)]
pub(crate) struct McpoDocument {
    #[serde(rename = "mcpServers")]
    pub(crate) servers: BTreeMap<String, McpoServerEntry>,
}

/// Assigns server keys, suffixing collisions `-1`, `-2`, … in call order.
#[derive(Debug, Default)]
pub(crate) struct ServerKeys {
    used: BTreeSet<String>,
}

impl ServerKeys {
    pub(crate) fn assign(&mut self, base: &str) -> String {
        let mut key = base.to_string();
        let mut n = 1;
        while self.used.contains(&key) {
            key = format!("{base}-{n}");
            n += 1;
        }
        self.used.insert(key.clone());
        key
    }
}

/// Entry for a flow with a stdio end: the gateway launches the child itself.
pub(crate) fn stdio_entry(flow: &Flow) -> Result<ProxyServerEntry, FlowdError> {
    Ok(ProxyServerEntry::Stdio {
        command: non_empty(&flow.command)
            .ok_or(FlowdError::CommandRequired)?
            .to_string(),
        args: flow.args.clone(),
        env: flow.env.clone(),
    })
}

/// Entry for a remote upstream; `upstream` overrides `sse_url` when the
/// source is an OpenAPI helper.
pub(crate) fn remote_entry(flow: &Flow, upstream: Option<String>) -> ProxyServerEntry {
    ProxyServerEntry::Remote {
        url: upstream.or_else(|| non_empty(&flow.sse_url).map(str::to_string)),
        headers: header_list(&flow.headers),
        transport_type: transport_type_label(flow.source_type),
    }
}

/// `mcpo` entry for a flow with a stdio source.
pub(crate) fn mcpo_stdio_entry(flow: &Flow) -> Result<McpoServerEntry, FlowdError> {
    Ok(McpoServerEntry::Stdio {
        command: non_empty(&flow.command)
            .ok_or(FlowdError::CommandRequired)?
            .to_string(),
        args: flow.args.clone(),
        env: flow.env.clone(),
    })
}

/// `mcpo` entry for a probed remote upstream.
pub(crate) fn mcpo_remote_entry(flow: &Flow, upstream: String) -> McpoServerEntry {
    McpoServerEntry::Remote {
        transport_type: match flow.source_type {
            EndpointType::StreamableHttp => "streamable-http",
            _ => "sse",
        },
        url: upstream,
        headers: header_map(&flow.headers),
    }
}

/// Assembles a non-OpenAPI port document around prepared entries.
pub(crate) fn proxy_document(
    settings: &Settings,
    port: u16,
    role: PortRole,
    name: &str,
    servers: BTreeMap<String, ProxyServerEntry>,
) -> ProxyDocument {
    ProxyDocument {
        proxy: ProxyFrontend {
            base_url: format!("http://{}:{}", settings.host, port),
            addr: format!(":{port}"),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            proxy_type: role.proxy_type().to_string(),
            options: ProxyOptions {
                panic_if_invalid: false,
                log_enabled: true,
            },
        },
        servers,
    }
}

/// Per-flow preview document (deprecated path used by `test_flow`): one
/// server entry, the flow's own name in the front matter, the exposed
/// transport as proxy type.
pub(crate) fn flow_preview_document(
    settings: &Settings,
    flow: &Flow,
    port: u16,
    entry: ProxyServerEntry,
) -> ProxyDocument {
    let proxy_type = match flow.server_transport {
        Transport::StreamableHttp => "streamable-http",
        Transport::Sse => "sse",
    };
    let mut servers = BTreeMap::new();
    servers.insert(flow.server_key_base().to_string(), entry);
    ProxyDocument {
        proxy: ProxyFrontend {
            base_url: format!("http://{}:{}", settings.host, port),
            addr: format!(":{port}"),
            name: flow.name.clone(),
            version: "1.0.0".to_string(),
            proxy_type: proxy_type.to_string(),
            options: ProxyOptions {
                panic_if_invalid: false,
                log_enabled: true,
            },
        },
        servers,
    }
}

/// Rewrites `0.0.0.0` / `localhost` upstream hosts to the public host,
/// preserving the original port. Other hosts pass through untouched.
pub(crate) fn rewrite_local_upstream(raw: &str, settings: &Settings) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if !matches!(url.host_str(), Some("0.0.0.0") | Some("localhost")) {
        return raw.to_string();
    }
    let public_host = if settings.inspector_public_host.trim().is_empty() {
        "host.docker.internal"
    } else {
        settings.inspector_public_host.as_str()
    };
    if url.set_host(Some(public_host)).is_err() {
        return raw.to_string();
    }
    url.to_string()
}

/// Serializes a document and writes it under the runtime directory.
pub(crate) async fn write_config<T: Serialize>(path: &Path, doc: &T) -> Result<(), FlowdError> {
    let body = serde_json::to_string_pretty(doc)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| FlowdError::PrepareData {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|source| FlowdError::ConfigWrite {
            path: path.to_path_buf(),
            source,
        })
}

fn transport_type_label(source: EndpointType) -> &'static str {
    match source {
        EndpointType::StreamableHttp | EndpointType::Openapi => "streamable-http",
        _ => "sse",
    }
}

fn header_list(headers: &[crate::flow::Header]) -> Option<Vec<BTreeMap<String, String>>> {
    if headers.is_empty() {
        return None;
    }
    Some(
        headers
            .iter()
            .map(|header| {
                let mut entry = BTreeMap::new();
                entry.insert(header.key.clone(), header.value.clone());
                entry
            })
            .collect(),
    )
}

fn header_map(headers: &[crate::flow::Header]) -> Option<BTreeMap<String, String>> {
    if headers.is_empty() {
        return None;
    }
    Some(
        headers
            .iter()
            .map(|header| (header.key.clone(), header.value.clone()))
            .collect(),
    )
}
