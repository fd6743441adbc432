use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Errors surfaced by the flow supervisor.
#[derive(Debug, Error)]
pub enum FlowdError {
    #[error("flow `{0}` not found")]
    FlowNotFound(String),
    #[error("flow `{0}` is not attached to any port")]
    AlreadyStopped(String),
    #[error("command is required when an endpoint is stdio")]
    CommandRequired,
    #[error("URL is required for a remote source")]
    UrlRequired,
    #[error("OpenAPI base URL and spec URL are required for an openapi source")]
    OpenapiUrlsRequired,
    #[error("an openapi source must target streamable_http")]
    OpenapiTargetMismatch,
    #[error("binary not found: {0}")]
    BinaryNotFound(String),
    #[error("failed to spawn `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("child output pipes unavailable")]
    OutputUnavailable,
    #[error("OpenAPI helper for flow `{flow_id}` did not open port {port} within {timeout:?}")]
    HelperNotReady {
        flow_id: String,
        port: u16,
        timeout: Duration,
    },
    #[error("no free local port available")]
    NoFreePort,
    #[error("failed to prepare data directory `{path}`: {source}")]
    PrepareData {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read flow store at `{path}`: {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write flow store at `{path}`: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("flow store at `{path}` holds invalid JSON: {source}")]
    StoreParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode gateway config: {0}")]
    ConfigEncode(#[from] serde_json::Error),
    #[error("failed to write gateway config at `{path}`: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
