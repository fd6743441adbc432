#![forbid(unsafe_code)]
//! Supervisor for `mcp-proxy` / `mcpo` gateway processes.
//!
//! An operator declares named *flows*, each mapping a source protocol
//! endpoint (stdio child, SSE server, streamable-HTTP server, or an OpenAPI
//! description) to a target endpoint of the same family. The [`Supervisor`]
//! groups flows by the gateway port their target implies, synthesizes the
//! gateway config files, spawns and restarts the external gateway binaries,
//! readiness-probes dependent upstreams, and fans log lines and lifecycle
//! events out to subscribers.
//!
//! The control surface (HTTP API, UI) is a thin façade over the public
//! operations here: flow CRUD, `start`/`stop`/`test`, log retrieval, the
//! event stream, and the inspector lifecycle. One supervisor instance owns
//! all gateway ports; every mutation runs under a supervisor-wide mutex so
//! port restarts stay serialized, while log pumps and event delivery run
//! outside it.

mod config;
mod error;
mod events;
mod flow;
mod helper;
mod inspector;
mod ports;
mod probe;
mod process;
mod resolve;
mod settings;
mod store;
mod supervisor;

pub use error::FlowdError;
pub use events::{Event, EventBroadcaster, SUBSCRIBER_CAPACITY};
pub use flow::{EndpointType, Flow, FlowDraft, Header, PreviousConfig, Transport};
pub use inspector::InspectorState;
pub use settings::{Settings, SettingsFile, SettingsStore, DEFAULT_INSPECTOR_SERVER_PORT};
pub use store::FlowStore;
pub use supervisor::{FlowReport, FlowState, Supervisor, TestReport};
