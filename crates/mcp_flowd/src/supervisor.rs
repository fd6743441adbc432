//! The supervisor façade tying every collaborator together.
//!
//! One [`Supervisor`] value owns the flow store, settings snapshot, event
//! broadcaster, OpenAPI helper registry, port supervisor, and inspector.
//! Request handlers receive it by reference; there is no global state.

use std::{process::Stdio, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config,
    events::{Event, EventBroadcaster},
    flow::{EndpointType, Flow, FlowDraft},
    helper::HelperRegistry,
    inspector::{InspectorState, InspectorSupervisor},
    ports::PortSupervisor,
    resolve,
    settings::{Settings, SettingsStore},
    store::FlowStore,
    FlowdError,
};

/// Live process state reported alongside a flow record.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FlowState {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<DateTime<Utc>>,
}

/// A flow record combined with its live state and recent log lines.
#[derive(Clone, Debug, Serialize)]
pub struct FlowReport {
    #[serde(flatten)]
    pub flow: Flow,
    pub state: FlowState,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<DateTime<Utc>>,
}

/// Result of a dry-run gateway check.
#[derive(Clone, Debug, Serialize)]
pub struct TestReport {
    pub ok: bool,
    pub command: Vec<String>,
    pub port: u16,
}

/// Long-lived control plane for gateway processes.
pub struct Supervisor {
    settings: Settings,
    settings_store: SettingsStore,
    store: Arc<FlowStore>,
    broadcaster: Arc<EventBroadcaster>,
    helpers: Arc<HelperRegistry>,
    ports: PortSupervisor,
    inspector: InspectorSupervisor,
    boot_id: String,
}

impl Supervisor {
    /// Wires up all collaborators and seeds the on-disk layout.
    pub fn new(settings: Settings) -> Result<Self, FlowdError> {
        let settings_store = SettingsStore::new(settings.clone())?;
        let store = Arc::new(FlowStore::new(settings.data_path.clone())?);
        let broadcaster = Arc::new(EventBroadcaster::new());
        let helpers = Arc::new(HelperRegistry::new(settings.clone(), broadcaster.clone()));
        let ports = PortSupervisor::new(
            settings.clone(),
            store.clone(),
            broadcaster.clone(),
            helpers.clone(),
        );
        let inspector = InspectorSupervisor::new(settings.clone());
        Ok(Self {
            settings,
            settings_store,
            store,
            broadcaster,
            helpers,
            ports,
            inspector,
            boot_id: Uuid::new_v4().to_string(),
        })
    }

    /// Effective settings snapshot.
    pub fn settings(&self) -> &Settings {
        self.settings_store.get()
    }

    /// Random id minted at construction, letting clients detect restarts.
    pub fn boot_id(&self) -> &str {
        &self.boot_id
    }

    /// Registers an event subscriber.
    pub async fn subscribe(&self) -> mpsc::Receiver<Event> {
        self.broadcaster.subscribe().await
    }

    /// Every stored flow with its live state and recent logs.
    pub async fn list_flows(&self) -> Result<Vec<FlowReport>, FlowdError> {
        let flows = self.store.list().await?;
        let ports = self.ports.lock().await;
        let mut reports = Vec::with_capacity(flows.len());
        for flow in flows {
            let state = self.ports.state_in(&ports, &flow.id).await;
            let logs = self.ports.logs_in(&ports, &flow.id).await;
            reports.push(FlowReport {
                last_event: state.last_event,
                flow,
                state,
                logs,
            });
        }
        Ok(reports)
    }

    /// Validates and stores a new flow record.
    pub async fn create_flow(&self, draft: FlowDraft) -> Result<FlowReport, FlowdError> {
        draft.validate()?;
        let id = draft
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let flow = draft.materialize(id, now, now);
        info!(flow = %flow.id, source = ?flow.source_type, target = ?flow.target_type, "flow created");
        self.store.upsert(flow.clone()).await?;
        Ok(self.report_for(flow).await)
    }

    /// Replaces a flow record, recomputing derived fields and capturing the
    /// previous endpoint configuration when it changed.
    pub async fn update_flow(
        &self,
        flow_id: &str,
        draft: FlowDraft,
    ) -> Result<FlowReport, FlowdError> {
        let existing = self.store.get(flow_id).await?;
        draft.validate()?;
        let mut updated = draft.materialize(existing.id.clone(), existing.created_at, Utc::now());
        let mut previous = existing.previous.clone();
        if existing.sse_url != updated.sse_url || existing.transport != updated.transport {
            previous.sse_url = existing.sse_url.clone();
            previous.transport = Some(existing.transport);
        }
        if existing.command != updated.command
            || existing.server_transport != updated.server_transport
        {
            previous.command = existing.command.clone();
            previous.server_transport = Some(existing.server_transport);
        }
        updated.previous = previous;
        info!(flow = %updated.id, source = ?updated.source_type, target = ?updated.target_type, "flow updated");
        self.store.upsert(updated.clone()).await?;
        Ok(self.report_for(updated).await)
    }

    /// Deletes a flow, detaching it from its port and cleaning its files.
    pub async fn delete_flow(&self, flow_id: &str) -> Result<(), FlowdError> {
        self.store.delete(flow_id).await?;
        {
            let mut ports = self.ports.lock().await;
            self.ports.forget(&mut ports, flow_id).await?;
        }
        self.helpers.stop(flow_id).await;
        let preview = config::flow_config_path(&self.settings.runtime_dir(), flow_id);
        let _ = tokio::fs::remove_file(preview).await;
        info!(flow = flow_id, "flow deleted");
        Ok(())
    }

    /// Starts a flow, activating any local upstream it depends on first.
    pub async fn start_flow(&self, flow_id: &str) -> Result<FlowState, FlowdError> {
        let flow = self.store.get(flow_id).await?;
        let chain = resolve::activation_chain(&self.store, &self.settings, flow).await?;
        let mut ports = self.ports.lock().await;
        for flow in &chain {
            self.ports.attach(&mut ports, flow).await?;
        }
        Ok(self.ports.state_in(&ports, flow_id).await)
    }

    /// Stops a flow; errors when it is not attached to any port.
    pub async fn stop_flow(&self, flow_id: &str) -> Result<FlowState, FlowdError> {
        let state = {
            let mut ports = self.ports.lock().await;
            self.ports.detach(&mut ports, flow_id).await?;
            self.ports.state_in(&ports, flow_id).await
        };
        self.helpers.stop(flow_id).await;
        Ok(state)
    }

    /// Builds the would-be invocation for a flow and verifies the gateway
    /// binary is spawnable (`--version`, any exit code accepted).
    pub async fn test_flow(&self, flow_id: &str) -> Result<TestReport, FlowdError> {
        let flow = self.store.get(flow_id).await?;
        let (command, port) = self.build_flow_preview(&flow).await?;
        info!(flow = %flow.id, ?command, port, "flow command preview");
        let mut check = tokio::process::Command::new(&self.settings.proxy_bin);
        check
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = check.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                FlowdError::BinaryNotFound(self.settings.proxy_bin.clone())
            } else {
                FlowdError::Spawn {
                    binary: self.settings.proxy_bin.clone(),
                    source,
                }
            }
        })?;
        let _ = child.wait().await;
        Ok(TestReport {
            ok: true,
            command,
            port,
        })
    }

    /// Recent log lines of the gateway serving a flow.
    pub async fn logs(&self, flow_id: &str) -> Vec<String> {
        self.ports.logs_for(flow_id).await
    }

    /// Live state of a flow.
    pub async fn flow_state(&self, flow_id: &str) -> FlowState {
        self.ports.state_for(flow_id).await
    }

    /// Starts (or restarts) the inspector UI.
    pub async fn inspector_start(
        &self,
        url: Option<String>,
    ) -> Result<InspectorState, FlowdError> {
        self.inspector.start(url).await
    }

    /// Stops the inspector; idempotent.
    pub async fn inspector_stop(&self) -> InspectorState {
        self.inspector.stop().await
    }

    /// Current inspector state.
    pub async fn inspector_state(&self) -> InspectorState {
        self.inspector.state().await
    }

    /// Starts every stored flow marked `auto_start`; failures are logged.
    pub async fn start_auto_flows(&self) {
        let flows = match self.store.list().await {
            Ok(flows) => flows,
            Err(error) => {
                warn!(%error, "failed to list flows for auto-start");
                return;
            }
        };
        for flow in flows.into_iter().filter(|flow| flow.auto_start) {
            if let Err(error) = self.start_flow(&flow.id).await {
                warn!(flow = %flow.id, %error, "auto-start failed");
            }
        }
    }

    /// Terminates every gateway, helper, and the inspector.
    pub async fn shutdown(&self) {
        {
            let mut ports = self.ports.lock().await;
            self.ports.terminate_all(&mut ports).await;
        }
        self.helpers.stop_all().await;
        self.inspector.stop().await;
        info!("supervisor shut down");
    }

    /// Writes the deprecated per-flow preview config and returns the argv
    /// plus port the flow would use.
    async fn build_flow_preview(&self, flow: &Flow) -> Result<(Vec<String>, u16), FlowdError> {
        let port = if flow.target_type == EndpointType::StreamableHttp {
            self.settings.stream_port
        } else {
            self.settings.sse_port
        };
        let entry = if flow.is_stdio_bridge() {
            config::stdio_entry(flow)?
        } else if flow.source_type == EndpointType::Openapi {
            // A preview never spawns a helper; reuse one when it is live.
            config::remote_entry(flow, self.helpers.live_url(&flow.id).await)
        } else {
            config::remote_entry(flow, None)
        };
        let doc = config::flow_preview_document(&self.settings, flow, port, entry);
        let path = config::flow_config_path(&self.settings.runtime_dir(), &flow.id);
        config::write_config(&path, &doc).await?;
        Ok((config::proxy_command(&self.settings, &path).to_argv(), port))
    }

    async fn report_for(&self, flow: Flow) -> FlowReport {
        let state = self.ports.state_for(&flow.id).await;
        let logs = self.ports.logs_for(&flow.id).await;
        FlowReport {
            last_event: state.last_event,
            flow,
            state,
            logs,
        }
    }
}
