//! Per-port gateway ownership and restart orchestration.
//!
//! One [`PortBinding`] exists per live gateway port: the ordered set of
//! attached flows plus at most one child process. All mutation runs under
//! the supervisor-wide mutex guarding the port map, which serialises
//! restarts; log pumps and broadcasts run outside it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::{Mutex, MutexGuard},
    time,
};
use tracing::{info, warn};

use crate::{
    config::{self, PortRole},
    events::{Event, EventBroadcaster},
    flow::{EndpointType, Flow},
    helper::HelperRegistry,
    probe,
    process::{self, ChildProcess},
    settings::Settings,
    store::FlowStore,
    supervisor::FlowState,
    FlowdError,
};

/// Pause before probing upstreams of the OpenAPI port, letting freshly
/// restarted gateways finish binding.
const UPSTREAM_BOOT_SETTLE: Duration = Duration::from_millis(500);
const UPSTREAM_TCP_WAIT: Duration = Duration::from_secs(10);
const UPSTREAM_TCP_SETTLE: Duration = Duration::from_secs(1);
const UPSTREAM_HTTP_WAIT: Duration = Duration::from_secs(12);

/// Membership and child of one gateway port.
#[derive(Default)]
pub(crate) struct PortBinding {
    /// Flow ids in attach order; config keys are assigned in this order.
    pub(crate) members: Vec<String>,
    pub(crate) gateway: Option<Arc<ChildProcess>>,
}

pub(crate) type PortMap = HashMap<u16, PortBinding>;

/// Owner of every gateway port.
pub(crate) struct PortSupervisor {
    settings: Settings,
    store: Arc<FlowStore>,
    broadcaster: Arc<EventBroadcaster>,
    helpers: Arc<HelperRegistry>,
    state: Mutex<PortMap>,
}

impl PortSupervisor {
    pub(crate) fn new(
        settings: Settings,
        store: Arc<FlowStore>,
        broadcaster: Arc<EventBroadcaster>,
        helpers: Arc<HelperRegistry>,
    ) -> Self {
        Self {
            settings,
            store,
            broadcaster,
            helpers,
            state: Mutex::new(PortMap::new()),
        }
    }

    /// Acquires the supervisor-wide mutation lock.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, PortMap> {
        self.state.lock().await
    }

    /// Adds the flow to its port; restarts the gateway when membership grew.
    pub(crate) async fn attach(
        &self,
        ports: &mut PortMap,
        flow: &Flow,
    ) -> Result<(), FlowdError> {
        let port = config::port_for_flow(&self.settings, flow);
        let binding = ports.entry(port).or_default();
        if binding.members.iter().any(|id| id == &flow.id) {
            return Ok(());
        }
        binding.members.push(flow.id.clone());
        self.restart(ports, port).await
    }

    /// Removes the flow from its port; terminates the gateway when it was the
    /// last member, restarts otherwise. Errors when the flow is not attached.
    pub(crate) async fn detach(
        &self,
        ports: &mut PortMap,
        flow_id: &str,
    ) -> Result<(), FlowdError> {
        let port = ports
            .iter()
            .find(|(_, binding)| binding.members.iter().any(|id| id == flow_id))
            .map(|(port, _)| *port)
            .ok_or_else(|| FlowdError::AlreadyStopped(flow_id.to_string()))?;
        if let Some(binding) = ports.get_mut(&port) {
            binding.members.retain(|id| id != flow_id);
        }
        let empty = ports
            .get(&port)
            .map_or(true, |binding| binding.members.is_empty());
        if empty {
            self.terminate(ports, port).await;
            ports.remove(&port);
            Ok(())
        } else {
            self.restart(ports, port).await
        }
    }

    /// Like [`Self::detach`], but silent when the flow was not attached
    /// (delete path).
    pub(crate) async fn forget(
        &self,
        ports: &mut PortMap,
        flow_id: &str,
    ) -> Result<(), FlowdError> {
        match self.detach(ports, flow_id).await {
            Err(FlowdError::AlreadyStopped(_)) => Ok(()),
            other => other,
        }
    }

    /// Terminates any current child and, when members remain, rebuilds the
    /// config and spawns a fresh gateway.
    pub(crate) async fn restart(&self, ports: &mut PortMap, port: u16) -> Result<(), FlowdError> {
        self.terminate(ports, port).await;
        let members = ports
            .get(&port)
            .map(|binding| binding.members.clone())
            .unwrap_or_default();
        if members.is_empty() {
            ports.remove(&port);
            return Ok(());
        }

        let all_flows = self.store.list().await?;
        let flows: Vec<Flow> = members
            .iter()
            .filter_map(|id| all_flows.iter().find(|flow| &flow.id == id).cloned())
            .collect();
        let role = PortRole::for_port(&self.settings, port);
        let runtime_dir = self.settings.runtime_dir();
        let config_path = config::port_config_path(&runtime_dir, port, role);
        let mut helper_failure: Option<FlowdError> = None;

        let command = match role {
            PortRole::Openapi => {
                time::sleep(UPSTREAM_BOOT_SETTLE).await;
                let mut keys = config::ServerKeys::default();
                let mut servers = BTreeMap::new();
                for flow in &flows {
                    let key = keys.assign(flow.server_key_base());
                    if flow.source_type == EndpointType::Stdio {
                        servers.insert(key, config::mcpo_stdio_entry(flow)?);
                        continue;
                    }
                    let raw = flow.sse_url.clone().unwrap_or_default();
                    let upstream = config::rewrite_local_upstream(&raw, &self.settings);
                    if let Some(upstream_port) = url::Url::parse(&upstream)
                        .ok()
                        .and_then(|url| url.port())
                    {
                        if probe::wait_port(upstream_port, UPSTREAM_TCP_WAIT).await {
                            time::sleep(UPSTREAM_TCP_SETTLE).await;
                        } else {
                            warn!(flow = %flow.id, port = upstream_port, "upstream port not ready for OpenAPI flow");
                        }
                    }
                    if !probe::wait_http_ready(&upstream, UPSTREAM_HTTP_WAIT).await {
                        warn!(flow = %flow.id, url = %upstream, "upstream endpoint not ready, omitting flow from config");
                        continue;
                    }
                    servers.insert(key, config::mcpo_remote_entry(flow, upstream));
                }
                let doc = config::McpoDocument { servers };
                config::write_config(&config_path, &doc).await?;
                config::mcpo_command(&self.settings, port, &config_path)
            }
            _ => {
                let mut keys = config::ServerKeys::default();
                let mut servers = BTreeMap::new();
                for flow in &flows {
                    let key = keys.assign(flow.server_key_base());
                    let entry = if flow.is_stdio_bridge() {
                        config::stdio_entry(flow)?
                    } else if flow.source_type == EndpointType::Openapi {
                        match self.helpers.ensure(flow).await {
                            Ok(url) => config::remote_entry(flow, Some(url)),
                            Err(error) => {
                                warn!(flow = %flow.id, %error, "OpenAPI helper not ready, detaching flow");
                                if let Some(binding) = ports.get_mut(&port) {
                                    binding.members.retain(|id| id != &flow.id);
                                }
                                helper_failure.get_or_insert(error);
                                continue;
                            }
                        }
                    } else {
                        config::remote_entry(flow, None)
                    };
                    servers.insert(key, entry);
                }
                if ports
                    .get(&port)
                    .map_or(true, |binding| binding.members.is_empty())
                {
                    ports.remove(&port);
                    return match helper_failure {
                        Some(error) => Err(error),
                        None => Ok(()),
                    };
                }
                let name = match role {
                    PortRole::Stream => "mcp-proxy-streamable-http",
                    _ => "mcp-proxy-sse",
                };
                let doc = config::proxy_document(&self.settings, port, role, name, servers);
                config::write_config(&config_path, &doc).await?;
                config::proxy_command(&self.settings, &config_path)
            }
        };

        let flow_ids = ports
            .get(&port)
            .map(|binding| binding.members.clone())
            .unwrap_or_default();
        info!(port, flows = ?flow_ids, command = ?command.to_argv(), "restarting gateway port");
        let (gateway, output) = process::spawn_child(
            format!("port-{port}"),
            flow_ids,
            &command.program,
            &command.args,
            Some(port),
            false,
            &[],
        )
        .await?;
        if let Some(binding) = ports.get_mut(&port) {
            binding.gateway = Some(gateway.clone());
        }
        self.broadcaster
            .broadcast(Event::FlowStarted {
                flow_id: gateway.label.clone(),
                pid: Some(gateway.pid),
                port,
                command: gateway.command.clone(),
            })
            .await;

        let broadcaster = self.broadcaster.clone();
        let store = self.store.clone();
        let helpers = self.helpers.clone();
        let pump_gateway = gateway.clone();
        tokio::spawn(async move {
            process::pump_output(pump_gateway.clone(), output, broadcaster).await;
            stop_exited_helpers(pump_gateway, store, helpers).await;
        });

        match helper_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Escalated stop of the port's child, plus helper cleanup for the flows
    /// it was serving. Membership is left untouched.
    pub(crate) async fn terminate(&self, ports: &mut PortMap, port: u16) {
        let Some(binding) = ports.get_mut(&port) else {
            return;
        };
        let Some(gateway) = binding.gateway.take() else {
            return;
        };
        if gateway.is_running().await {
            let code = gateway.terminate().await;
            info!(port, code, "gateway terminated");
            for flow_id in &gateway.flow_ids {
                self.helpers.stop(flow_id).await;
            }
        }
    }

    /// Terminates every port and clears the map.
    pub(crate) async fn terminate_all(&self, ports: &mut PortMap) {
        let live: Vec<u16> = ports.keys().copied().collect();
        for port in live {
            self.terminate(ports, port).await;
        }
        ports.clear();
    }

    /// Live state of a flow within an already-locked map.
    pub(crate) async fn state_in(&self, ports: &PortMap, flow_id: &str) -> FlowState {
        for binding in ports.values() {
            let Some(gateway) = &binding.gateway else {
                continue;
            };
            if gateway.flow_ids.iter().any(|id| id == flow_id) && gateway.is_running().await {
                return FlowState {
                    running: true,
                    pid: Some(gateway.pid),
                    started_at: Some(gateway.started_at),
                    port: gateway.port,
                    command: Some(gateway.command.clone()),
                    exit_code: gateway.exit_code().await,
                    last_event: gateway.last_event().await,
                };
            }
        }
        FlowState::default()
    }

    /// Recent log lines of the gateway serving a flow.
    pub(crate) async fn logs_in(&self, ports: &PortMap, flow_id: &str) -> Vec<String> {
        for binding in ports.values() {
            let Some(gateway) = &binding.gateway else {
                continue;
            };
            if gateway.flow_ids.iter().any(|id| id == flow_id) {
                return gateway.log_lines().await;
            }
        }
        Vec::new()
    }

    /// Locking convenience wrappers for read paths.
    pub(crate) async fn state_for(&self, flow_id: &str) -> FlowState {
        let ports = self.state.lock().await;
        self.state_in(&ports, flow_id).await
    }

    pub(crate) async fn logs_for(&self, flow_id: &str) -> Vec<String> {
        let ports = self.state.lock().await;
        self.logs_in(&ports, flow_id).await
    }
}

/// Best-effort teardown of helpers owned by flows of an exited gateway.
async fn stop_exited_helpers(
    gateway: Arc<ChildProcess>,
    store: Arc<FlowStore>,
    helpers: Arc<HelperRegistry>,
) {
    let flows = match store.list().await {
        Ok(flows) => flows,
        Err(error) => {
            warn!(?error, "failed to list flows for helper cleanup");
            return;
        }
    };
    for flow_id in &gateway.flow_ids {
        let is_openapi = flows
            .iter()
            .any(|flow| &flow.id == flow_id && flow.source_type == EndpointType::Openapi);
        if is_openapi {
            helpers.stop(flow_id).await;
        }
    }
}
