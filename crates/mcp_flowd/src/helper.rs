//! Per-flow OpenAPI-to-MCP side-car processes.
//!
//! A flow whose source is an OpenAPI description but whose gateway is an
//! `mcp-proxy` port gets a private bridge child exposing
//! `http://127.0.0.1:<port>/mcp`. Helpers run in their own process group so
//! that stopping one also reaches descendants spawned by wrapper launchers.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time};
use tracing::{info, warn};

use crate::{
    events::EventBroadcaster,
    flow::{non_empty, Flow},
    probe,
    process::{self, ChildProcess},
    settings::Settings,
    FlowdError,
};

/// Budget for the helper's port to open after spawn (100 ms poll).
const PORT_WAIT: Duration = Duration::from_secs(5);

/// Extra settle time for the MCP handshake after the port opens.
const HANDSHAKE_SETTLE: Duration = Duration::from_millis(2500);

/// Registry of running helpers keyed by flow id.
pub(crate) struct HelperRegistry {
    settings: Settings,
    broadcaster: Arc<EventBroadcaster>,
    helpers: Mutex<HashMap<String, Arc<ChildProcess>>>,
}

impl HelperRegistry {
    pub(crate) fn new(settings: Settings, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            settings,
            broadcaster,
            helpers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the MCP URL of a live helper for the flow, spawning one if
    /// needed. Spawning waits for the port to open and then for the MCP
    /// handshake settle before the URL is handed out.
    pub(crate) async fn ensure(&self, flow: &Flow) -> Result<String, FlowdError> {
        let base_url = non_empty(&flow.openapi_base_url).ok_or(FlowdError::OpenapiUrlsRequired)?;
        let spec_url = non_empty(&flow.openapi_spec_url).ok_or(FlowdError::OpenapiUrlsRequired)?;

        let mut helpers = self.helpers.lock().await;
        if let Some(existing) = helpers.get(&flow.id) {
            if existing.is_running().await {
                if let Some(port) = existing.port {
                    if probe::wait_port(port, PORT_WAIT).await {
                        return Ok(mount_url(port));
                    }
                }
            }
        }

        let port = probe::free_port().await?;
        let mut words = self.settings.helper_bin.split_whitespace().map(String::from);
        let program = words.next().unwrap_or_else(|| "npx".to_string());
        let mut args: Vec<String> = words.collect();
        args.extend([
            "--api-base-url".to_string(),
            base_url.to_string(),
            "--openapi-spec".to_string(),
            spec_url.to_string(),
            "--transport".to_string(),
            "http".to_string(),
            "--port".to_string(),
            port.to_string(),
        ]);
        let (helper, output) = process::spawn_child(
            format!("openapi-{}", flow.id),
            vec![flow.id.clone()],
            &program,
            &args,
            Some(port),
            true,
            &[],
        )
        .await?;
        helpers.insert(flow.id.clone(), helper.clone());
        tokio::spawn(process::pump_output(
            helper.clone(),
            output,
            self.broadcaster.clone(),
        ));
        info!(flow = %flow.id, port, "started OpenAPI helper");

        if !probe::wait_port(port, PORT_WAIT).await {
            warn!(flow = %flow.id, port, "OpenAPI helper port never opened");
            return Err(FlowdError::HelperNotReady {
                flow_id: flow.id.clone(),
                port,
                timeout: PORT_WAIT,
            });
        }
        // The port opens before the MCP endpoint finishes initialising.
        time::sleep(HANDSHAKE_SETTLE).await;
        Ok(mount_url(port))
    }

    /// MCP URL of an already-running helper, if any.
    pub(crate) async fn live_url(&self, flow_id: &str) -> Option<String> {
        let helpers = self.helpers.lock().await;
        let helper = helpers.get(flow_id)?;
        if helper.is_running().await {
            helper.port.map(mount_url)
        } else {
            None
        }
    }

    /// Stops and forgets the helper for a flow; no-op when absent.
    pub(crate) async fn stop(&self, flow_id: &str) {
        let removed = self.helpers.lock().await.remove(flow_id);
        if let Some(helper) = removed {
            let code = helper.terminate().await;
            info!(flow = flow_id, pid = helper.pid, code, "stopped OpenAPI helper");
        }
    }

    /// Stops every registered helper.
    pub(crate) async fn stop_all(&self) {
        let drained: Vec<_> = self.helpers.lock().await.drain().collect();
        for (flow_id, helper) in drained {
            let code = helper.terminate().await;
            info!(flow = %flow_id, pid = helper.pid, code, "stopped OpenAPI helper");
        }
    }

}

fn mount_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/mcp")
}
