//! Singleton MCP inspector child.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rand::RngCore;
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Mutex,
};
use tracing::info;

use crate::{
    process::{self, ChildOutput, ChildProcess},
    settings::{Settings, DEFAULT_INSPECTOR_SERVER_PORT},
    FlowdError,
};

/// Output markers after which the inspector URL may be exposed.
const READY_MARKERS: [&str; 2] = ["proxy server listening", "inspector is up"];

/// Reported inspector state. The URL stays hidden until the child has logged
/// a readiness marker, so callers never hand out a dead link.
#[derive(Clone, Debug, Default, Serialize)]
pub struct InspectorState {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

struct RunningInspector {
    child: Arc<ChildProcess>,
    url: String,
    ready: Arc<AtomicBool>,
}

/// Owns at most one inspector child at a time.
pub(crate) struct InspectorSupervisor {
    settings: Settings,
    state: Mutex<Option<RunningInspector>>,
}

impl InspectorSupervisor {
    pub(crate) fn new(settings: Settings) -> Self {
        Self {
            settings,
            state: Mutex::new(None),
        }
    }

    /// Restarts the inspector with a fresh auth token.
    ///
    /// The requested URL is accepted for interface compatibility; the
    /// inspector always serves its own UI.
    pub(crate) async fn start(
        &self,
        _requested_url: Option<String>,
    ) -> Result<InspectorState, FlowdError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.take() {
            existing.child.terminate().await;
        }

        let token = auth_token();
        let mut url = format!(
            "http://{}:{}/?MCP_PROXY_AUTH_TOKEN={token}",
            self.settings.inspector_public_host, self.settings.inspector_client_port
        );
        if self.settings.inspector_server_port != DEFAULT_INSPECTOR_SERVER_PORT {
            url.push_str(&format!(
                "&MCP_PROXY_PORT={}",
                self.settings.inspector_server_port
            ));
        }

        let env = [
            ("MCP_PROXY_AUTH_TOKEN".to_string(), token),
            ("MCP_AUTO_OPEN_ENABLED".to_string(), "false".to_string()),
            (
                "CLIENT_PORT".to_string(),
                self.settings.inspector_client_port.to_string(),
            ),
            (
                "SERVER_PORT".to_string(),
                self.settings.inspector_server_port.to_string(),
            ),
            ("HOST".to_string(), self.settings.inspector_host.clone()),
        ];
        let mut words = self
            .settings
            .inspector_bin
            .split_whitespace()
            .map(String::from);
        let program = words.next().unwrap_or_else(|| "npx".to_string());
        let args: Vec<String> = words.collect();

        info!(%url, program, "starting MCP inspector");
        let (child, output) = process::spawn_child(
            "inspector".to_string(),
            Vec::new(),
            &program,
            &args,
            Some(self.settings.inspector_client_port),
            false,
            &env,
        )
        .await?;

        let ready = Arc::new(AtomicBool::new(false));
        tokio::spawn(pump_inspector(child.clone(), output, ready.clone()));
        *state = Some(RunningInspector { child, url, ready });
        Ok(report(&self.settings, state.as_ref()).await)
    }

    /// Stops the inspector; idempotent.
    pub(crate) async fn stop(&self) -> InspectorState {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.take() {
            existing.child.terminate().await;
        }
        report(&self.settings, None).await
    }

    pub(crate) async fn state(&self) -> InspectorState {
        let state = self.state.lock().await;
        report(&self.settings, state.as_ref()).await
    }
}

async fn report(settings: &Settings, state: Option<&RunningInspector>) -> InspectorState {
    match state {
        Some(running) => InspectorState {
            running: running.child.is_running().await,
            cmd: Some(running.child.command.clone()),
            url: running
                .ready
                .load(Ordering::Relaxed)
                .then(|| running.url.clone()),
            port: settings.inspector_client_port,
            pid: Some(running.child.pid),
        },
        None => InspectorState {
            port: settings.inspector_client_port,
            ..InspectorState::default()
        },
    }
}

/// Mirrors inspector output into tracing and flips the ready flag on the
/// first readiness marker.
async fn pump_inspector(child: Arc<ChildProcess>, output: ChildOutput, ready: Arc<AtomicBool>) {
    let (stdout, stderr) = output.into_streams();
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let mut out_done = false;
    let mut err_done = false;
    while !(out_done && err_done) {
        let line = tokio::select! {
            read = stdout.next_line(), if !out_done => match read {
                Ok(Some(line)) => Some(line),
                _ => {
                    out_done = true;
                    None
                }
            },
            read = stderr.next_line(), if !err_done => match read {
                Ok(Some(line)) => Some(line),
                _ => {
                    err_done = true;
                    None
                }
            },
        };
        if let Some(line) = line {
            info!(target: "inspector", "{line}");
            let lower = line.to_lowercase();
            if READY_MARKERS.iter().any(|marker| lower.contains(marker)) {
                ready.store(true, Ordering::Relaxed);
            }
        }
    }
    let code = child.harvest_exit().await;
    info!(pid = child.pid, code, "inspector process exited");
}

/// 64-hex-char token injected into the inspector environment and URL.
fn auth_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
