//! Child process handles, spawning, termination, and the log pump.

use std::{
    collections::VecDeque,
    io,
    os::unix::process::ExitStatusExt,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    sync::Mutex,
    time,
};
use tracing::{error, info, warn};

use crate::{
    events::{Event, EventBroadcaster},
    FlowdError,
};

/// Grace period between SIGTERM and SIGKILL.
pub(crate) const TERM_GRACE: Duration = Duration::from_secs(5);

/// Output lines retained per child.
pub(crate) const LOG_CAPACITY: usize = 200;

/// Recent output lines plus the time of the last one.
#[derive(Debug, Default)]
pub(crate) struct LogRing {
    lines: VecDeque<String>,
    last_event: Option<DateTime<Utc>>,
}

impl LogRing {
    fn push(&mut self, line: String) {
        if self.lines.len() == LOG_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.last_event = Some(Utc::now());
    }
}

#[derive(Clone, Copy, Debug)]
struct ExitRecord {
    code: Option<i32>,
}

/// A spawned gateway, helper, or inspector child plus its bookkeeping.
///
/// The `Child` itself sits behind an async mutex so the terminate path can
/// `wait` on it while the log pump harvests the exit status on EOF.
#[derive(Debug)]
pub(crate) struct ChildProcess {
    pub(crate) label: String,
    pub(crate) flow_ids: Vec<String>,
    pub(crate) command: Vec<String>,
    pub(crate) pid: u32,
    pub(crate) port: Option<u16>,
    pub(crate) started_at: DateTime<Utc>,
    own_group: bool,
    child: Mutex<Child>,
    logs: Mutex<LogRing>,
    exit: Mutex<Option<ExitRecord>>,
}

/// Piped output streams handed to the log pump.
#[derive(Debug)]
pub(crate) struct ChildOutput {
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl ChildOutput {
    pub(crate) fn into_streams(self) -> (ChildStdout, ChildStderr) {
        (self.stdout, self.stderr)
    }
}

impl ChildProcess {
    /// True until an exit has been recorded by the pump or a terminate.
    pub(crate) async fn is_running(&self) -> bool {
        self.exit.lock().await.is_none()
    }

    pub(crate) async fn exit_code(&self) -> Option<i32> {
        (*self.exit.lock().await).and_then(|record| record.code)
    }

    pub(crate) async fn log_lines(&self) -> Vec<String> {
        self.logs.lock().await.lines.iter().cloned().collect()
    }

    pub(crate) async fn last_event(&self) -> Option<DateTime<Utc>> {
        self.logs.lock().await.last_event
    }

    async fn record_line(&self, line: String) {
        self.logs.lock().await.push(line);
    }

    /// Records the exit on stream EOF, reaping the child if nobody has yet.
    pub(crate) async fn harvest_exit(&self) -> Option<i32> {
        if let Some(record) = *self.exit.lock().await {
            return record.code;
        }
        let status = {
            let mut child = self.child.lock().await;
            child.try_wait().ok().flatten()
        };
        let code = status.and_then(exit_code_of);
        let mut slot = self.exit.lock().await;
        let record = slot.get_or_insert(ExitRecord { code });
        record.code
    }

    /// SIGTERM, a bounded grace wait, then SIGKILL. Returns the exit code.
    ///
    /// Children spawned in their own process group are signalled group-wide
    /// so descendants of wrapper launchers receive the signal too.
    pub(crate) async fn terminate(&self) -> Option<i32> {
        if !self.is_running().await {
            return self.exit_code().await;
        }
        let pid = Pid::from_raw(self.pid as i32);
        let term = if self.own_group {
            signal::killpg(pid, Signal::SIGTERM)
        } else {
            signal::kill(pid, Signal::SIGTERM)
        };
        if let Err(errno) = term {
            warn!(label = %self.label, %errno, "SIGTERM delivery failed");
        }
        let status = {
            let mut child = self.child.lock().await;
            match time::timeout(TERM_GRACE, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(source)) => {
                    warn!(label = %self.label, ?source, "wait after SIGTERM failed");
                    None
                }
                Err(_) => {
                    warn!(label = %self.label, grace = ?TERM_GRACE, "child ignored SIGTERM, escalating");
                    if self.own_group {
                        let _ = signal::killpg(pid, Signal::SIGKILL);
                    }
                    if let Err(source) = child.kill().await {
                        error!(label = %self.label, ?source, "SIGKILL failed");
                    }
                    child.try_wait().ok().flatten()
                }
            }
        };
        let code = status.and_then(exit_code_of);
        let mut slot = self.exit.lock().await;
        let record = slot.get_or_insert(ExitRecord { code });
        record.code
    }
}

/// Spawns `program args…` with piped, line-oriented output.
///
/// The environment is inherited; `extra_env` is layered on top. A missing
/// binary maps to [`FlowdError::BinaryNotFound`], everything else to
/// [`FlowdError::Spawn`].
pub(crate) async fn spawn_child(
    label: String,
    flow_ids: Vec<String>,
    program: &str,
    args: &[String],
    port: Option<u16>,
    own_group: bool,
    extra_env: &[(String, String)],
) -> Result<(Arc<ChildProcess>, ChildOutput), FlowdError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    if own_group {
        cmd.process_group(0);
    }
    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            FlowdError::BinaryNotFound(program.to_string())
        } else {
            FlowdError::Spawn {
                binary: program.to_string(),
                source,
            }
        }
    })?;
    let stdout = child.stdout.take().ok_or(FlowdError::OutputUnavailable)?;
    let stderr = child.stderr.take().ok_or(FlowdError::OutputUnavailable)?;
    let pid = child.id().unwrap_or_default();

    let mut command = Vec::with_capacity(args.len() + 1);
    command.push(program.to_string());
    command.extend(args.iter().cloned());

    let handle = Arc::new(ChildProcess {
        label,
        flow_ids,
        command,
        pid,
        port,
        started_at: Utc::now(),
        own_group,
        child: Mutex::new(child),
        logs: Mutex::new(LogRing::default()),
        exit: Mutex::new(None),
    });
    Ok((handle, ChildOutput { stdout, stderr }))
}

/// Streams both output pipes line by line into the ring buffer and the
/// broadcaster, then records the exit and emits `flow_exited`.
pub(crate) async fn pump_output(
    proc: Arc<ChildProcess>,
    output: ChildOutput,
    broadcaster: Arc<EventBroadcaster>,
) {
    let mut stdout = BufReader::new(output.stdout).lines();
    let mut stderr = BufReader::new(output.stderr).lines();
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
            proc.record_line(line.clone()).await;
            broadcaster
                .broadcast(Event::Log {
                    flow_id: proc.label.clone(),
                    line,
                    ts: Utc::now(),
                })
                .await;
        }
    }
    let code = proc.harvest_exit().await;
    info!(label = %proc.label, code, "child exited");
    broadcaster
        .broadcast(Event::FlowExited {
            flow_id: proc.label.clone(),
            code,
            ts: Utc::now(),
        })
        .await;
}

/// Exit code of a status, mapping signal deaths to negative codes.
fn exit_code_of(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| -sig))
}
