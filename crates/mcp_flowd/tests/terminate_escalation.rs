mod support;

use std::time::Duration;

use mcp_flowd::{EndpointType, Event, FlowDraft, Supervisor};
use tempfile::tempdir;
use tokio::time;

#[tokio::test]
async fn sigterm_escalates_to_sigkill_for_stubborn_children() {
    let dir = tempdir().unwrap();
    let gateway = support::write_stubborn_gateway(dir.path());
    let supervisor = Supervisor::new(support::test_settings(dir.path(), &gateway)).unwrap();

    supervisor
        .create_flow(FlowDraft {
            id: Some("f1".into()),
            name: "echo".into(),
            source_type: EndpointType::Stdio,
            target_type: EndpointType::Sse,
            command: Some("/bin/echo".into()),
            ..FlowDraft::default()
        })
        .await
        .unwrap();
    supervisor.start_flow("f1").await.unwrap();

    let mut events = supervisor.subscribe().await;
    let stopped = supervisor.stop_flow("f1").await.unwrap();
    assert!(!stopped.running);

    // The shell traps TERM, so the exit must come from the SIGKILL fallback.
    let deadline = time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        let event = time::timeout(remaining, events.recv())
            .await
            .expect("flow_exited before deadline")
            .expect("event stream open");
        if let Event::FlowExited { code, .. } = event {
            assert_eq!(code, Some(-9));
            break;
        }
    }

    supervisor.shutdown().await;
}
