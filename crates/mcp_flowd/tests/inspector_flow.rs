mod support;

use std::time::Duration;

use mcp_flowd::Supervisor;
use tempfile::tempdir;
use tokio::time;

#[tokio::test]
async fn inspector_url_is_exposed_only_after_the_ready_line() {
    let dir = tempdir().unwrap();
    let gateway = support::write_fake_gateway(dir.path());
    let inspector = support::write_executable(
        dir.path(),
        "inspector",
        "#!/bin/sh\necho \"Proxy server listening on port 16285\"\nexec sleep 300\n",
    );
    let mut settings = support::test_settings(dir.path(), &gateway);
    settings.inspector_bin = inspector.display().to_string();
    let supervisor = Supervisor::new(settings).unwrap();

    let started = supervisor.inspector_start(None).await.unwrap();
    assert!(started.running);
    assert_eq!(started.port, 16275);

    // The URL appears once the readiness marker has been observed.
    let mut url = None;
    for _ in 0..40 {
        let state = supervisor.inspector_state().await;
        if state.url.is_some() {
            url = state.url;
            break;
        }
        time::sleep(Duration::from_millis(50)).await;
    }
    let url = url.expect("inspector url exposed after ready line");
    assert!(url.starts_with("http://localhost:16275/?MCP_PROXY_AUTH_TOKEN="));
    // 16285 differs from the stock inspector server port, so it is pinned.
    assert!(url.ends_with("&MCP_PROXY_PORT=16285"));
    let token = url
        .split("MCP_PROXY_AUTH_TOKEN=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .unwrap();
    assert_eq!(token.len(), 64);

    let stopped = supervisor.inspector_stop().await;
    assert!(!stopped.running);
    assert!(stopped.url.is_none());
    // Stop is idempotent.
    let stopped_again = supervisor.inspector_stop().await;
    assert!(!stopped_again.running);
}
