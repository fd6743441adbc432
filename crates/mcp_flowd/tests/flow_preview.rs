mod support;

use mcp_flowd::{EndpointType, FlowDraft, FlowdError, Supervisor};
use tempfile::tempdir;

fn echo_draft() -> FlowDraft {
    FlowDraft {
        id: Some("f1".into()),
        name: "echo".into(),
        source_type: EndpointType::Stdio,
        target_type: EndpointType::Sse,
        command: Some("/bin/echo".into()),
        args: vec!["hi".into()],
        ..FlowDraft::default()
    }
}

#[tokio::test]
async fn test_flow_writes_the_preview_and_checks_the_binary() {
    let dir = tempdir().unwrap();
    let gateway = support::write_fake_gateway(dir.path());
    let settings = support::test_settings(dir.path(), &gateway);
    let runtime_dir = settings.runtime_dir();
    let supervisor = Supervisor::new(settings).unwrap();
    supervisor.create_flow(echo_draft()).await.unwrap();

    let report = supervisor.test_flow("f1").await.unwrap();
    assert!(report.ok);
    assert_eq!(report.port, 18102);
    let preview_path = runtime_dir.join("f1.config.json");
    assert_eq!(
        report.command,
        vec![
            gateway.display().to_string(),
            "-config".to_string(),
            preview_path.display().to_string(),
        ]
    );

    let body = std::fs::read_to_string(&preview_path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    // The per-flow preview carries the flow's own name, not the port label.
    assert_eq!(value["mcpProxy"]["name"], "echo");
    assert_eq!(value["mcpServers"]["echo"]["command"], "/bin/echo");
}

#[tokio::test]
async fn test_flow_reports_a_missing_gateway_binary() {
    let dir = tempdir().unwrap();
    let gateway = support::write_fake_gateway(dir.path());
    let mut settings = support::test_settings(dir.path(), &gateway);
    settings.proxy_bin = dir.path().join("missing-gateway").display().to_string();
    let supervisor = Supervisor::new(settings).unwrap();
    supervisor.create_flow(echo_draft()).await.unwrap();

    assert!(matches!(
        supervisor.test_flow("f1").await,
        Err(FlowdError::BinaryNotFound(_))
    ));
}

#[tokio::test]
async fn deleting_a_flow_removes_its_preview_config() {
    let dir = tempdir().unwrap();
    let gateway = support::write_fake_gateway(dir.path());
    let settings = support::test_settings(dir.path(), &gateway);
    let runtime_dir = settings.runtime_dir();
    let supervisor = Supervisor::new(settings).unwrap();
    supervisor.create_flow(echo_draft()).await.unwrap();

    supervisor.test_flow("f1").await.unwrap();
    let preview_path = runtime_dir.join("f1.config.json");
    assert!(preview_path.exists());

    supervisor.delete_flow("f1").await.unwrap();
    assert!(!preview_path.exists());
}
