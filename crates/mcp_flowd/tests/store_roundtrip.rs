use std::collections::BTreeMap;

use chrono::Utc;
use mcp_flowd::{
    EndpointType, Flow, FlowStore, FlowdError, PreviousConfig, Transport,
};
use tempfile::tempdir;

fn flow(id: &str, route: &str, target_type: EndpointType) -> Flow {
    let now = Utc::now();
    Flow {
        id: id.into(),
        name: route.into(),
        route: route.into(),
        description: None,
        source_type: EndpointType::Stdio,
        target_type,
        sse_url: None,
        openapi_base_url: None,
        openapi_spec_url: None,
        transport: Transport::Sse,
        server_transport: Transport::Sse,
        stateless: false,
        auto_start: true,
        command: Some("/bin/cat".into()),
        args: Vec::new(),
        env: BTreeMap::new(),
        headers: Vec::new(),
        allow_origins: Vec::new(),
        previous: PreviousConfig::default(),
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn upsert_get_delete_round_trip() {
    let dir = tempdir().unwrap();
    let store = FlowStore::new(dir.path().join("flows.json")).unwrap();

    assert!(store.list().await.unwrap().is_empty());
    store.upsert(flow("f1", "a", EndpointType::Sse)).await.unwrap();
    store.upsert(flow("f2", "b", EndpointType::Sse)).await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 2);

    let fetched = store.get("f1").await.unwrap();
    assert_eq!(fetched.route, "a");

    let mut replacement = flow("f1", "a2", EndpointType::Sse);
    replacement.command = Some("/bin/true".into());
    store.upsert(replacement).await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 2);
    assert_eq!(store.get("f1").await.unwrap().route, "a2");

    store.delete("f1").await.unwrap();
    assert!(matches!(
        store.get("f1").await,
        Err(FlowdError::FlowNotFound(_))
    ));
    assert!(matches!(
        store.delete("f1").await,
        Err(FlowdError::FlowNotFound(_))
    ));
}

#[tokio::test]
async fn records_survive_a_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("flows.json");
    {
        let store = FlowStore::new(path.clone()).unwrap();
        store.upsert(flow("f1", "a", EndpointType::Sse)).await.unwrap();
    }
    let reopened = FlowStore::new(path).unwrap();
    let flows = reopened.list().await.unwrap();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].id, "f1");
    assert_eq!(flows[0].command.as_deref(), Some("/bin/cat"));
}

#[tokio::test]
async fn find_by_route_respects_the_target_filter() {
    let dir = tempdir().unwrap();
    let store = FlowStore::new(dir.path().join("flows.json")).unwrap();
    store
        .upsert(flow("sse", "a", EndpointType::Sse))
        .await
        .unwrap();
    store
        .upsert(flow("stream", "a", EndpointType::StreamableHttp))
        .await
        .unwrap();

    let any = store.find_by_route("a", None).await.unwrap().unwrap();
    assert_eq!(any.id, "sse");

    let stream = store
        .find_by_route("a", Some(EndpointType::StreamableHttp))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stream.id, "stream");

    assert!(store
        .find_by_route("missing", None)
        .await
        .unwrap()
        .is_none());
}
