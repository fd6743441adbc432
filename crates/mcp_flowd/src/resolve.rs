//! Upstream dependency resolution from source URLs.
//!
//! A flow whose source URL points at a local gateway path
//! (`http://<local-host>:<port>/<route>/<endpoint>…`) depends on the flow
//! exposed under that route, so starting it must activate the upstream
//! first. Resolution is purely syntactic; no probe is involved.

use std::collections::HashSet;

use url::Url;

use crate::{
    flow::{non_empty, EndpointType, Flow},
    settings::Settings,
    store::FlowStore,
    FlowdError,
};

/// Returns the upstream flow whose exposed endpoint `flow`'s source URL
/// points at, if any.
pub(crate) async fn resolve_dependency(
    store: &FlowStore,
    settings: &Settings,
    flow: &Flow,
) -> Result<Option<Flow>, FlowdError> {
    if flow.source_type == EndpointType::Stdio {
        return Ok(None);
    }
    let Some(raw) = non_empty(&flow.sse_url) else {
        return Ok(None);
    };
    let Ok(url) = Url::parse(raw) else {
        return Ok(None);
    };
    let Some(host) = url.host_str() else {
        return Ok(None);
    };
    let local = host == "127.0.0.1"
        || host == "localhost"
        || host == "0.0.0.0"
        || host == settings.host
        || host == settings.inspector_public_host;
    if !local {
        return Ok(None);
    }
    let Some(port) = url.port() else {
        return Ok(None);
    };
    if port == settings.openapi_port {
        return Ok(None);
    }
    let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return Ok(None);
    }
    let route = segments[0];
    let target_type = if segments[1] == "mcp" {
        EndpointType::StreamableHttp
    } else {
        EndpointType::Sse
    };
    store.find_by_route(route, Some(target_type)).await
}

/// Upstream-first activation order for `flow`.
///
/// Follows the dependency links with a visited set, so operator-wired cycles
/// stop the walk instead of erroring.
pub(crate) async fn activation_chain(
    store: &FlowStore,
    settings: &Settings,
    flow: Flow,
) -> Result<Vec<Flow>, FlowdError> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(flow.id.clone());
    let mut chain = vec![flow];
    loop {
        let last = match chain.last() {
            Some(last) => last,
            None => break,
        };
        match resolve_dependency(store, settings, last).await? {
            Some(upstream) if visited.insert(upstream.id.clone()) => chain.push(upstream),
            _ => break,
        }
    }
    chain.reverse();
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowDraft;
    use chrono::Utc;

    fn settings() -> Settings {
        let mut settings = Settings::from_env();
        settings.host = "0.0.0.0".into();
        settings.sse_port = 8002;
        settings.stream_port = 8001;
        settings.openapi_port = 8003;
        settings.inspector_public_host = "localhost".into();
        settings
    }

    async fn store_with(flows: Vec<Flow>) -> (tempfile::TempDir, FlowStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path().join("flows.json")).unwrap();
        for flow in flows {
            store.upsert(flow).await.unwrap();
        }
        (dir, store)
    }

    fn upstream_flow(route: &str, target: EndpointType) -> Flow {
        let now = Utc::now();
        FlowDraft {
            name: route.into(),
            route: Some(route.into()),
            source_type: EndpointType::Stdio,
            target_type: target,
            command: Some("/bin/cat".into()),
            ..FlowDraft::default()
        }
        .materialize(format!("up-{route}"), now, now)
    }

    fn dependent_flow(url: &str) -> Flow {
        let now = Utc::now();
        FlowDraft {
            name: "downstream".into(),
            source_type: EndpointType::Sse,
            target_type: EndpointType::StreamableHttp,
            sse_url: Some(url.into()),
            ..FlowDraft::default()
        }
        .materialize("down".into(), now, now)
    }

    #[tokio::test]
    async fn local_sse_urls_resolve_to_the_routed_flow() {
        let upstream = upstream_flow("a", EndpointType::Sse);
        let (_dir, store) = store_with(vec![upstream.clone()]).await;
        let flow = dependent_flow("http://localhost:8002/a/sse");
        let resolved = resolve_dependency(&store, &settings(), &flow)
            .await
            .unwrap();
        assert_eq!(resolved.map(|f| f.id), Some(upstream.id));
    }

    #[tokio::test]
    async fn mcp_endpoints_match_streamable_http_targets() {
        let upstream = upstream_flow("a", EndpointType::StreamableHttp);
        let (_dir, store) = store_with(vec![upstream.clone()]).await;
        let flow = dependent_flow("http://127.0.0.1:8001/a/mcp");
        let resolved = resolve_dependency(&store, &settings(), &flow)
            .await
            .unwrap();
        assert_eq!(resolved.map(|f| f.id), Some(upstream.id));
    }

    #[tokio::test]
    async fn remote_hosts_and_openapi_ports_do_not_resolve() {
        let upstream = upstream_flow("a", EndpointType::Sse);
        let (_dir, store) = store_with(vec![upstream]).await;
        let settings = settings();
        for url in [
            "http://example.com:8002/a/sse",
            "http://localhost:8003/a/sse",
            "http://localhost:8002/a",
            "http://localhost/a/sse",
        ] {
            let resolved = resolve_dependency(&store, &settings, &dependent_flow(url))
                .await
                .unwrap();
            assert!(resolved.is_none(), "{url} should not resolve");
        }
    }

    #[tokio::test]
    async fn activation_chains_stop_on_cycles() {
        let mut a = upstream_flow("a", EndpointType::Sse);
        a.source_type = EndpointType::Sse;
        a.sse_url = Some("http://localhost:8002/b/sse".into());
        let mut b = upstream_flow("b", EndpointType::Sse);
        b.source_type = EndpointType::Sse;
        b.sse_url = Some("http://localhost:8002/a/sse".into());
        let (_dir, store) = store_with(vec![a.clone(), b.clone()]).await;

        let chain = activation_chain(&store, &settings(), a.clone()).await.unwrap();
        let ids: Vec<_> = chain.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);
    }
}
