//! Bounded-time readiness probes.
//!
//! Every probe has an explicit deadline; nothing here blocks indefinitely.

use std::time::Duration;

use tokio::{
    net::{TcpListener, TcpStream},
    time,
};
use tracing::debug;

use crate::FlowdError;

const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(200);
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const HTTP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
const HTTP_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Picks a free ephemeral TCP port.
pub(crate) async fn free_port() -> Result<u16, FlowdError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|_| FlowdError::NoFreePort)?;
    let addr = listener.local_addr().map_err(|_| FlowdError::NoFreePort)?;
    Ok(addr.port())
}

/// True once a TCP connect to `127.0.0.1:<port>` succeeds within `budget`.
pub(crate) async fn wait_port(port: u16, budget: Duration) -> bool {
    let deadline = time::Instant::now() + budget;
    loop {
        if port_open(port).await {
            return true;
        }
        if time::Instant::now() >= deadline {
            return false;
        }
        time::sleep(PORT_POLL_INTERVAL).await;
    }
}

async fn port_open(port: u16) -> bool {
    matches!(
        time::timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Polls `url` with GET until any non-404 response arrives.
///
/// A 404 means the upstream has bound its port but not mounted the endpoint
/// yet; every other response, error statuses included, counts as ready.
/// Connection failures count as not ready.
pub(crate) async fn wait_http_ready(url: &str, budget: Duration) -> bool {
    let Ok(client) = reqwest::Client::builder()
        .timeout(HTTP_ATTEMPT_TIMEOUT)
        .build()
    else {
        return false;
    };
    let deadline = time::Instant::now() + budget;
    loop {
        match client.get(url).send().await {
            Ok(response) if response.status() != reqwest::StatusCode::NOT_FOUND => return true,
            Ok(_) => {}
            Err(error) => debug!(url, ?error, "upstream probe attempt failed"),
        }
        if time::Instant::now() >= deadline {
            return false;
        }
        time::sleep(HTTP_RETRY_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn free_port_returns_a_usable_port() {
        let port = free_port().await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn wait_port_sees_a_bound_listener() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(wait_port(port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn wait_port_gives_up_on_a_closed_port() {
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!wait_port(port, Duration::from_millis(300)).await);
    }
}
