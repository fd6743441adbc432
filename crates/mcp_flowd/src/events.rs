//! Lifecycle and log event fan-out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

/// Queue capacity granted to each subscriber.
pub const SUBSCRIBER_CAPACITY: usize = 100;

/// Payload fanned out to event subscribers.
///
/// `flowId` carries the label of the emitting child (`port-<P>` for gateways,
/// `openapi-<flow_id>` for helpers), matching what consumers key their views
/// on.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log {
        #[serde(rename = "flowId")]
        flow_id: String,
        line: String,
        ts: DateTime<Utc>,
    },
    FlowStarted {
        #[serde(rename = "flowId")]
        flow_id: String,
        pid: Option<u32>,
        port: u16,
        command: Vec<String>,
    },
    FlowExited {
        #[serde(rename = "flowId")]
        flow_id: String,
        code: Option<i32>,
        ts: DateTime<Utc>,
    },
}

/// Fan-out registry with bounded per-subscriber buffers.
///
/// A subscriber whose buffer is full at broadcast time is silently dropped
/// from the registry; it is never blocked on.
#[derive(Debug, Default)]
pub struct EventBroadcaster {
    listeners: Mutex<Vec<mpsc::Sender<Event>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Dropping the receiver unregisters it.
    pub async fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.listeners.lock().await.push(tx);
        rx
    }

    /// Queues the event to every live subscriber in registration order.
    pub async fn broadcast(&self, event: Event) {
        let mut listeners = self.listeners.lock().await;
        listeners.retain(|listener| listener.try_send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_event(n: usize) -> Event {
        Event::Log {
            flow_id: "port-8002".into(),
            line: format!("line {n}"),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn events_arrive_in_broadcast_order() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe().await;
        for n in 0..5 {
            broadcaster.broadcast(log_event(n)).await;
        }
        for n in 0..5 {
            match rx.recv().await {
                Some(Event::Log { line, .. }) => assert_eq!(line, format!("line {n}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscribers_are_dropped_not_blocked() {
        let broadcaster = EventBroadcaster::new();
        let mut slow = broadcaster.subscribe().await;
        for n in 0..SUBSCRIBER_CAPACITY + 10 {
            broadcaster.broadcast(log_event(n)).await;
        }
        // The buffer holds exactly the capacity; the channel then closes
        // because the sender was dropped from the registry.
        let mut received = 0;
        while slow.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CAPACITY);

        // A fresh subscriber still hears later events.
        let mut live = broadcaster.subscribe().await;
        broadcaster.broadcast(log_event(999)).await;
        assert!(matches!(live.recv().await, Some(Event::Log { line, .. }) if line == "line 999"));
    }

    #[test]
    fn payloads_serialize_with_a_type_discriminator() {
        let event = Event::FlowStarted {
            flow_id: "port-8002".into(),
            pid: Some(42),
            port: 8002,
            command: vec!["mcp-proxy".into()],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "flow_started");
        assert_eq!(value["flowId"], "port-8002");
        assert_eq!(value["port"], 8002);
    }
}
