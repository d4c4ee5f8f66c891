//! Event hub: topic subscriptions and fan-out to connections.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use drydock_protocol::Event;

/// Size of the per-connection send buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// Publishing side of the hub.
///
/// Managers depend on this interface only; they never see connections or
/// each other. `publish` enqueues onto the hub's internal queue and returns
/// immediately, so no manager lock is ever held while events are delivered.
pub trait EventSink: Send + Sync {
    fn publish(&self, topic: &str, event: Event);
}

struct Connection {
    tx: mpsc::Sender<Event>,
    last_activity: Mutex<Instant>,
}

/// Event hub managing connections and topic subscriptions.
///
/// The hub is responsible for:
/// - Tracking active WebSocket connections
/// - Managing topic memberships set by explicit join/leave
/// - Relaying manager events to subscribed connections, at-most-once,
///   preserving order per upstream source
pub struct EventHub {
    /// Connection ID -> live connection
    connections: DashMap<String, Connection>,

    /// Topic -> set of subscribed connection IDs
    topics: DashMap<String, HashSet<String>>,

    /// Internal publish queue, drained by the dispatcher task.
    publish_tx: mpsc::UnboundedSender<(String, Event)>,
}

impl EventHub {
    /// Create a new hub and start its dispatcher task.
    pub fn new() -> Arc<Self> {
        let (publish_tx, mut publish_rx) = mpsc::unbounded_channel::<(String, Event)>();

        let hub = Arc::new(Self {
            connections: DashMap::new(),
            topics: DashMap::new(),
            publish_tx,
        });

        // The dispatcher holds a weak reference so the hub can be dropped;
        // the task ends when the hub is gone or all senders are dropped.
        let weak: Weak<EventHub> = Arc::downgrade(&hub);
        tokio::spawn(async move {
            while let Some((topic, event)) = publish_rx.recv().await {
                let Some(hub) = weak.upgrade() else { break };
                hub.dispatch(&topic, event);
            }
        });

        hub
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID and a receiver for events targeted at it.
    pub fn register_connection(&self) -> (String, mpsc::Receiver<Event>) {
        let conn_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        self.connections.insert(
            conn_id.clone(),
            Connection {
                tx,
                last_activity: Mutex::new(Instant::now()),
            },
        );
        info!("Registered connection {}", conn_id);
        (conn_id, rx)
    }

    /// Unregister a connection and discard its topic memberships.
    ///
    /// This never touches manager-level sessions: sessions end only via
    /// explicit kill/terminate or idle eviction, independent of watchers.
    pub fn unregister_connection(&self, conn_id: &str) {
        if self.connections.remove(conn_id).is_some() {
            info!("Unregistered connection {}", conn_id);
        }
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().remove(conn_id);
        }
        self.topics.retain(|_, members| !members.is_empty());
    }

    /// Subscribe a connection to a topic. Returns false for unknown connections.
    pub fn join(&self, conn_id: &str, topic: &str) -> bool {
        if !self.connections.contains_key(conn_id) {
            return false;
        }
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(conn_id.to_string());
        debug!("Connection {} joined {}", conn_id, topic);
        true
    }

    /// Unsubscribe a connection from a topic.
    pub fn leave(&self, conn_id: &str, topic: &str) {
        if let Some(mut members) = self.topics.get_mut(topic) {
            members.remove(conn_id);
        }
        self.topics.retain(|_, members| !members.is_empty());
        debug!("Connection {} left {}", conn_id, topic);
    }

    /// Whether a connection is subscribed to a topic.
    pub fn is_subscribed(&self, conn_id: &str, topic: &str) -> bool {
        self.topics
            .get(topic)
            .map(|members| members.contains(conn_id))
            .unwrap_or(false)
    }

    /// Number of subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|m| m.len()).unwrap_or(0)
    }

    /// Record activity on a connection (inbound frame received).
    pub fn touch(&self, conn_id: &str) {
        if let Some(conn) = self.connections.get(conn_id) {
            if let Ok(mut last) = conn.last_activity.lock() {
                *last = Instant::now();
            }
        }
    }

    /// Connections idle for longer than `threshold`.
    pub fn idle_connections(&self, threshold: Duration) -> Vec<String> {
        let now = Instant::now();
        self.connections
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .last_activity
                    .lock()
                    .map(|last| now.duration_since(*last) > threshold)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Deliver an event to the current subscribers of a topic.
    ///
    /// Best-effort: a slow or gone subscriber is skipped, and one
    /// subscriber's failure never affects the others or the source.
    fn dispatch(&self, topic: &str, event: Event) {
        let members: Vec<String> = match self.topics.get(topic) {
            Some(members) => members.iter().cloned().collect(),
            None => return,
        };

        for conn_id in members {
            if let Some(conn) = self.connections.get(&conn_id) {
                if let Err(e) = conn.tx.try_send(event.clone()) {
                    warn!(
                        "Dropping event on {} for connection {}: {}",
                        topic, conn_id, e
                    );
                }
            }
        }
    }
}

impl EventSink for EventHub {
    fn publish(&self, topic: &str, event: Event) {
        if self.publish_tx.send((topic.to_string(), event)).is_err() {
            warn!("Event dispatcher gone; dropping event on {}", topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_protocol::topic;

    async fn recv_timeout(rx: &mut mpsc::Receiver<Event>) -> Option<Event> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = EventHub::new();
        let (conn_id, mut rx) = hub.register_connection();
        assert!(hub.join(&conn_id, &topic::project("p1")));

        hub.publish(
            &topic::project("p1"),
            Event::ProjectCreated {
                project_id: "p1".to_string(),
                name: "demo".to_string(),
            },
        );

        let event = recv_timeout(&mut rx).await.expect("event delivered");
        assert!(matches!(event, Event::ProjectCreated { .. }));
    }

    #[tokio::test]
    async fn test_non_subscriber_receives_nothing() {
        let hub = EventHub::new();
        let (_conn_id, mut rx) = hub.register_connection();

        hub.publish(
            &topic::project("p1"),
            Event::ProjectDeleted {
                project_id: "p1".to_string(),
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let hub = EventHub::new();
        let (conn_id, mut rx) = hub.register_connection();
        hub.join(&conn_id, "terminal:t1");
        hub.leave(&conn_id, "terminal:t1");
        assert!(!hub.is_subscribed(&conn_id, "terminal:t1"));

        hub.publish(
            "terminal:t1",
            Event::TerminalExit {
                session_id: "t1".to_string(),
                code: 0,
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_discards_memberships() {
        let hub = EventHub::new();
        let (conn_id, _rx) = hub.register_connection();
        hub.join(&conn_id, "project:p1");
        hub.unregister_connection(&conn_id);
        assert_eq!(hub.subscriber_count("project:p1"), 0);
        assert!(!hub.join(&conn_id, "project:p1"));
    }

    #[tokio::test]
    async fn test_per_source_ordering_preserved() {
        let hub = EventHub::new();
        let (conn_id, mut rx) = hub.register_connection();
        hub.join(&conn_id, "terminal:t1");

        for i in 0..10 {
            hub.publish(
                "terminal:t1",
                Event::TerminalOutput {
                    session_id: "t1".to_string(),
                    data: format!("chunk-{i}"),
                },
            );
        }

        for i in 0..10 {
            match recv_timeout(&mut rx).await.expect("event delivered") {
                Event::TerminalOutput { data, .. } => assert_eq!(data, format!("chunk-{i}")),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_idle_connection_detection() {
        let hub = EventHub::new();
        let (conn_id, _rx) = hub.register_connection();

        assert!(hub.idle_connections(Duration::from_secs(60)).is_empty());
        tokio::time::sleep(Duration::from_millis(30)).await;
        let idle = hub.idle_connections(Duration::from_millis(10));
        assert_eq!(idle, vec![conn_id.clone()]);

        hub.touch(&conn_id);
        assert!(hub.idle_connections(Duration::from_millis(10)).is_empty());
    }
}
