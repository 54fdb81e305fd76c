//! Session lifecycle event bus.
//!
//! The auth core reports what happened; the UI shell decides how to
//! show it. Events carry no domain payloads, only enough for the shell
//! to navigate and to render transient notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error};
use uuid::Uuid;

/// Capacity of the broadcast channel behind the bus
pub const EVENT_BUS_CAPACITY: usize = 100;

/// What happened to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SignedIn { user_id: String },
    SignedOut,
    RedirectToSignIn { redirect_url: Option<String> },
    TransportFailure { status: u16, message: String },
}

/// An event as delivered to subscribers, stamped with an id and time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionNotice {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event: SessionEvent,
}

/// Statistics for monitoring bus activity
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    pub events_published: u64,
    pub events_dropped: u64,
}

/// Broadcast bus for session events
pub struct EventBus {
    sender: broadcast::Sender<SessionNotice>,
    stats: Arc<RwLock<EventBusStats>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            sender,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// An event with no listeners is counted as dropped rather than
    /// treated as a failure; the session core must not depend on the
    /// shell being attached.
    pub async fn publish(&self, event: SessionEvent) {
        let notice = SessionNotice {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        };

        match self.sender.send(notice) {
            Ok(receiver_count) => {
                let mut stats = self.stats.write().await;
                stats.events_published += 1;
                debug!(receivers = receiver_count, "Session event published");
            }
            Err(broadcast::error::SendError(notice)) => {
                let mut stats = self.stats.write().await;
                stats.events_dropped += 1;
                if stats.events_dropped == 1 {
                    error!(event = ?notice.event, "Session event dropped, no subscribers attached");
                } else {
                    debug!(event = ?notice.event, "Session event dropped, no subscribers attached");
                }
            }
        }
    }

    /// Current statistics
    pub async fn stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::SignedIn {
            user_id: "u-3".to_string(),
        })
        .await;

        let notice = rx.recv().await.unwrap();
        assert_eq!(
            notice.event,
            SessionEvent::SignedIn {
                user_id: "u-3".to_string()
            }
        );
        assert_eq!(bus.stats().await.events_published, 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_counted() {
        let bus = EventBus::new();
        bus.publish(SessionEvent::SignedOut).await;

        let stats = bus.stats().await;
        assert_eq!(stats.events_published, 0);
        assert_eq!(stats.events_dropped, 1);
    }
}
