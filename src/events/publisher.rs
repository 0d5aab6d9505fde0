use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::EventConfig;

/// Which record kind a status event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSubject {
    LiveAction,
    WorkflowExecution,
    TaskExecution,
}

/// One published status transition.
///
/// `revision` is the document revision produced by the write that made the
/// transition durable, so downstream consumers can dedupe by `(id, revision)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub subject: EventSubject,
    pub id: Uuid,
    pub revision: u64,
    pub status: String,
    pub published_at: DateTime<Utc>,
}

/// High-throughput publisher for lifecycle status events.
#[derive(Debug, Clone)]
pub struct StatusEventPublisher {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusEventPublisher {
    /// Create a new publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a publisher sized from the event bus configuration.
    pub fn from_config(config: &EventConfig) -> Self {
        Self::new(config.channel_capacity)
    }

    /// Publish a status transition.
    pub fn publish(
        &self,
        subject: EventSubject,
        id: Uuid,
        revision: u64,
        status: impl Into<String>,
    ) -> Result<(), PublishError> {
        let event = StatusEvent {
            subject,
            id,
            revision,
            status: status.into(),
            published_at: Utc::now(),
        };

        // A broadcast send fails only when there are no subscribers, which is
        // acceptable: transitions are published regardless of listeners.
        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Subscribe to status events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusEventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Error types for event publishing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = StatusEventPublisher::new(16);
        let result = publisher.publish(EventSubject::LiveAction, Uuid::new_v4(), 1, "requested");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_from_config_bounds_the_channel() {
        let publisher = StatusEventPublisher::from_config(&EventConfig {
            channel_capacity: 1,
        });
        let mut rx = publisher.subscribe();
        let id = Uuid::new_v4();

        // Two publishes into a capacity-1 channel push the first event out
        publisher
            .publish(EventSubject::LiveAction, id, 1, "requested")
            .unwrap();
        publisher
            .publish(EventSubject::LiveAction, id, 2, "scheduled")
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap().revision, 2);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event_with_revision() {
        let publisher = StatusEventPublisher::new(16);
        let mut rx = publisher.subscribe();
        let id = Uuid::new_v4();

        publisher
            .publish(EventSubject::LiveAction, id, 3, "scheduled")
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.revision, 3);
        assert_eq!(event.status, "scheduled");
        assert_eq!(event.subject, EventSubject::LiveAction);
    }
}
