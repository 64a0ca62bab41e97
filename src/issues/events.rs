use super::model::Issue;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Change to an issue, published for real-time consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "issue")]
pub enum IssueEvent {
    #[serde(rename = "created")]
    Created(Issue),
    #[serde(rename = "updated")]
    Updated(Issue),
}

impl IssueEvent {
    pub fn issue(&self) -> &Issue {
        match self {
            IssueEvent::Created(issue) | IssueEvent::Updated(issue) => issue,
        }
    }
}

/// Sink for issue events. Delivery is best effort: a publisher never fails
/// the ingestion that produced the event.
#[async_trait]
pub trait IssuePublisher: Send + Sync {
    async fn publish(&self, event: IssueEvent);
}

/// Fan-out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<IssueEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IssueEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl IssuePublisher for BroadcastPublisher {
    async fn publish(&self, event: IssueEvent) {
        // No subscribers is not an error
        if self.sender.send(event).is_err() {
            debug!("No subscribers for issue event");
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<IssueEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IssueEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl IssuePublisher for RecordingPublisher {
    async fn publish(&self, event: IssueEvent) {
        self.events.lock().push(event);
    }
}
