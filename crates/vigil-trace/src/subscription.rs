//! Live event channel.
//!
//! Every event a run appends to its trace is also published here. Consumers
//! (UI bridges, log shippers) subscribe with a filter instead of registering
//! callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;
use uuid::Uuid;
use vigil_core::{EventKind, TraceEvent};

/// Filter for subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only events of this run.
    pub run_id: Option<Uuid>,

    /// Only these kinds of event.
    pub kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    /// Create a filter for one run.
    pub fn run(run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
            ..Default::default()
        }
    }

    /// Create a filter for specific event kinds.
    pub fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            ..Default::default()
        }
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &TraceEvent) -> bool {
        if let Some(run_id) = self.run_id {
            if event.run_id() != run_id {
                return false;
            }
        }

        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        true
    }
}

/// A subscription to trace events.
pub struct EventSubscription {
    /// Unique ID for this subscription.
    pub id: Uuid,

    /// Filter for this subscription.
    pub filter: EventFilter,

    receiver: broadcast::Receiver<TraceEvent>,
}

impl EventSubscription {
    /// Wait for the next matching event. Returns `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<TraceEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!("Subscription {} lagged, dropped {} events", self.id, missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a stream of matching events. Lagged gaps are skipped.
    pub fn into_stream(self) -> BoxStream<'static, TraceEvent> {
        let filter = self.filter;
        Box::pin(
            BroadcastStream::new(self.receiver)
                .filter_map(move |item| item.ok().filter(|event| filter.matches(event))),
        )
    }
}

/// Fan-out hub for trace events.
#[derive(Clone)]
pub struct EventHub {
    /// Sender for broadcasting events.
    sender: broadcast::Sender<TraceEvent>,

    /// Active subscriptions.
    subscriptions: Arc<RwLock<HashMap<Uuid, EventFilter>>>,
}

impl EventHub {
    /// Create a hub whose subscribers may fall `capacity` events behind.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to events with a filter.
    pub async fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        let id = Uuid::new_v4();
        let receiver = self.sender.subscribe();

        let mut subs = self.subscriptions.write().await;
        subs.insert(id, filter.clone());

        EventSubscription {
            id,
            filter,
            receiver,
        }
    }

    /// Unsubscribe.
    pub async fn unsubscribe(&self, id: Uuid) {
        let mut subs = self.subscriptions.write().await;
        subs.remove(&id);
    }

    /// Publish an event. Having no subscribers is not an error; the trace
    /// remains the source of truth.
    pub fn publish(&self, event: TraceEvent) {
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn agent_start(run_id: Uuid, agent_id: &str) -> TraceEvent {
        TraceEvent::AgentStart {
            run_id,
            agent_id: agent_id.to_string(),
            segment: 0,
            step: 0,
            timestamp: Utc::now(),
        }
    }

    fn plan_start(run_id: Uuid) -> TraceEvent {
        TraceEvent::PlanStart {
            run_id,
            segment: 0,
            steps: vec!["intake".to_string()],
            total_cost: 1.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_filter_by_run() {
        let run_id = Uuid::new_v4();
        let filter = EventFilter::run(run_id);

        assert!(filter.matches(&agent_start(run_id, "intake")));
        assert!(!filter.matches(&agent_start(Uuid::new_v4(), "intake")));
    }

    #[test]
    fn test_filter_by_kind() {
        let run_id = Uuid::new_v4();
        let filter = EventFilter::kinds(vec![EventKind::PlanStart]);

        assert!(filter.matches(&plan_start(run_id)));
        assert!(!filter.matches(&agent_start(run_id, "intake")));
    }

    #[tokio::test]
    async fn test_subscription_receives_matching_events() {
        let hub = EventHub::new(16);
        let run_id = Uuid::new_v4();
        let mut sub = hub.subscribe(EventFilter::run(run_id)).await;

        hub.publish(agent_start(Uuid::new_v4(), "other"));
        hub.publish(agent_start(run_id, "intake"));

        let event = sub.next().await.unwrap();
        assert_eq!(event.run_id(), run_id);
    }

    #[tokio::test]
    async fn test_subscription_stream() {
        let hub = EventHub::new(16);
        let run_id = Uuid::new_v4();
        let mut stream = hub
            .subscribe(EventFilter::kinds(vec![EventKind::PlanStart]))
            .await
            .into_stream();

        hub.publish(agent_start(run_id, "intake"));
        hub.publish(plan_start(run_id));

        let event = stream.next().await.unwrap();
        assert_eq!(event.kind(), EventKind::PlanStart);
    }

    #[tokio::test]
    async fn test_subscription_manager() {
        let hub = EventHub::default();

        let sub = hub.subscribe(EventFilter::default()).await;
        assert_eq!(hub.subscription_count().await, 1);

        hub.unsubscribe(sub.id).await;
        assert_eq!(hub.subscription_count().await, 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let hub = EventHub::new(4);
        hub.publish(plan_start(Uuid::new_v4()));
    }
}
