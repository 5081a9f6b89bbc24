//! Best-effort notification dispatch.
//!
//! Domain events are collected in an [`Outbox`] while a transaction runs and
//! handed to the bus only after the commit succeeded. A rolled-back operation
//! therefore never notifies. Publish failures are logged and swallowed.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use lotflow_core::{ActorId, AggregateId};
use lotflow_events::{Event, EventBus, EventEnvelope};

/// Envelopes waiting for the commit.
#[derive(Debug, Default)]
pub struct Outbox {
    envelopes: Vec<EventEnvelope<JsonValue>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<E>(&mut self, actor: ActorId, aggregate_id: AggregateId, aggregate_type: &str, events: &[E])
    where
        E: Event + Serialize,
    {
        for event in events {
            match EventEnvelope::from_typed(actor, aggregate_id, aggregate_type, event) {
                Ok(envelope) => self.envelopes.push(envelope),
                Err(err) => warn!(
                    event_type = event.event_type(),
                    %aggregate_id,
                    error = %err,
                    "dropping notification that failed to serialize"
                ),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

/// Publishes committed outboxes to an [`EventBus`].
#[derive(Debug, Clone)]
pub struct Notifier<B> {
    bus: B,
}

impl<B> Notifier<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn publish(&self, outbox: Outbox) {
        for envelope in outbox.envelopes {
            let event_type = envelope.event_type().to_string();
            match self.bus.publish(envelope) {
                Ok(()) => debug!(event_type = %event_type, "notification published"),
                Err(err) => warn!(event_type = %event_type, error = ?err, "notification publish failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use lotflow_events::InMemoryEventBus;
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize)]
    struct Counted {
        at: DateTime<Utc>,
    }

    impl Event for Counted {
        fn event_type(&self) -> &'static str {
            "test.counted"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn publishes_every_recorded_event_in_order() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let notifier = Notifier::new(bus.clone());

        let mut outbox = Outbox::new();
        let events = [Counted { at: Utc::now() }, Counted { at: Utc::now() }];
        outbox.record(ActorId::new(), AggregateId::new(), "test", &events);
        assert_eq!(outbox.len(), 2);

        notifier.publish(outbox);

        let received = sub.drain();
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|e| e.event_type() == "test.counted"));
    }
}
