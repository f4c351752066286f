//! Ordered event broadcast (spec.md §2 item 3, §5: "event broadcast
//! preserves emission order to each subscriber").
//!
//! Not a pub/sub bus in the message-broker sense — every subscriber gets
//! its own unbounded channel and `publish` clones the event into each
//! one in registration order, so no subscriber can observe events out
//! of the order they were published in.

use latticeflow_db::models::catalog::DesignStatus;
use latticeflow_db::models::jobs::{JobStatus, JobType};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    JobTransitioned {
        job_id: String,
        job_type: JobType,
        status: JobStatus,
    },
    DesignStatusChanged {
        design_id: String,
        status: DesignStatus,
    },
    ChannelDiscovered {
        discovered_channel_id: String,
        title: String,
    },
}

#[derive(Default)]
pub struct EventBus {
    subscribers: std::sync::Mutex<Vec<UnboundedSender<DomainEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<DomainEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Drops subscribers whose receiver has already gone away so the
    /// vector doesn't grow unbounded across a long-lived process.
    pub fn publish(&self, event: DomainEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_subscriber_sees_events_in_publish_order() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for i in 0..5 {
            bus.publish(DomainEvent::DesignStatusChanged {
                design_id: format!("d{i}"),
                status: DesignStatus::Discovered,
            });
        }

        for expected in 0..5 {
            let DomainEvent::DesignStatusChanged { design_id, .. } = rx1.recv().await.unwrap() else {
                panic!("wrong variant");
            };
            assert_eq!(design_id, format!("d{expected}"));
        }
        for expected in 0..5 {
            let DomainEvent::DesignStatusChanged { design_id, .. } = rx2.recv().await.unwrap() else {
                panic!("wrong variant");
            };
            assert_eq!(design_id, format!("d{expected}"));
        }
    }

    #[test]
    fn dead_subscribers_are_pruned_on_publish() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
        }
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(DomainEvent::ChannelDiscovered {
            discovered_channel_id: "c".into(),
            title: "t".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
