// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for Domain Events
//
// In-memory event streaming over tokio broadcast channels. Carries workload
// status changes, node session lifecycle and raw agent frames; the transfer
// coordinator and the tests correlate on filtered receivers.

use crate::domain::events::DomainEvent;
use crate::domain::workload::WorkloadId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity bounds how many events may buffer before slow receivers lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender: Arc::new(sender) }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    pub fn publish(&self, event: DomainEvent) {
        // send() only errors when there are no subscribers, which is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver { receiver: self.sender.subscribe() }
    }

    /// Subscribe filtered to one workload's events.
    pub fn subscribe_workload(&self, workload_id: WorkloadId) -> WorkloadEventReceiver {
        WorkloadEventReceiver { receiver: self.sender.subscribe(), workload_id }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,

    #[error("receiver lagged by {0} events")]
    Lagged(u64),
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single workload.
pub struct WorkloadEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    workload_id: WorkloadId,
}

impl WorkloadEventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if event.workload_id() == Some(self.workload_id) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::WorkloadEvent;
    use crate::domain::workload::WorkloadStatus;
    use chrono::Utc;

    fn status_event(id: WorkloadId) -> DomainEvent {
        DomainEvent::Workload(WorkloadEvent::StatusChanged {
            workload_id: id,
            from: WorkloadStatus::Starting,
            to: WorkloadStatus::Running,
            at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn publish_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(status_event(WorkloadId(1)));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.workload_id(), Some(WorkloadId(1)));
    }

    #[tokio::test]
    async fn workload_filter_skips_other_workloads() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_workload(WorkloadId(2));
        bus.publish(status_event(WorkloadId(1)));
        bus.publish(status_event(WorkloadId(2)));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.workload_id(), Some(WorkloadId(2)));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(status_event(WorkloadId(3)));
        a.recv().await.unwrap();
        b.recv().await.unwrap();
    }
}
