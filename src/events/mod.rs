use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::reservation::ReservationStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with its bounded receiving half
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event after a committed write. The write already happened, so a
    /// closed channel is only logged.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            counter!("barangay_events.dropped", 1, "event" => name);
            warn!(event = name, error = %e, "Dropping lifecycle event");
        }
    }
}

/// Lifecycle and inventory events emitted after a transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ItemCreated(Uuid),
    ItemUpdated(Uuid),
    ItemDeleted(Uuid),
    AvailabilityAdjusted {
        item_id: Uuid,
        old_available: i32,
        new_available: i32,
    },
    ItemRestocked {
        item_id: Uuid,
        available: i32,
    },
    ReservationCreated {
        reservation_id: Uuid,
        item_id: Uuid,
        requester_id: String,
        quantity: i32,
    },
    ReservationApproved {
        reservation_id: Uuid,
        item_id: Uuid,
        actor_id: String,
        at: DateTime<Utc>,
    },
    ReservationRejected {
        reservation_id: Uuid,
        item_id: Uuid,
        actor_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    ReservationCancelled {
        reservation_id: Uuid,
        item_id: Uuid,
        actor_id: String,
        reason: String,
        previous_status: ReservationStatus,
        at: DateTime<Utc>,
    },
    ReservationCompleted {
        reservation_id: Uuid,
        item_id: Uuid,
        actor_id: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ItemCreated(_) => "item_created",
            Event::ItemUpdated(_) => "item_updated",
            Event::ItemDeleted(_) => "item_deleted",
            Event::AvailabilityAdjusted { .. } => "availability_adjusted",
            Event::ItemRestocked { .. } => "item_restocked",
            Event::ReservationCreated { .. } => "reservation_created",
            Event::ReservationApproved { .. } => "reservation_approved",
            Event::ReservationRejected { .. } => "reservation_rejected",
            Event::ReservationCancelled { .. } => "reservation_cancelled",
            Event::ReservationCompleted { .. } => "reservation_completed",
        }
    }
}

/// Drains the event channel until every sender is dropped.
///
/// This is the notification sink: events are logged and counted. Delivery to
/// residents (SMS, email) plugs in here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("barangay_events.processed", 1, "event" => event.name());

        match &event {
            Event::ReservationRejected {
                reservation_id,
                reason,
                ..
            }
            | Event::ReservationCancelled {
                reservation_id,
                reason,
                ..
            } => {
                info!(
                    event = event.name(),
                    %reservation_id,
                    reason = reason.as_str(),
                    "Reservation closed"
                );
            }
            Event::AvailabilityAdjusted {
                item_id,
                old_available,
                new_available,
            } => {
                info!(
                    event = event.name(),
                    %item_id,
                    old_available,
                    new_available,
                    "Item availability adjusted manually"
                );
            }
            other => {
                info!(event = other.name(), "Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
