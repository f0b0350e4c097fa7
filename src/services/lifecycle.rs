//! Lifecycle manager
//!
//! Drives reservations through `Pending -> Approved -> Completed` and the
//! `Rejected`/`Cancelled` exits. Each transition runs in the item's critical
//! section; approvals re-check capacity, and every transition that changes the
//! approved set refreshes the item's on-shelf snapshot in the same transaction.

use chrono::Utc;
use metrics::counter;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::{begin_serializable, commit_or_rollback, with_retry, ItemLocks, RetryPolicy};
use crate::entities::reservation::{self, ReservationStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::availability::{self, CapacityRequest};
use crate::services::inventory::{lock_item, refresh_available};
use crate::services::reservation_ledger::{invalid_transition, set_status, StatusChange};

#[derive(Clone)]
pub struct LifecycleManager {
    db_pool: Arc<DatabaseConnection>,
    event_sender: EventSender,
    locks: ItemLocks,
    retry: RetryPolicy,
}

impl LifecycleManager {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: EventSender,
        locks: ItemLocks,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            locks,
            retry,
        }
    }

    /// Approves a pending reservation after re-checking the item's capacity.
    #[instrument(skip(self))]
    pub async fn approve(&self, id: Uuid, approver_id: &str) -> Result<reservation::Model, ServiceError> {
        require_actor(approver_id)?;
        let item_id = self.item_of(id, ReservationStatus::Approved).await?;

        let guard = self.locks.acquire(item_id).await;
        let result = with_retry(&self.retry, "approve_reservation", move || {
            self.try_approve(id, item_id, approver_id)
        })
        .await;
        drop(guard);

        let approved = result?;
        record_transition(&approved);
        self.event_sender
            .send_or_log(Event::ReservationApproved {
                reservation_id: approved.id,
                item_id: approved.item_id,
                actor_id: approver_id.to_string(),
                at: approved.approved_at.unwrap_or_else(Utc::now),
            })
            .await;
        Ok(approved)
    }

    async fn try_approve(
        &self,
        id: Uuid,
        item_id: Uuid,
        approver_id: &str,
    ) -> Result<reservation::Model, ServiceError> {
        let txn = begin_serializable(&self.db_pool).await?;
        let result = async {
            let item = lock_item(&txn, item_id).await?;
            let current = reservation::Entity::find_by_id(id)
                .one(&txn)
                .await
                .map_err(ServiceError::db_error)?
                .filter(|r| r.status == ReservationStatus::Pending)
                .ok_or_else(|| invalid_transition(id, ReservationStatus::Approved))?;

            let request =
                CapacityRequest::new(current.quantity, current.window_start, current.window_end)
                    .excluding(id);
            availability::evaluate(&txn, &item, &request)
                .await?
                .into_result()?;

            let now = Utc::now();
            let approved = set_status(
                &txn,
                id,
                &[ReservationStatus::Pending],
                StatusChange {
                    to: ReservationStatus::Approved,
                    actor_id: approver_id,
                    reason: None,
                    at: now,
                },
            )
            .await?;
            refresh_available(&txn, item, now).await?;
            Ok::<_, ServiceError>(approved)
        }
        .await;
        commit_or_rollback(txn, result).await
    }

    /// Rejects a pending reservation. The reason is mandatory.
    #[instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        id: Uuid,
        approver_id: &str,
        reason: &str,
    ) -> Result<reservation::Model, ServiceError> {
        require_actor(approver_id)?;
        let reason = require_reason(reason)?;
        let item_id = self.item_of(id, ReservationStatus::Rejected).await?;

        let guard = self.locks.acquire(item_id).await;
        let result = with_retry(&self.retry, "reject_reservation", move || {
            self.try_close(
                id,
                item_id,
                &[ReservationStatus::Pending],
                ReservationStatus::Rejected,
                approver_id,
                Some(reason),
            )
        })
        .await;
        drop(guard);

        let (rejected, _) = result?;
        record_transition(&rejected);
        self.event_sender
            .send_or_log(Event::ReservationRejected {
                reservation_id: rejected.id,
                item_id: rejected.item_id,
                actor_id: approver_id.to_string(),
                reason: reason.to_string(),
                at: rejected.approved_at.unwrap_or_else(Utc::now),
            })
            .await;
        Ok(rejected)
    }

    /// Cancels a pending or approved reservation. The reason is mandatory.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        id: Uuid,
        actor_id: &str,
        reason: &str,
    ) -> Result<reservation::Model, ServiceError> {
        require_actor(actor_id)?;
        let reason = require_reason(reason)?;
        let item_id = self.item_of(id, ReservationStatus::Cancelled).await?;

        let guard = self.locks.acquire(item_id).await;
        let result = with_retry(&self.retry, "cancel_reservation", move || {
            self.try_close(
                id,
                item_id,
                &ReservationStatus::ACTIVE,
                ReservationStatus::Cancelled,
                actor_id,
                Some(reason),
            )
        })
        .await;
        drop(guard);

        let (cancelled, previous_status) = result?;
        record_transition(&cancelled);
        self.event_sender
            .send_or_log(Event::ReservationCancelled {
                reservation_id: cancelled.id,
                item_id: cancelled.item_id,
                actor_id: actor_id.to_string(),
                reason: reason.to_string(),
                previous_status,
                at: cancelled.approved_at.unwrap_or_else(Utc::now),
            })
            .await;
        Ok(cancelled)
    }

    /// Marks an approved reservation as returned.
    #[instrument(skip(self))]
    pub async fn complete(&self, id: Uuid, actor_id: &str) -> Result<reservation::Model, ServiceError> {
        require_actor(actor_id)?;
        let item_id = self.item_of(id, ReservationStatus::Completed).await?;

        let guard = self.locks.acquire(item_id).await;
        let result = with_retry(&self.retry, "complete_reservation", move || {
            self.try_close(
                id,
                item_id,
                &[ReservationStatus::Approved],
                ReservationStatus::Completed,
                actor_id,
                None,
            )
        })
        .await;
        drop(guard);

        let (completed, _) = result?;
        record_transition(&completed);
        self.event_sender
            .send_or_log(Event::ReservationCompleted {
                reservation_id: completed.id,
                item_id: completed.item_id,
                actor_id: actor_id.to_string(),
                at: completed.approved_at.unwrap_or_else(Utc::now),
            })
            .await;
        Ok(completed)
    }

    /// Shared body of reject, cancel and complete. Returns the updated reservation and
    /// the status it left.
    async fn try_close(
        &self,
        id: Uuid,
        item_id: Uuid,
        from: &[ReservationStatus],
        to: ReservationStatus,
        actor_id: &str,
        reason: Option<&str>,
    ) -> Result<(reservation::Model, ReservationStatus), ServiceError> {
        let txn = begin_serializable(&self.db_pool).await?;
        let result = async {
            let item = lock_item(&txn, item_id).await?;
            let previous = reservation::Entity::find_by_id(id)
                .one(&txn)
                .await
                .map_err(ServiceError::db_error)?
                .map(|r| r.status)
                .ok_or_else(|| invalid_transition(id, to))?;

            let now = Utc::now();
            let updated = set_status(
                &txn,
                id,
                from,
                StatusChange {
                    to,
                    actor_id,
                    reason,
                    at: now,
                },
            )
            .await?;

            if previous == ReservationStatus::Approved {
                refresh_available(&txn, item, now).await?;
            }
            Ok::<_, ServiceError>((updated, previous))
        }
        .await;
        commit_or_rollback(txn, result).await
    }

    /// Item of an existing reservation. `item_id` never changes, so it is safe to read
    /// before taking the item lock.
    async fn item_of(&self, id: Uuid, to: ReservationStatus) -> Result<Uuid, ServiceError> {
        reservation::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .map(|r| r.item_id)
            .ok_or_else(|| invalid_transition(id, to))
    }
}

fn require_actor(actor_id: &str) -> Result<(), ServiceError> {
    if actor_id.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "actor id is required".to_string(),
        ));
    }
    Ok(())
}

fn require_reason(reason: &str) -> Result<&str, ServiceError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(
            "a reason is required".to_string(),
        ));
    }
    Ok(trimmed)
}

fn record_transition(reservation: &reservation::Model) {
    counter!("barangay_reservations.transitions", 1, "to" => reservation.status.as_str());
    info!(
        reservation_id = %reservation.id,
        item_id = %reservation.item_id,
        status = reservation.status.as_str(),
        "Reservation transitioned"
    );
}
