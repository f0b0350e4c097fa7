//! Reservation ledger
//!
//! Records reservations and answers queries over them. New reservations are admitted
//! inside the item's critical section; status changes go through [`set_status`],
//! which only the lifecycle manager calls.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::{begin_serializable, commit_or_rollback, with_retry, ItemLocks, RetryPolicy};
use crate::entities::reservation::{self, ReservationStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::availability::{self, CapacityRequest};
use crate::services::inventory::lock_item;
use crate::services::validate_not_blank;

/// Input for requesting a reservation.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct NewReservation {
    pub item_id: Uuid,
    #[validate(length(min = 1, max = 255), custom = "validate_not_blank")]
    pub requester_id: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// A decision applied to a reservation by [`set_status`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusChange<'a> {
    pub to: ReservationStatus,
    pub actor_id: &'a str,
    pub reason: Option<&'a str>,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReservationLedger {
    db_pool: Arc<DatabaseConnection>,
    event_sender: EventSender,
    locks: ItemLocks,
    retry: RetryPolicy,
}

impl ReservationLedger {
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

    /// Records a Pending reservation if the item can hold it over the whole window.
    #[instrument(skip(self, input), fields(item_id = %input.item_id, quantity = input.quantity))]
    pub async fn create(&self, input: NewReservation) -> Result<reservation::Model, ServiceError> {
        input.validate()?;
        availability::validate_request(input.quantity, input.window_start, input.window_end)?;

        let guard = self.locks.acquire(input.item_id).await;
        let input = &input;
        let result = with_retry(&self.retry, "create_reservation", move || self.try_create(input)).await;
        drop(guard);

        let created = result?;
        counter!("barangay_reservations.created", 1);
        info!(reservation_id = %created.id, requester_id = %created.requester_id, "Reservation created");
        self.event_sender
            .send_or_log(Event::ReservationCreated {
                reservation_id: created.id,
                item_id: created.item_id,
                requester_id: created.requester_id.clone(),
                quantity: created.quantity,
            })
            .await;
        Ok(created)
    }

    async fn try_create(&self, input: &NewReservation) -> Result<reservation::Model, ServiceError> {
        let txn = begin_serializable(&self.db_pool).await?;
        let result = async {
            let item = lock_item(&txn, input.item_id).await?;
            if input.quantity > item.max_quantity {
                return Err(ServiceError::ValidationError(format!(
                    "quantity {} exceeds item capacity {}",
                    input.quantity, item.max_quantity
                )));
            }

            let request = CapacityRequest::new(input.quantity, input.window_start, input.window_end);
            availability::evaluate(&txn, &item, &request)
                .await?
                .into_result()?;

            let now = Utc::now();
            reservation::ActiveModel {
                id: Set(Uuid::new_v4()),
                item_id: Set(item.id),
                requester_id: Set(input.requester_id.trim().to_string()),
                quantity: Set(input.quantity),
                window_start: Set(input.window_start),
                window_end: Set(input.window_end),
                status: Set(ReservationStatus::Pending),
                approved_by: Set(None),
                approved_at: Set(None),
                reason: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)
        }
        .await;
        commit_or_rollback(txn, result).await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<reservation::Model, ServiceError> {
        reservation::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Reservation {} not found", id)))
    }

    /// All reservations of a requester, newest first. Rows created in the same instant
    /// come back in the backend's storage order.
    #[instrument(skip(self))]
    pub async fn list_by_requester(&self, requester_id: &str) -> Result<Vec<reservation::Model>, ServiceError> {
        reservation::Entity::find()
            .filter(reservation::Column::RequesterId.eq(requester_id))
            .order_by_desc(reservation::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Pending and approved reservations of an item by window start.
    #[instrument(skip(self))]
    pub async fn list_active_by_item(&self, item_id: Uuid) -> Result<Vec<reservation::Model>, ServiceError> {
        active_for_item(&*self.db_pool, item_id).await
    }

    /// Every reservation of an item, any status, by window start.
    #[instrument(skip(self))]
    pub async fn list_by_item(&self, item_id: Uuid) -> Result<Vec<reservation::Model>, ServiceError> {
        reservation::Entity::find()
            .filter(reservation::Column::ItemId.eq(item_id))
            .order_by_asc(reservation::Column::WindowStart)
            .order_by_asc(reservation::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}

pub(crate) async fn active_for_item<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
) -> Result<Vec<reservation::Model>, ServiceError> {
    reservation::Entity::find()
        .filter(reservation::Column::ItemId.eq(item_id))
        .filter(reservation::Column::Status.is_in(ReservationStatus::ACTIVE))
        .order_by_asc(reservation::Column::WindowStart)
        .order_by_asc(reservation::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Moves a reservation to `change.to` if, and only if, it is currently in one of
/// `from`. The check and the write are a single conditional update, so a missing row
/// and a row in the wrong state both come back as `NotFoundOrInvalidState`.
pub(crate) async fn set_status<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    from: &[ReservationStatus],
    change: StatusChange<'_>,
) -> Result<reservation::Model, ServiceError> {
    let mut values = reservation::ActiveModel {
        status: Set(change.to),
        approved_by: Set(Some(change.actor_id.to_string())),
        approved_at: Set(Some(change.at)),
        updated_at: Set(change.at),
        ..Default::default()
    };
    if let Some(reason) = change.reason {
        values.reason = Set(Some(reason.to_string()));
    }

    let outcome = reservation::Entity::update_many()
        .set(values)
        .filter(reservation::Column::Id.eq(id))
        .filter(reservation::Column::Status.is_in(from.iter().copied()))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if outcome.rows_affected == 0 {
        return Err(invalid_transition(id, change.to));
    }

    reservation::Entity::find_by_id(id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| invalid_transition(id, change.to))
}

pub(crate) fn invalid_transition(id: Uuid, to: ReservationStatus) -> ServiceError {
    ServiceError::NotFoundOrInvalidState(format!(
        "Reservation {} does not exist or cannot become {}",
        id,
        to.as_str()
    ))
}
