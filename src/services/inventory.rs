//! Inventory store
//!
//! Owns the `items` table: total capacity (`max_quantity`) and the on-shelf
//! snapshot (`available_quantity`) of every borrowable item.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::{begin_serializable, commit_or_rollback, for_update, with_retry, ItemLocks, RetryPolicy};
use crate::entities::item;
use crate::entities::reservation::{self, ReservationStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::availability;
use crate::services::reservation_ledger;
use crate::services::validate_not_blank;

/// Input for registering a new borrowable item.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct NewItem {
    #[validate(length(min = 1, max = 255), custom = "validate_not_blank")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub category: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub location: String,
    #[validate(range(min = 1))]
    pub max_quantity: i32,
    /// Defaults to `max_quantity`.
    #[validate(range(min = 0))]
    pub initial_available: Option<i32>,
}

/// Partial update of an item's descriptive fields and capacity.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct ItemPatch {
    #[validate(length(min = 1, max = 255), custom = "validate_not_blank")]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(length(max = 255))]
    pub location: Option<String>,
    #[validate(range(min = 1))]
    pub max_quantity: Option<i32>,
}

/// Service for managing the item catalogue and its quantities
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: EventSender,
    locks: ItemLocks,
    retry: RetryPolicy,
}

impl InventoryService {
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

    #[instrument(skip(self))]
    pub async fn get_item(&self, id: Uuid) -> Result<item::Model, ServiceError> {
        item::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| item_not_found(id))
    }

    /// Lists items ordered by name. `page` starts at 1.
    #[instrument(skip(self))]
    pub async fn list_items(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<item::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if limit == 0 || limit > 1000 {
            return Err(ServiceError::ValidationError(
                "Limit must be between 1 and 1000".to_string(),
            ));
        }

        let paginator = item::Entity::find()
            .order_by_asc(item::Column::Name)
            .order_by_asc(item::Column::Id)
            .paginate(&*self.db_pool, limit);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::db_error)?;
        let items = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((items, total))
    }

    #[instrument(skip(self), fields(name = %input.name))]
    pub async fn create_item(&self, input: NewItem) -> Result<item::Model, ServiceError> {
        input.validate()?;
        let available = input.initial_available.unwrap_or(input.max_quantity);
        if available > input.max_quantity {
            return Err(ServiceError::ValidationError(format!(
                "initial_available {} exceeds max_quantity {}",
                available, input.max_quantity
            )));
        }

        let now = Utc::now();
        let model = item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            category: Set(input.category),
            location: Set(input.location),
            max_quantity: Set(input.max_quantity),
            available_quantity: Set(available),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(ServiceError::db_error)?;

        counter!("barangay_inventory.items_created", 1);
        info!(item_id = %model.id, max_quantity = model.max_quantity, "Item created");
        self.event_sender.send_or_log(Event::ItemCreated(model.id)).await;

        Ok(model)
    }

    /// Edits an item. Lowering `max_quantity` fails with a capacity conflict if any
    /// active reservation, past window or not, would no longer fit.
    #[instrument(skip(self, patch))]
    pub async fn update_item(&self, id: Uuid, patch: ItemPatch) -> Result<item::Model, ServiceError> {
        patch.validate()?;

        let guard = self.locks.acquire(id).await;
        let patch = &patch;
        let result = with_retry(&self.retry, "update_item", move || self.try_update(id, patch)).await;
        drop(guard);

        let item = result?;
        self.event_sender.send_or_log(Event::ItemUpdated(item.id)).await;
        Ok(item)
    }

    async fn try_update(&self, id: Uuid, patch: &ItemPatch) -> Result<item::Model, ServiceError> {
        let txn = begin_serializable(&self.db_pool).await?;
        let result = async {
            let current = lock_item(&txn, id).await?;
            let old_max = current.max_quantity;
            let old_available = current.available_quantity;
            let mut active: item::ActiveModel = current.into();

            if let Some(name) = &patch.name {
                active.name = Set(name.trim().to_string());
            }
            if let Some(description) = &patch.description {
                active.description = Set(description.clone());
            }
            if let Some(category) = &patch.category {
                active.category = Set(category.clone());
            }
            if let Some(location) = &patch.location {
                active.location = Set(location.clone());
            }
            if let Some(new_max) = patch.max_quantity {
                if new_max < old_max {
                    let reservations = reservation_ledger::active_for_item(&txn, id).await?;
                    // Approved windows that already ended still hold units until completed.
                    let blocking = availability::over_capacity(
                        &reservations,
                        DateTime::<Utc>::MIN_UTC,
                        DateTime::<Utc>::MAX_UTC,
                        new_max,
                    );
                    if !blocking.is_empty() {
                        warn!(item_id = %id, new_max, "Capacity reduction blocked by active reservations");
                        return Err(ServiceError::CapacityConflict(blocking));
                    }
                }
                active.max_quantity = Set(new_max);
                active.available_quantity =
                    Set((old_available + (new_max - old_max)).clamp(0, new_max));
            }

            active.update(&txn).await.map_err(ServiceError::db_error)
        }
        .await;
        commit_or_rollback(txn, result).await
    }

    /// Administrative override of the on-shelf count.
    #[instrument(skip(self))]
    pub async fn adjust_available(&self, id: Uuid, new_available: i32) -> Result<item::Model, ServiceError> {
        if new_available < 0 {
            return Err(ServiceError::ValidationError(
                "available quantity cannot be negative".to_string(),
            ));
        }

        let guard = self.locks.acquire(id).await;
        let result = with_retry(&self.retry, "adjust_available", move || {
            self.try_set_available(id, Some(new_available))
        })
        .await;
        drop(guard);

        let (old_available, item) = result?;
        counter!("barangay_inventory.adjustments", 1);
        self.event_sender
            .send_or_log(Event::AvailabilityAdjusted {
                item_id: item.id,
                old_available,
                new_available: item.available_quantity,
            })
            .await;
        Ok(item)
    }

    /// Resets `available_quantity` to `max_quantity` without consulting reservations.
    #[instrument(skip(self))]
    pub async fn restock(&self, id: Uuid) -> Result<item::Model, ServiceError> {
        let guard = self.locks.acquire(id).await;
        let result = with_retry(&self.retry, "restock", move || self.try_set_available(id, None)).await;
        drop(guard);

        let (_, item) = result?;
        counter!("barangay_inventory.restocks", 1);
        self.event_sender
            .send_or_log(Event::ItemRestocked {
                item_id: item.id,
                available: item.available_quantity,
            })
            .await;
        Ok(item)
    }

    /// `None` restocks to max.
    async fn try_set_available(
        &self,
        id: Uuid,
        new_available: Option<i32>,
    ) -> Result<(i32, item::Model), ServiceError> {
        let txn = begin_serializable(&self.db_pool).await?;
        let result = async {
            let current = lock_item(&txn, id).await?;
            let old_available = current.available_quantity;
            let target = new_available.unwrap_or(current.max_quantity);
            if target < 0 || target > current.max_quantity {
                return Err(ServiceError::ValidationError(format!(
                    "available quantity must be between 0 and {}",
                    current.max_quantity
                )));
            }

            let mut active: item::ActiveModel = current.into();
            active.available_quantity = Set(target);
            let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
            Ok::<_, ServiceError>((old_available, updated))
        }
        .await;
        commit_or_rollback(txn, result).await
    }

    /// Deletes an item together with its terminal reservation history. Refused while
    /// any reservation for it is still pending or approved.
    #[instrument(skip(self))]
    pub async fn delete_item(&self, id: Uuid) -> Result<(), ServiceError> {
        let guard = self.locks.acquire(id).await;
        let result = with_retry(&self.retry, "delete_item", move || self.try_delete(id)).await;
        drop(guard);

        result?;
        counter!("barangay_inventory.items_deleted", 1);
        info!(item_id = %id, "Item deleted");
        self.event_sender.send_or_log(Event::ItemDeleted(id)).await;
        Ok(())
    }

    async fn try_delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let txn = begin_serializable(&self.db_pool).await?;
        let result = async {
            lock_item(&txn, id).await?;

            let active = reservation::Entity::find()
                .filter(reservation::Column::ItemId.eq(id))
                .filter(reservation::Column::Status.is_in(ReservationStatus::ACTIVE))
                .count(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            if active > 0 {
                return Err(ServiceError::Conflict(format!(
                    "Item {} has {} active reservation(s)",
                    id, active
                )));
            }

            reservation::Entity::delete_many()
                .filter(reservation::Column::ItemId.eq(id))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            item::Entity::delete_by_id(id)
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            Ok::<_, ServiceError>(())
        }
        .await;
        commit_or_rollback(txn, result).await
    }
}

fn item_not_found(id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Item {} not found", id))
}

/// Reads the item row, locking it for the rest of the transaction where the backend
/// supports row locks.
pub(crate) async fn lock_item<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<item::Model, ServiceError> {
    for_update(item::Entity::find_by_id(id), conn)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| item_not_found(id))
}

/// Recomputes the on-shelf snapshot as `max_quantity` minus the approved quantity
/// checked out at `now`.
pub(crate) async fn refresh_available<C: ConnectionTrait>(
    conn: &C,
    item: item::Model,
    now: DateTime<Utc>,
) -> Result<item::Model, ServiceError> {
    let approved = reservation::Entity::find()
        .filter(reservation::Column::ItemId.eq(item.id))
        .filter(reservation::Column::Status.eq(ReservationStatus::Approved))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let checked_out: i32 = approved
        .iter()
        .filter(|r| r.covers(now))
        .map(|r| r.quantity)
        .sum();
    let available = (item.max_quantity - checked_out).clamp(0, item.max_quantity);

    if available == item.available_quantity {
        return Ok(item);
    }

    let mut active: item::ActiveModel = item.into();
    active.available_quantity = Set(available);
    active.update(conn).await.map_err(ServiceError::db_error)
}
